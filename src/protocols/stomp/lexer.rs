//! STOMP tokenizer.
//!
//! Classifies the next run of bytes by its first byte:
//!
//! ```text
//! NUL              -> Delimiter
//! EOL ... NUL      -> Body (NUL left unread)
//! ':' ... EOL      -> HeaderValue
//! VERB EOL         -> Command
//! ... ':'          -> HeaderKey (':' left unread)
//! ```
//!
//! EOL is LF or CR LF. Anything else is `Invalid`, and running out of bytes
//! anywhere yields `StreamEnd`.

use super::command::Command;
use super::source::{ByteSource, SourceError};
use bytes::{Bytes, BytesMut};
use std::fmt;

const NUL: u8 = b'\0';
const LF: u8 = b'\n';
const CR: u8 = b'\r';
const SEPARATOR: u8 = b':';

/// Maximum length of a command or header line
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Maximum frame body size
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Size caps applied while scanning tokens.
///
/// Bytes past a cap are left unread, so memory stays bounded however long a
/// peer keeps sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_line_length: usize,
    pub max_body_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

/// Why a run of bytes did not form a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// CR not followed by LF where an EOL was expected
    BareCarriageReturn,
    /// A line with no `:` that is not a known verb
    UnrecognizedLine,
    /// A line cut by a null byte before its EOL (the null byte is left unread)
    UnterminatedLine,
    /// A command or header line longer than the line limit
    LineTooLong,
    /// A body larger than the body limit
    BodyTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Command,
    HeaderKey,
    HeaderValue,
    Body,
    Delimiter,
    Invalid(Malformed),
    StreamEnd,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Command => write!(f, "command"),
            TokenKind::HeaderKey => write!(f, "header key"),
            TokenKind::HeaderValue => write!(f, "header value"),
            TokenKind::Body => write!(f, "body"),
            TokenKind::Delimiter => write!(f, "null byte"),
            TokenKind::Invalid(Malformed::BareCarriageReturn) => {
                write!(f, "carriage return without line feed")
            }
            TokenKind::Invalid(Malformed::UnrecognizedLine) => write!(f, "unrecognized line"),
            TokenKind::Invalid(Malformed::UnterminatedLine) => {
                write!(f, "null byte inside a line")
            }
            TokenKind::Invalid(Malformed::LineTooLong) => write!(f, "oversized line"),
            TokenKind::Invalid(Malformed::BodyTooLarge) => write!(f, "oversized body"),
            TokenKind::StreamEnd => write!(f, "end of stream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: Bytes,
}

impl Token {
    fn new(kind: TokenKind, literal: impl Into<Bytes>) -> Self {
        Self {
            kind,
            literal: literal.into(),
        }
    }

    fn stream_end() -> Self {
        Self::new(TokenKind::StreamEnd, Bytes::new())
    }
}

/// What ended a scanned line
enum Terminator {
    Eol,
    Separator,
    /// A null byte, left unread
    Nul,
    /// The line limit was reached
    Overflow,
}

pub struct Lexer<S> {
    source: S,
    limits: Limits,
}

impl<S: ByteSource> Lexer<S> {
    pub fn new(source: S) -> Self {
        Self::with_limits(source, Limits::default())
    }

    pub fn with_limits(source: S, limits: Limits) -> Self {
        Self { source, limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Produce the next token.
    ///
    /// Exhaustion becomes a `StreamEnd` token; only transport failures are
    /// returned as errors.
    pub async fn next_token(&mut self) -> Result<Token, SourceError> {
        match self.scan().await {
            Err(SourceError::Exhausted) => Ok(Token::stream_end()),
            result => result,
        }
    }

    /// Consume a maximal run of EOLs (blank lines between frames).
    pub async fn skip_blank_lines(&mut self) -> Result<(), SourceError> {
        loop {
            match self.scan_eol().await {
                Ok(true) => continue,
                Ok(false) | Err(SourceError::Exhausted) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard bytes up to and including the next NUL.
    ///
    /// Returns `false` if the stream ended first.
    pub async fn skip_past_delimiter(&mut self) -> Result<bool, SourceError> {
        loop {
            match self.source.read_byte().await {
                Ok(NUL) => return Ok(true),
                Ok(_) => continue,
                Err(SourceError::Exhausted) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    async fn scan(&mut self) -> Result<Token, SourceError> {
        let first = self.source.peek(1).await?[0];

        match first {
            NUL => {
                self.source.read_byte().await?;
                Ok(Token::new(TokenKind::Delimiter, Bytes::from_static(b"\0")))
            }
            CR | LF => {
                if self.scan_eol().await? {
                    match self.scan_body().await? {
                        Some(body) => Ok(Token::new(TokenKind::Body, body)),
                        None => Ok(Token::new(
                            TokenKind::Invalid(Malformed::BodyTooLarge),
                            Bytes::new(),
                        )),
                    }
                } else {
                    Ok(Token::new(
                        TokenKind::Invalid(Malformed::BareCarriageReturn),
                        Bytes::from_static(b"\r"),
                    ))
                }
            }
            SEPARATOR => {
                self.source.read_byte().await?;
                let (value, terminator) = self.scan_line(false).await?;
                let kind = match terminator {
                    Terminator::Eol => TokenKind::HeaderValue,
                    terminator => invalid_line(terminator),
                };
                Ok(Token::new(kind, value))
            }
            _ => {
                let (line, terminator) = self.scan_line(true).await?;
                let kind = match terminator {
                    Terminator::Separator => TokenKind::HeaderKey,
                    Terminator::Eol if Command::from_bytes(&line).is_some() => TokenKind::Command,
                    Terminator::Eol => TokenKind::Invalid(Malformed::UnrecognizedLine),
                    terminator => invalid_line(terminator),
                };
                Ok(Token::new(kind, line))
            }
        }
    }

    /// Consume one EOL if the cursor is at one.
    async fn scan_eol(&mut self) -> Result<bool, SourceError> {
        let ahead = self.source.peek(2).await?;
        let width = match (ahead[0], ahead.get(1).copied()) {
            (LF, _) => 1,
            (CR, Some(LF)) => 2,
            _ => 0,
        };

        for _ in 0..width {
            self.source.read_byte().await?;
        }
        Ok(width > 0)
    }

    /// Raw bytes up to, not including, the next NUL.
    ///
    /// `None` when the body outgrows the body limit.
    async fn scan_body(&mut self) -> Result<Option<Bytes>, SourceError> {
        let mut body = BytesMut::new();
        loop {
            if self.source.peek(1).await?[0] == NUL {
                return Ok(Some(body.freeze()));
            }
            if body.len() >= self.limits.max_body_size {
                return Ok(None);
            }
            body.extend_from_slice(&[self.source.read_byte().await?]);
        }
    }

    /// Bytes up to an EOL (consumed) or a NUL (left).
    ///
    /// With `split_at_separator`, a `:` also ends the line and is left
    /// unread; otherwise it is ordinary, as in header values.
    async fn scan_line(
        &mut self,
        split_at_separator: bool,
    ) -> Result<(Bytes, Terminator), SourceError> {
        let mut line = BytesMut::new();
        loop {
            if self.scan_eol().await? {
                return Ok((line.freeze(), Terminator::Eol));
            }
            match self.source.peek(1).await?[0] {
                NUL => return Ok((line.freeze(), Terminator::Nul)),
                SEPARATOR if split_at_separator => {
                    return Ok((line.freeze(), Terminator::Separator))
                }
                _ => {}
            }
            if line.len() >= self.limits.max_line_length {
                return Ok((Bytes::new(), Terminator::Overflow));
            }
            line.extend_from_slice(&[self.source.read_byte().await?]);
        }
    }
}

fn invalid_line(terminator: Terminator) -> TokenKind {
    match terminator {
        Terminator::Overflow => TokenKind::Invalid(Malformed::LineTooLong),
        _ => TokenKind::Invalid(Malformed::UnterminatedLine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::stomp::source::StreamSource;
    use crate::protocols::stomp::test_support::chunked;

    fn lex(input: &'static [u8]) -> Lexer<StreamSource<&'static [u8]>> {
        Lexer::new(StreamSource::new(input))
    }

    async fn kinds<S: ByteSource>(lexer: &mut Lexer<S>) -> Vec<TokenKind> {
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token().await.unwrap();
            kinds.push(token.kind);
            if token.kind == TokenKind::StreamEnd {
                return kinds;
            }
        }
    }

    #[tokio::test]
    async fn test_frame_tokens() {
        let mut lexer = lex(b"SEND\ndestination:/queue/a\n\nhi\0");

        let expected = [
            (TokenKind::Command, &b"SEND"[..]),
            (TokenKind::HeaderKey, &b"destination"[..]),
            (TokenKind::HeaderValue, &b"/queue/a"[..]),
            (TokenKind::Body, &b"hi"[..]),
            (TokenKind::Delimiter, &b"\0"[..]),
            (TokenKind::StreamEnd, &b""[..]),
        ];
        for (kind, literal) in expected {
            let token = lexer.next_token().await.unwrap();
            assert_eq!(token.kind, kind);
            assert_eq!(&token.literal[..], literal);
        }
    }

    #[tokio::test]
    async fn test_crlf_lines() {
        let mut lexer = lex(b"CONNECTED\r\nversion:1.2\r\n\r\n\0");
        assert_eq!(
            kinds(&mut lexer).await,
            vec![
                TokenKind::Command,
                TokenKind::HeaderKey,
                TokenKind::HeaderValue,
                TokenKind::Body,
                TokenKind::Delimiter,
                TokenKind::StreamEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_value_keeps_colons() {
        let mut lexer = lex(b"reply-to:tcp://host:61613\n");
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::HeaderKey);

        let value = lexer.next_token().await.unwrap();
        assert_eq!(value.kind, TokenKind::HeaderValue);
        assert_eq!(&value.literal[..], b"tcp://host:61613");
    }

    #[tokio::test]
    async fn test_body_keeps_newlines() {
        let mut lexer = lex(b"\nline one\r\nline two\n\0");

        let body = lexer.next_token().await.unwrap();
        assert_eq!(body.kind, TokenKind::Body);
        assert_eq!(&body.literal[..], b"line one\r\nline two\n");
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Delimiter);
    }

    #[tokio::test]
    async fn test_bare_carriage_return() {
        let mut lexer = lex(b"\rX");
        let token = lexer.next_token().await.unwrap();
        assert_eq!(token.kind, TokenKind::Invalid(Malformed::BareCarriageReturn));
    }

    #[tokio::test]
    async fn test_unknown_verb() {
        let mut lexer = lex(b"PUBLISH\n");
        let token = lexer.next_token().await.unwrap();
        assert_eq!(token.kind, TokenKind::Invalid(Malformed::UnrecognizedLine));
        assert_eq!(&token.literal[..], b"PUBLISH");
    }

    #[tokio::test]
    async fn test_null_byte_cuts_line() {
        let mut lexer = lex(b"bad\0CONNECT\n");
        let token = lexer.next_token().await.unwrap();
        assert_eq!(token.kind, TokenKind::Invalid(Malformed::UnterminatedLine));
        assert_eq!(&token.literal[..], b"bad");
        // The null byte is still the next token
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Delimiter);
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Command);
    }

    #[tokio::test]
    async fn test_null_byte_cuts_value() {
        let mut lexer = lex(b"key:val\0");
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::HeaderKey);
        assert_eq!(
            lexer.next_token().await.unwrap().kind,
            TokenKind::Invalid(Malformed::UnterminatedLine)
        );
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Delimiter);
    }

    #[tokio::test]
    async fn test_line_limit() {
        let limits = Limits {
            max_line_length: 4,
            max_body_size: 64,
        };
        let mut lexer = Lexer::with_limits(StreamSource::new(&b"SUBSCRIBE\n"[..]), limits);
        let token = lexer.next_token().await.unwrap();
        assert_eq!(token.kind, TokenKind::Invalid(Malformed::LineTooLong));
        assert!(token.literal.is_empty());

        let mut lexer = Lexer::with_limits(StreamSource::new(&b":longvalue\n"[..]), limits);
        assert_eq!(
            lexer.next_token().await.unwrap().kind,
            TokenKind::Invalid(Malformed::LineTooLong)
        );

        // A line of exactly the limit is fine
        let mut lexer = Lexer::with_limits(StreamSource::new(&b"SEND\n"[..]), limits);
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Command);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let limits = Limits {
            max_line_length: 64,
            max_body_size: 5,
        };
        let mut lexer = Lexer::with_limits(StreamSource::new(&b"\n123456\0"[..]), limits);
        assert_eq!(
            lexer.next_token().await.unwrap().kind,
            TokenKind::Invalid(Malformed::BodyTooLarge)
        );

        let mut lexer = Lexer::with_limits(StreamSource::new(&b"\n12345\0"[..]), limits);
        let body = lexer.next_token().await.unwrap();
        assert_eq!(body.kind, TokenKind::Body);
        assert_eq!(&body.literal[..], b"12345");
    }

    #[tokio::test]
    async fn test_truncated_tokens_end_stream() {
        for input in [&b"CONNE"[..], &b":1.2"[..], &b"\nbody without end"[..]] {
            let mut lexer = Lexer::new(StreamSource::new(input));
            assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::StreamEnd);
            // Exhaustion is permanent
            assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::StreamEnd);
        }
    }

    #[tokio::test]
    async fn test_skip_blank_lines() {
        let mut lexer = lex(b"\n\r\n\n\r\nACK\n");
        lexer.skip_blank_lines().await.unwrap();
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Command);

        let mut lexer = lex(b"\n\n");
        lexer.skip_blank_lines().await.unwrap();
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::StreamEnd);
    }

    #[tokio::test]
    async fn test_skip_past_delimiter() {
        let mut lexer = lex(b"garbage\nmore\0NACK\n");
        assert!(lexer.skip_past_delimiter().await.unwrap());
        assert_eq!(lexer.next_token().await.unwrap().kind, TokenKind::Command);
        assert!(!lexer.skip_past_delimiter().await.unwrap());
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_tokens() {
        const INPUT: &[u8] = b"MESSAGE\r\nsubscription:0\nmessage-id:007\n\nsplit\r\nbody\0\n";

        let whole = kinds(&mut lex(INPUT)).await;
        let split = kinds(&mut Lexer::new(StreamSource::new(chunked(INPUT)))).await;
        assert_eq!(whole, split);
    }
}
