//! Frame assembly.
//!
//! Pulls tokens from the [`Lexer`] in the fixed order
//! `Command (HeaderKey HeaderValue)* Body Delimiter` and yields one
//! [`Frame`] per call.

use super::command::Command;
use super::frame::{Frame, Headers};
use super::lexer::{Lexer, Limits, Malformed, Token, TokenKind};
use super::source::{ByteSource, SourceError, StreamSource};
use bytes::Bytes;
use std::fmt;
use std::io;
use tokio::io::AsyncRead;
use tracing::{debug, trace};

/// Grammar position of a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// At a frame boundary; blank lines are skipped before the command
    AwaitingCommand,
    /// After the command or a header pair
    AwaitingHeaderOrBody,
    /// A token other than a header key was fetched and must be the body
    AwaitingBody,
    AwaitingDelimiter,
    /// A frame failed mid-way; the cursor is somewhere inside it
    Desynchronized,
    /// The transport is exhausted or broken. Absorbing.
    AtStreamEnd,
}

/// Structural and transport failures while parsing a frame
#[derive(Debug)]
pub enum ParseError {
    /// First token of a frame was not a command
    MissingCommand { found: TokenKind },
    /// Command line names no known verb
    UnknownCommand(String),
    /// Header key not followed by a value (the value line was cut by a
    /// null byte or was oversized)
    MissingHeaderValue { key: String, found: TokenKind },
    /// Headers not followed by a body
    MissingBody { found: TokenKind },
    /// Body not followed by the null byte.
    ///
    /// The lexer ends a body only at a null byte, so this is unreachable
    /// with [`Lexer`]; it guards the grammar position.
    MissingDelimiter { found: TokenKind },
    /// A command or header line exceeded the line limit
    LineTooLong { limit: usize },
    /// A body exceeded the body limit
    BodyTooLarge { limit: usize },
    /// Header text is not UTF-8
    InvalidHeaderEncoding,
    /// The peer sent nothing within the read timeout
    TimedOut,
    /// The transport failed
    Io(io::Error),
}

impl ParseError {
    /// The token that failed the frame was its delimiter, so the stream is
    /// already at the next frame boundary.
    fn ended_at_delimiter(&self) -> bool {
        matches!(
            self,
            ParseError::MissingCommand {
                found: TokenKind::Delimiter
            } | ParseError::MissingHeaderValue {
                found: TokenKind::Delimiter,
                ..
            } | ParseError::MissingBody {
                found: TokenKind::Delimiter
            }
        )
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to parse STOMP frame: ")?;
        match self {
            ParseError::MissingCommand { found } => {
                write!(f, "frame must begin with a command, found {}", found)
            }
            ParseError::UnknownCommand(verb) => write!(f, "unknown command {:?}", verb),
            ParseError::MissingHeaderValue { key, found } => {
                write!(f, "header {:?} must have a value, found {}", key, found)
            }
            ParseError::MissingBody { found } => {
                write!(f, "frame must contain a body, found {}", found)
            }
            ParseError::MissingDelimiter { found } => {
                write!(f, "frame must end with a null byte, found {}", found)
            }
            ParseError::LineTooLong { limit } => {
                write!(f, "line longer than {} bytes", limit)
            }
            ParseError::BodyTooLarge { limit } => {
                write!(f, "body larger than {} bytes", limit)
            }
            ParseError::InvalidHeaderEncoding => write!(f, "header is not valid UTF-8"),
            ParseError::TimedOut => write!(f, "timed out waiting for data"),
            ParseError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SourceError> for ParseError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::TimedOut => ParseError::TimedOut,
            SourceError::Io(e) => ParseError::Io(e),
            SourceError::Exhausted => ParseError::Io(io::ErrorKind::UnexpectedEof.into()),
        }
    }
}

/// Incremental STOMP frame parser.
///
/// One parser per connection. Each call to [`next_frame`](Self::next_frame)
/// consumes exactly one frame from the source.
pub struct FrameParser<S> {
    lexer: Lexer<S>,
    state: ParserState,
}

impl<R: AsyncRead + Unpin> FrameParser<StreamSource<R>> {
    /// Parse frames read from `reader`
    pub fn from_reader(reader: R) -> Self {
        Self::new(StreamSource::new(reader))
    }
}

impl<S: ByteSource> FrameParser<S> {
    pub fn new(source: S) -> Self {
        Self::with_limits(source, Limits::default())
    }

    /// Parser whose lines and bodies are capped by `limits`
    pub fn with_limits(source: S, limits: Limits) -> Self {
        Self {
            lexer: Lexer::with_limits(source, limits),
            state: ParserState::AwaitingCommand,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Parse the next frame.
    ///
    /// Blank lines before the command are skipped on every call, including
    /// the first frame of the stream and a call made after an error without
    /// [`resync`](Self::resync).
    ///
    /// Returns `Ok(None)` once the stream is exhausted, and on every call
    /// after that. A frame cut short by the end of the stream is dropped.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        if self.state == ParserState::AtStreamEnd {
            return Ok(None);
        }

        self.state = ParserState::AwaitingCommand;
        match self.assemble().await {
            Ok(Some(frame)) => {
                trace!(command = %frame.command, "Parsed frame");
                self.state = ParserState::AwaitingCommand;
                Ok(Some(frame))
            }
            Ok(None) => {
                if self.state != ParserState::AwaitingCommand {
                    debug!(position = ?self.state, "Dropping frame truncated by end of stream");
                }
                self.state = ParserState::AtStreamEnd;
                Ok(None)
            }
            Err(e @ (ParseError::TimedOut | ParseError::Io(_))) => {
                self.state = ParserState::AtStreamEnd;
                Err(e)
            }
            Err(e) => {
                self.state = if e.ended_at_delimiter() {
                    ParserState::AwaitingCommand
                } else {
                    ParserState::Desynchronized
                };
                Err(e)
            }
        }
    }

    /// Realign with the frame boundary after a parse error.
    ///
    /// When desynchronized, bytes are discarded up to and including the next
    /// null byte. Returns `false` if the stream ended instead.
    pub async fn resync(&mut self) -> Result<bool, ParseError> {
        match self.state {
            ParserState::AtStreamEnd => Ok(false),
            ParserState::Desynchronized => {
                if self.lexer.skip_past_delimiter().await? {
                    self.state = ParserState::AwaitingCommand;
                    Ok(true)
                } else {
                    self.state = ParserState::AtStreamEnd;
                    Ok(false)
                }
            }
            _ => Ok(true),
        }
    }

    /// Next token, with oversized lines and bodies turned into errors
    async fn next_token(&mut self) -> Result<Token, ParseError> {
        let token = self.lexer.next_token().await?;
        let limits = self.lexer.limits();
        match token.kind {
            TokenKind::Invalid(Malformed::LineTooLong) => Err(ParseError::LineTooLong {
                limit: limits.max_line_length,
            }),
            TokenKind::Invalid(Malformed::BodyTooLarge) => Err(ParseError::BodyTooLarge {
                limit: limits.max_body_size,
            }),
            _ => Ok(token),
        }
    }

    async fn assemble(&mut self) -> Result<Option<Frame>, ParseError> {
        self.lexer.skip_blank_lines().await?;

        let token = self.next_token().await?;
        let command = match token.kind {
            TokenKind::Command => Command::from_bytes(&token.literal)
                .ok_or_else(|| ParseError::UnknownCommand(lossy(&token.literal)))?,
            TokenKind::Invalid(Malformed::UnrecognizedLine) => {
                return Err(ParseError::UnknownCommand(lossy(&token.literal)))
            }
            TokenKind::StreamEnd => return Ok(None),
            found => return Err(ParseError::MissingCommand { found }),
        };
        self.state = ParserState::AwaitingHeaderOrBody;

        let mut headers = Headers::new();
        let mut token = self.next_token().await?;
        while token.kind == TokenKind::HeaderKey {
            let key = header_text(token.literal)?;

            let value = self.next_token().await?;
            match value.kind {
                TokenKind::HeaderValue => {}
                TokenKind::StreamEnd => return Ok(None),
                found => return Err(ParseError::MissingHeaderValue { key, found }),
            }
            headers.insert(key, header_text(value.literal)?);

            token = self.next_token().await?;
        }
        self.state = ParserState::AwaitingBody;

        let body = match token.kind {
            TokenKind::Body => token.literal,
            TokenKind::StreamEnd => return Ok(None),
            found => return Err(ParseError::MissingBody { found }),
        };
        self.state = ParserState::AwaitingDelimiter;

        let token = self.next_token().await?;
        match token.kind {
            TokenKind::Delimiter => {}
            TokenKind::StreamEnd => return Ok(None),
            found => return Err(ParseError::MissingDelimiter { found }),
        }

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

fn header_text(literal: Bytes) -> Result<String, ParseError> {
    String::from_utf8(literal.to_vec()).map_err(|_| ParseError::InvalidHeaderEncoding)
}

fn lossy(literal: &[u8]) -> String {
    String::from_utf8_lossy(literal).into_owned()
}
