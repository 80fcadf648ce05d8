//! Buffered lookahead over a byte transport.
//!
//! The lexer only ever sees `peek` and `read_byte`. However the transport
//! splits its reads, `peek(n)` keeps reading until `n` bytes are buffered or
//! the transport is done, so token rules never observe fragmentation.

use bytes::{Buf, BytesMut};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes reserved ahead of each transport read
const READ_CHUNK: usize = 4 * 1024;

/// Errors raised while pulling bytes from a source
#[derive(Debug)]
pub enum SourceError {
    /// The transport has no more bytes and the buffer is empty
    Exhausted,
    /// No bytes arrived within the read timeout
    TimedOut,
    /// The transport failed
    Io(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Exhausted => write!(f, "Byte stream exhausted"),
            SourceError::TimedOut => write!(f, "Timed out waiting for bytes"),
            SourceError::Io(e) => write!(f, "Read failed: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<io::Error> for SourceError {
    fn from(e: io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// A byte producer with non-consuming lookahead.
///
/// `peek` never moves the cursor; `read_byte` moves it by exactly one.
#[allow(async_fn_in_trait)]
pub trait ByteSource {
    /// Return up to `n` bytes at the cursor without consuming them.
    ///
    /// Fewer than `n` bytes come back only when the transport is exhausted.
    /// Fails with [`SourceError::Exhausted`] when no bytes remain at all.
    async fn peek(&mut self, n: usize) -> Result<&[u8], SourceError>;

    /// Consume and return the byte at the cursor.
    async fn read_byte(&mut self) -> Result<u8, SourceError>;
}

/// [`ByteSource`] over any tokio reader.
pub struct StreamSource<R> {
    reader: R,
    buffer: BytesMut,
    read_timeout: Option<Duration>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            read_timeout: None,
            eof: false,
        }
    }

    /// Bound how long a single transport read may wait for bytes
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Number of bytes read from the transport but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read once from the transport into the buffer.
    ///
    /// EOF is latched: after the transport returns zero bytes it is never
    /// polled again.
    async fn fill(&mut self) -> Result<usize, SourceError> {
        if self.eof {
            return Ok(0);
        }

        self.buffer.reserve(READ_CHUNK);
        let read = self.reader.read_buf(&mut self.buffer);
        let n = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| SourceError::TimedOut)??,
            None => read.await?,
        };

        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> ByteSource for StreamSource<R> {
    async fn peek(&mut self, n: usize) -> Result<&[u8], SourceError> {
        while self.buffer.len() < n && !self.eof {
            self.fill().await?;
        }

        if self.buffer.is_empty() {
            return Err(SourceError::Exhausted);
        }
        let end = n.min(self.buffer.len());
        Ok(&self.buffer[..end])
    }

    async fn read_byte(&mut self) -> Result<u8, SourceError> {
        while self.buffer.is_empty() && !self.eof {
            self.fill().await?;
        }

        if self.buffer.is_empty() {
            return Err(SourceError::Exhausted);
        }
        let byte = self.buffer[0];
        self.buffer.advance(1);
        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::stomp::test_support::chunked;

    #[tokio::test]
    async fn test_peek_does_not_advance() {
        let mut source = StreamSource::new(&b"abc"[..]);

        assert_eq!(source.peek(2).await.unwrap(), b"ab");
        assert_eq!(source.peek(2).await.unwrap(), b"ab");
        assert_eq!(source.read_byte().await.unwrap(), b'a');
        assert_eq!(source.peek(2).await.unwrap(), b"bc");
    }

    #[tokio::test]
    async fn test_peek_spans_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(b"a")
            .read(b"b")
            .read(b"cd")
            .build();
        let mut source = StreamSource::new(reader);

        assert_eq!(source.peek(3).await.unwrap(), b"abc");
        assert_eq!(source.buffered(), 4);
        for expected in b"abcd" {
            assert_eq!(source.read_byte().await.unwrap(), *expected);
        }
        assert!(matches!(source.peek(1).await, Err(SourceError::Exhausted)));
    }

    #[tokio::test]
    async fn test_short_peek_at_end() {
        let mut source = StreamSource::new(chunked(b"\n"));

        assert_eq!(source.peek(2).await.unwrap(), b"\n");
        assert_eq!(source.read_byte().await.unwrap(), b'\n');
        assert!(matches!(source.peek(2).await, Err(SourceError::Exhausted)));
        assert!(matches!(source.read_byte().await, Err(SourceError::Exhausted)));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        // Keep the writer alive so the read blocks instead of hitting EOF
        let (reader, _writer) = tokio::io::duplex(64);
        let mut source =
            StreamSource::new(reader).with_read_timeout(Some(Duration::from_millis(20)));

        assert!(matches!(source.peek(1).await, Err(SourceError::TimedOut)));
    }

    #[test]
    fn test_blocking_use() {
        let mut source = StreamSource::new(&b"xy"[..]);
        let byte = tokio_test::block_on(source.read_byte()).unwrap();
        assert_eq!(byte, b'x');
        assert_eq!(tokio_test::block_on(source.peek(8)).unwrap(), b"y");
    }
}
