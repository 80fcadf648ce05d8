//! STOMP connection handler.
//!
//! Drives a [`FrameParser`] over one connection and logs what arrives.
//! Session semantics (handshake, subscriptions, receipts) are not
//! implemented; frames are only observed.

use super::parser::{FrameParser, ParseError};
use super::source::StreamSource;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, trace, warn};

/// Handle a single client connection until the peer closes it.
///
/// Malformed frames are logged and skipped by resynchronizing on the next
/// null byte. Returns the number of frames parsed; timeouts and transport
/// failures end the connection with an error.
pub async fn handle_connection<R: AsyncRead + Unpin>(
    reader: R,
    peer: SocketAddr,
    read_timeout: Option<Duration>,
) -> Result<u64, ParseError> {
    info!(peer = %peer, "Handling incoming connection");

    let source = StreamSource::new(reader).with_read_timeout(read_timeout);
    let mut parser = FrameParser::new(source);
    let mut frames = 0u64;

    loop {
        match parser.next_frame().await {
            Ok(Some(frame)) => {
                frames += 1;
                debug!(
                    peer = %peer,
                    command = %frame.command,
                    headers = frame.headers.len(),
                    body_len = frame.body.len(),
                    "Received frame"
                );
                for (key, value) in frame.headers.iter() {
                    trace!(peer = %peer, key, value, "Frame header");
                }
                if frame.command.is_server_command() {
                    warn!(peer = %peer, command = %frame.command, "Client sent a server frame");
                }
            }
            Ok(None) => {
                debug!(peer = %peer, frames, "Connection closed by client");
                return Ok(frames);
            }
            Err(e @ (ParseError::TimedOut | ParseError::Io(_))) => return Err(e),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Parse error");
                if !parser.resync().await? {
                    debug!(peer = %peer, frames, "Connection closed while resynchronizing");
                    return Ok(frames);
                }
            }
        }
    }
}
