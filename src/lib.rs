//! skewserver: a STOMP 1.2 compatible message queueing server.
//!
//! The heart of the crate is an incremental STOMP frame parser that
//! reconstructs frames from a byte stream however its reads are split:
//!
//! ```no_run
//! use skewserver::protocols::stomp::FrameParser;
//!
//! # async fn demo(stream: tokio::net::TcpStream) -> Result<(), Box<dyn std::error::Error>> {
//! let mut parser = FrameParser::from_reader(stream);
//! while let Some(frame) = parser.next_frame().await? {
//!     println!("{}", frame);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Around it sit a TCP accept loop spawning one task per connection and
//! CLI/TOML configuration.

pub mod config;
pub mod protocols;
pub mod server;
