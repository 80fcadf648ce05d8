//! STOMP 1.2 wire protocol.
//!
//! Frames are reconstructed incrementally from a byte stream with no
//! framing of its own:
//!
//! ```text
//! FRAME  := COMMAND EOL (KEY ':' VALUE EOL)* EOL BODY NUL
//! EOL    := '\n' | '\r\n'
//! ```
//!
//! Bytes flow one way: transport -> [`StreamSource`] -> [`Lexer`] tokens ->
//! [`FrameParser`] -> caller, one frame per call. Blank lines between frames
//! are ignored. Header text and bodies are passed through unescaped.

pub mod command;
pub mod frame;
pub mod handler;
pub mod lexer;
pub mod parser;
pub mod source;

pub use command::{Command, UnknownCommand};
pub use frame::{Frame, Headers};
pub use handler::handle_connection;
pub use lexer::{Lexer, Limits, Malformed, Token, TokenKind, MAX_BODY_SIZE, MAX_LINE_LENGTH};
pub use parser::{FrameParser, ParseError, ParserState};
pub use source::{ByteSource, SourceError, StreamSource};
