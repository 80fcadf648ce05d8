//! Protocol implementations.
//!
//! - `stomp`: STOMP 1.2 frame parsing and the per-connection handler

pub mod stomp;
