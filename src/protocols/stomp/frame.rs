//! Assembled STOMP frames.

use super::command::Command;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Frame headers in order of first appearance.
///
/// A repeated key overwrites the earlier value in place, so the last value
/// written wins while the key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the value it replaced.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.into(), v.into());
        }
        headers
    }
}

/// One STOMP frame: command, headers and a NUL-free body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Encode the frame to wire bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the frame into an existing buffer.
    ///
    /// Lines end with a bare LF and nothing is escaped, mirroring what the
    /// parser accepts.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.command.as_str().as_bytes());
        buf.extend_from_slice(b"\n");
        for (key, value) in self.headers.iter() {
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(b":");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\n");
        }
        buf.extend_from_slice(b"\n");
        buf.extend_from_slice(&self.body);
        buf.extend_from_slice(b"\0");
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} headers, {} body bytes)",
            self.command,
            self.headers.len(),
            self.body.len()
        )
    }
}
