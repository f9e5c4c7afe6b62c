//! Inbound command frames and outbound reply frames.
//!
//! A station sends one command per line:
//!
//! ```text
//! HELO <station-guid>
//! SIZE <byte-count>
//! DATA <payload-as-text>
//! FINI
//! ```
//!
//! The command token and its parameter are separated by a single space. The
//! server answers with `ACK`, `NAK` or, on termination, `FINI`.
//!
//! # Example
//!
//! ```
//! use envtrack_ingest::protocol::{Command, Frame};
//!
//! let frame = Frame::parse(b"SIZE 42");
//!
//! assert_eq!(frame.command, Command::Size);
//! assert_eq!(frame.param(), "42");
//! ```

use std::fmt;

/// Command token of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo,
    Size,
    Data,
    Fini,
    /// Anything else, kept verbatim for logging.
    Unknown(String),
}

impl Command {
    fn from_token(token: &str) -> Self {
        match token {
            "HELO" => Command::Helo,
            "SIZE" => Command::Size,
            "DATA" => Command::Data,
            "FINI" => Command::Fini,
            other => Command::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Helo => f.write_str("HELO"),
            Command::Size => f.write_str("SIZE"),
            Command::Data => f.write_str("DATA"),
            Command::Fini => f.write_str("FINI"),
            Command::Unknown(token) => write!(f, "{:?}", token),
        }
    }
}

/// A complete inbound frame (delimiter already removed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Text after the first space, if any.
    pub param: Option<String>,
}

impl Frame {
    /// Parse one line without its terminating delimiter.
    ///
    /// A single trailing `\r` is dropped so CRLF stations are accepted.
    /// Invalid UTF-8 is replaced rather than rejected; such a frame simply
    /// fails authentication or length checks later on.
    pub fn parse(line: &[u8]) -> Self {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);

        match text.split_once(' ') {
            Some((command, param)) => Self {
                command: Command::from_token(command),
                param: Some(param.to_string()),
            },
            None => Self {
                command: Command::from_token(&text),
                param: None,
            },
        }
    }

    /// Parameter text, empty if absent.
    #[inline]
    pub fn param(&self) -> &str {
        self.param.as_deref().unwrap_or("")
    }

    /// Parameter length in characters, as negotiated by SIZE.
    #[inline]
    pub fn param_len(&self) -> usize {
        self.param().chars().count()
    }
}

/// Server-to-station reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nak,
    /// Terminal frame, followed by connection close.
    Fini,
}

impl Reply {
    /// Wire encoding including the line terminator.
    #[inline]
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Reply::Ack => b"ACK\n",
            Reply::Nak => b"NAK\n",
            Reply::Fini => b"FINI\n",
        }
    }

    /// Encoded length in bytes.
    #[inline]
    pub fn encoded_len(self) -> usize {
        self.as_bytes().len()
    }
}
