//! Text wire protocol spoken between `kvs-client` and `kvs-server`.
//!
//! A request is a single ASCII line, `GET:<key>` or `PUT:<key>:<value>`, and the
//! server answers with one newline-terminated line before closing the connection.

use std::fmt;
use std::io::{self, BufRead, ErrorKind, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{KvError, Result};

/// Default maximum key length in bytes.
pub const DEFAULT_KEY_MAX: usize = 127;
/// Default maximum value length in bytes.
pub const DEFAULT_VALUE_MAX: usize = 1023;

/// Byte limits applied to request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLimits {
    /// Maximum key length in bytes.
    pub key_max: usize,
    /// Maximum value length in bytes.
    pub value_max: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            key_max: DEFAULT_KEY_MAX,
            value_max: DEFAULT_VALUE_MAX,
        }
    }
}

/// Bytes kept of the operation token; longer than any valid operation.
const OPERATION_MAX: usize = 8;

/// A string that never exceeds its own maximum byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedString {
    inner: String,
    max: usize,
}

impl BoundedString {
    /// Builds a bounded string, truncating `s` to at most `max` bytes.
    ///
    /// Truncation backs off to the nearest character boundary.
    pub fn truncated(s: &str, max: usize) -> Self {
        let mut end = s.len().min(max);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            inner: s[..end].to_owned(),
            max,
        }
    }

    /// Returns the contents.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns the maximum length this string was built with.
    pub fn max_len(&self) -> usize {
        self.max
    }

}

impl AsRef<str> for BoundedString {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for BoundedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Operation named by the first field of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read a key.
    Get,
    /// Write a key.
    Put,
}

/// Reasons a request line was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The operation token is neither `GET` nor `PUT`.
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    /// No key (or an empty key) followed the operation.
    #[error("missing key")]
    MissingKey,
    /// A PUT without a value.
    #[error("missing value")]
    MissingValue,
    /// The message was not UTF-8.
    #[error("request is not valid UTF-8")]
    InvalidUtf8,
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Get the value for a key.
    Get {
        /// The key to look up.
        key: BoundedString,
    },
    /// Store a value under a key.
    Put {
        /// The key to write.
        key: BoundedString,
        /// The value to associate with the key.
        value: BoundedString,
    },
}

impl Request {
    /// Builds a GET request, truncating the key to `limits`.
    pub fn get(key: &str, limits: &FieldLimits) -> Self {
        Request::Get {
            key: BoundedString::truncated(key, limits.key_max),
        }
    }

    /// Builds a PUT request, truncating key and value to `limits`.
    pub fn put(key: &str, value: &str, limits: &FieldLimits) -> Self {
        Request::Put {
            key: BoundedString::truncated(key, limits.key_max),
            value: BoundedString::truncated(value, limits.value_max),
        }
    }

    /// Parses a raw request message.
    ///
    /// One trailing newline (optionally preceded by `\r`) is ignored. Fields past
    /// the ones an operation needs are ignored, so a value never contains `:`.
    pub fn parse(input: &[u8], limits: &FieldLimits) -> std::result::Result<Self, ParseError> {
        let input = std::str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)?;
        let input = input.strip_suffix('\n').unwrap_or(input);
        let input = input.strip_suffix('\r').unwrap_or(input);

        let mut fields = input.split(':');
        let operation = match fields.next() {
            Some("GET") => Operation::Get,
            Some("PUT") => Operation::Put,
            Some(other) => return Err(ParseError::UnknownOperation(other.to_owned())),
            None => return Err(ParseError::UnknownOperation(String::new())),
        };

        let key = match fields.next() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(ParseError::MissingKey),
        };

        match operation {
            Operation::Get => Ok(Request::get(key, limits)),
            Operation::Put => match fields.next() {
                Some(value) if !value.is_empty() => Ok(Request::put(key, value, limits)),
                _ => Err(ParseError::MissingValue),
            },
        }
    }

    /// Returns the operation of this request.
    pub fn operation(&self) -> Operation {
        match self {
            Request::Get { .. } => Operation::Get,
            Request::Put { .. } => Operation::Put,
        }
    }

    /// Returns the key this request targets.
    pub fn key(&self) -> &str {
        match self {
            Request::Get { key } | Request::Put { key, .. } => key.as_str(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Get { key } => write!(f, "GET:{key}"),
            Request::Put { key, value } => write!(f, "PUT:{key}:{value}"),
        }
    }
}

/// Response sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The value was stored.
    PutOk,
    /// The store reported a failure for a PUT.
    PutError,
    /// The key was found.
    GetOk(String),
    /// The key was not found, or the store failed.
    GetError,
    /// The request could not be parsed.
    FormatError,
    /// The operation token was not recognized.
    UnknownOperation,
}

impl Response {
    /// Parses a response line received from the server.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let response = match line {
            "PUT OK" => Response::PutOk,
            "PUT ERROR" => Response::PutError,
            "GET ERROR" => Response::GetError,
            "FORMAT ERROR" => Response::FormatError,
            "UNKNOWN OPERATION" => Response::UnknownOperation,
            other => match other.strip_prefix("GET OK: ") {
                Some(value) => Response::GetOk(value.to_owned()),
                None => return Err(KvError::UnexpectedResponse(line.to_owned())),
            },
        };
        Ok(response)
    }

    /// Returns `true` for `PUT OK` and `GET OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::PutOk | Response::GetOk(_))
    }

    /// Writes the newline-terminated response and flushes the writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{self}")?;
        writer.flush()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::PutOk => f.write_str("PUT OK"),
            Response::PutError => f.write_str("PUT ERROR"),
            Response::GetOk(value) => write!(f, "GET OK: {value}"),
            Response::GetError => f.write_str("GET ERROR"),
            Response::FormatError => f.write_str("FORMAT ERROR"),
            Response::UnknownOperation => f.write_str("UNKNOWN OPERATION"),
        }
    }
}

/// Reads one request message from a connection.
///
/// A message ends at the first `\n`, at end of stream, or at a read timeout once
/// some bytes have arrived. Every field is capped at its own limit while
/// reading: the operation token, the key at `key_max` bytes and the value at
/// `value_max` bytes. The excess of a field is consumed and dropped, and a cut
/// that splits a UTF-8 character backs off to the character boundary. Fields
/// after the value are dropped. Returns `Ok(None)` when the peer closed without
/// sending anything.
pub fn read_message<R: BufRead>(
    reader: &mut R,
    limits: &FieldLimits,
) -> io::Result<Option<Vec<u8>>> {
    let mut fields = FieldCollector::new(limits);
    let mut received = 0usize;

    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e)
                if received > 0
                    && matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                break;
            }
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.map_or(available.len(), |pos| pos + 1);
        fields.extend(&available[..newline.unwrap_or(take)]);
        received += take;
        reader.consume(take);

        if newline.is_some() {
            break;
        }
    }

    if received == 0 {
        Ok(None)
    } else {
        Ok(Some(fields.finish()))
    }
}

/// Splits an incoming message on `:` and keeps a bounded prefix of the
/// operation, key and value fields.
struct FieldCollector {
    fields: [Vec<u8>; 3],
    caps: [usize; 3],
    clipped: [bool; 3],
    current: usize,
}

impl FieldCollector {
    fn new(limits: &FieldLimits) -> Self {
        Self {
            fields: Default::default(),
            caps: [OPERATION_MAX, limits.key_max, limits.value_max],
            clipped: [false; 3],
            current: 0,
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b':' {
                self.current += 1;
                continue;
            }
            let Some(field) = self.fields.get_mut(self.current) else {
                continue;
            };
            if field.len() < self.caps[self.current] {
                field.push(b);
            } else {
                self.clipped[self.current] = true;
            }
        }
    }

    fn finish(self) -> Vec<u8> {
        let last = self.current.min(self.fields.len() - 1);
        let mut message = Vec::new();
        for (i, field) in self.fields.iter().enumerate().take(last + 1) {
            if i > 0 {
                message.push(b':');
            }
            let len = if self.clipped[i] {
                complete_utf8_prefix(field)
            } else {
                field.len()
            };
            message.extend_from_slice(&field[..len]);
        }
        message
    }
}

/// Length of `bytes` without a trailing, incomplete UTF-8 sequence.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}
