//! # Frame Codec
//!
//! Purpose: Encode and decode the newline-terminated frames exchanged over
//! both the stream and the datagram transport.
//!
//! ## Design Principles
//!
//! 1. **Fixed-Width Header**: Requests start with a 3-digit, zero-padded
//!    decimal command code so a reader never has to scan for a delimiter.
//! 2. **Opaque Payloads**: The codec never inspects the payload; JSON
//!    helpers are layered on top for the callers that want them.
//! 3. **Framing Safety**: A payload with a raw newline is rejected at encode
//!    time rather than corrupting the stream.
//! 4. **End-of-Stream Is Not an Error**: An empty line decodes to `None`.
//!
//! ## Frame Layout
//!
//! ```text
//! Query:
//! +-----------+-----------------+----+
//! | header:3B | payload (UTF-8) | \n |
//! +-----------+-----------------+----+
//!
//! Response:
//! +-----------------+----+
//! | payload (UTF-8) | \n |
//! +-----------------+----+
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{FrameError, FrameResult};

/// Width of the decimal header segment of a query frame.
pub const HEADER_LEN: usize = 3;

/// Frame terminator for both directions.
pub const FRAME_DELIMITER: char = '\n';

/// Command carried in the header of a query frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryHeader {
    /// Placeholder command; servers ignore it like any unknown code.
    None = 0,
    /// Check a nickname/password pair.
    SignIn = 1,
    /// Register a new nickname/password pair.
    SignUp = 2,
    /// Append a message to the conversation.
    PostMessage = 3,
    /// Fetch the full conversation.
    UpdateChat = 4,
    /// End the session without a response.
    Quit = 10,
}

impl QueryHeader {
    /// Every header the protocol defines, in code order.
    pub const ALL: [QueryHeader; 6] = [
        Self::None,
        Self::SignIn,
        Self::SignUp,
        Self::PostMessage,
        Self::UpdateChat,
        Self::Quit,
    ];

    /// Returns the numeric wire code.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a numeric wire code into a header.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::SignIn),
            2 => Some(Self::SignUp),
            3 => Some(Self::PostMessage),
            4 => Some(Self::UpdateChat),
            10 => Some(Self::Quit),
            _ => None,
        }
    }
}

/// A decoded request frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    header: QueryHeader,
    payload: String,
}

impl Query {
    /// Builds a query with an explicit payload.
    pub fn new(header: QueryHeader, payload: impl Into<String>) -> Self {
        Query {
            header,
            payload: payload.into(),
        }
    }

    /// Builds a query that carries no payload.
    pub fn bare(header: QueryHeader) -> Self {
        Query::new(header, String::new())
    }

    /// Builds a query whose payload is the JSON form of `value`.
    pub fn json<T: Serialize>(header: QueryHeader, value: &T) -> serde_json::Result<Self> {
        Ok(Query::new(header, serde_json::to_string(value)?))
    }

    pub fn header(&self) -> QueryHeader {
        self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Deserializes the payload as JSON.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }

    /// Encodes this query into a wire frame.
    pub fn encode(&self) -> FrameResult<String> {
        encode_query(self.header, &self.payload)
    }
}

/// A response frame: a payload with no header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: String,
}

impl Response {
    pub fn new(payload: impl Into<String>) -> Self {
        Response {
            payload: payload.into(),
        }
    }

    /// Builds a response whose payload is the JSON form of `value`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        Ok(Response::new(serde_json::to_string(value)?))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Deserializes the payload as JSON.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.payload)
    }

    /// Encodes this response into a wire frame.
    pub fn encode(&self) -> FrameResult<String> {
        encode_response(&self.payload)
    }
}

/// Encodes a query frame: `<3-digit header><payload>\n`.
pub fn encode_query(header: QueryHeader, payload: &str) -> FrameResult<String> {
    encode_raw_query(u16::from(header.as_u8()), payload)
}

/// Encodes a query frame for an arbitrary numeric code.
///
/// Used by clients that need to send codes outside [`QueryHeader`]; fails
/// with `HeaderOutOfRange` when the code does not fit in a byte.
pub fn encode_raw_query(code: u16, payload: &str) -> FrameResult<String> {
    if code > u16::from(u8::MAX) {
        return Err(FrameError::HeaderOutOfRange(code));
    }
    ensure_single_line(payload)?;

    let mut frame = String::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.push_str(&format!("{code:03}"));
    frame.push_str(payload);
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Decodes a raw line into a query.
///
/// Returns `Ok(None)` for an empty line, which callers treat as the peer
/// closing the stream. A trailing newline is optional.
pub fn decode_query(raw: &str) -> FrameResult<Option<Query>> {
    let line = strip_delimiter(raw);
    if line.is_empty() {
        return Ok(None);
    }

    let (digits, payload) = match (line.get(..HEADER_LEN), line.get(HEADER_LEN..)) {
        (Some(digits), Some(payload)) => (digits, payload),
        _ => return Err(FrameError::MalformedHeader(line.to_string())),
    };
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::MalformedHeader(digits.to_string()));
    }

    let code: u16 = digits
        .parse()
        .map_err(|_| FrameError::MalformedHeader(digits.to_string()))?;
    let code = u8::try_from(code).map_err(|_| FrameError::HeaderOutOfRange(code))?;
    let header = QueryHeader::from_code(code).ok_or(FrameError::UnknownHeader(code))?;

    Ok(Some(Query::new(header, payload)))
}

/// Encodes a response frame: `<payload>\n`.
pub fn encode_response(payload: &str) -> FrameResult<String> {
    ensure_single_line(payload)?;
    let mut frame = String::with_capacity(payload.len() + 1);
    frame.push_str(payload);
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Decodes a raw line into a response; `None` on an empty line.
pub fn decode_response(raw: &str) -> Option<Response> {
    let line = strip_delimiter(raw);
    if line.is_empty() {
        return None;
    }
    Some(Response::new(line))
}

/// Strips one trailing `\n`, then one `\r` so CRLF peers decode the same.
fn strip_delimiter(raw: &str) -> &str {
    let line = raw.strip_suffix(FRAME_DELIMITER).unwrap_or(raw);
    line.strip_suffix('\r').unwrap_or(line)
}

fn ensure_single_line(payload: &str) -> FrameResult<()> {
    if payload.contains(FRAME_DELIMITER) {
        return Err(FrameError::EmbeddedNewline);
    }
    Ok(())
}
