//! # Relay Error Types
//!
//! ## Design Principles
//!
//! 1. **Typed Failures**: Each layer owns a `thiserror` enum; callers match on
//!    variants instead of parsing messages.
//! 2. **Categorized**: Every error maps onto a coarse category so session and
//!    accept loops can decide between "log and continue" and "tear down".
//! 3. **No Error Frames**: Clients never see these values; a failure surfaces
//!    as a negative payload or a closed connection.

use thiserror::Error;

/// Result type used by the frame codec.
pub type FrameResult<T> = core::result::Result<T, FrameError>;

/// High-level category shared by every error in the relay.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Unknown commands in an otherwise well-formed frame.
    Protocol,
    /// A known command whose payload failed to deserialize.
    Payload,
    /// Socket resets, closed listeners, short reads.
    Transport,
    /// Persistence backend failures.
    Store,
    /// Failures before the server reaches `Running`.
    Startup,
}

impl ErrorCategory {
    /// Returns true if a session may keep reading after this kind of error.
    pub const fn is_session_fatal(self) -> bool {
        !matches!(self, Self::Protocol)
    }
}

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The payload contains a raw newline and would split the frame.
    #[error("payload contains an embedded newline")]
    EmbeddedNewline,
    /// The header code does not fit in three decimal digits / one byte.
    #[error("header code {0} does not fit in a byte")]
    HeaderOutOfRange(u16),
    /// The first three characters are not a decimal number.
    #[error("malformed header {0:?}")]
    MalformedHeader(String),
    /// The header is a valid byte but maps to no known command.
    #[error("unknown header code {0:03}")]
    UnknownHeader(u8),
}

impl FrameError {
    /// Returns the coarse category of the error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownHeader(_) => ErrorCategory::Protocol,
            // Unparseable headers cannot be resynchronised on this stream.
            Self::EmbeddedNewline | Self::HeaderOutOfRange(_) | Self::MalformedHeader(_) => {
                ErrorCategory::Transport
            }
        }
    }

    /// Returns true if the session should log the frame and keep going.
    pub const fn is_recoverable(&self) -> bool {
        !self.category().is_session_fatal()
    }
}
