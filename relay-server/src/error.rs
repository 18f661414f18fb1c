//! Error types for the server lifecycle and its per-connection handlers.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use relay_common::{ErrorCategory, FrameError};
use relay_store::StoreError;

use crate::server::ServerState;

/// Failures that keep the server from reaching `Running`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {transport} socket on {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("initial message history could not be loaded from the store")]
    InitialLoad,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("server cannot start while {0:?}")]
    NotStopped(ServerState),
}

impl ServerError {
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(err) => err.category(),
            _ => ErrorCategory::Startup,
        }
    }
}

/// Reason a session ended abnormally. Logged by the session task only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("bad payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) => ErrorCategory::Transport,
            Self::Frame(err) => err.category(),
            Self::Payload(_) => ErrorCategory::Payload,
        }
    }
}

/// Failure while answering a single datagram.
#[derive(Debug, Error)]
pub enum DatagramError {
    #[error("packet is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to serialize snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to send reply: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("message cache was already loaded")]
    AlreadyLoaded,
}
