//! # Store Gateway Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: Persistence sits behind a trait so the relay can
//!    run against SQLite in production and an in-memory table in tests.
//! 2. **Soft Failures**: Only `connect` reports a typed error. Every other
//!    operation folds backend failures into `false` / `None`, so callers
//!    cannot (and need not) tell "not found" from "store unavailable".
//! 3. **Shared Handle**: Implementations are `Send + Sync` and safe to call
//!    from many sessions at once.
//! 4. **Blocking API**: Calls are synchronous; async callers move them onto
//!    a blocking pool.

use thiserror::Error;

use relay_common::{ErrorCategory, Message, User};

/// Result type for store connection management.
pub type StoreResult<T> = core::result::Result<T, StoreError>;

/// Errors surfaced by [`ChatStore::connect`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or opened.
    #[error("failed to connect to store: {0}")]
    Connection(String),
    /// An operation needed a connection that was never opened.
    #[error("store is not connected")]
    NotConnected,
    /// The backend rejected a statement.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Store
    }
}

/// Strategy pattern: persistence operations consumed by the relay core.
pub trait ChatStore: Send + Sync {
    /// Opens the backend connection. Calling it again is a no-op.
    fn connect(&self) -> StoreResult<()>;

    /// Returns true if the exact nickname/password pair exists.
    ///
    /// Any lookup failure also returns false.
    fn user_exists(&self, user: &User) -> bool;

    /// Creates a user. Returns false on a duplicate nickname or any failure.
    fn create_user(&self, user: &User) -> bool;

    /// Returns every message ordered by `posted_at` ascending.
    ///
    /// `None` means the load failed, which is distinct from an empty history.
    fn all_messages(&self) -> Option<Vec<Message>>;

    /// Appends a message. Returns false if it was not stored.
    fn post_message(&self, message: &Message) -> bool;

    /// Releases the connection. Idempotent.
    fn disconnect(&self);
}
