// relay-common - Shared wire types and frame codec for the chat relay
//
// This crate defines the line protocol spoken by the server and its clients

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
