//! # Chat Relay Server
//!
//! Session and dispatch layer of the relay: accept loops for the stream and
//! datagram transports, the per-connection protocol loop, and the message
//! cache shared by every session.
//!
//! - [`server`] owns the sockets and the running/stopped lifecycle.
//! - [`session`] runs one stream connection until it quits or fails.
//! - [`datagram`] answers refresh requests arriving as single packets.
//! - [`cache`] holds the conversation and swaps it atomically on refresh.
//! - [`gateway`] moves blocking store calls off the async workers.
//! - [`telemetry`] installs the stderr and optional file log sinks.

pub mod cache;
pub mod config;
pub mod datagram;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod server;
pub mod session;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{ServerError, SessionError};
pub use server::{BoundAddrs, Server, ServerState};
