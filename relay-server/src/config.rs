//! Server configuration: command-line flags with environment fallbacks.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use relay_store::{ChatStore, MemoryStore, SqliteStore};

/// Default port for session (stream) traffic.
pub const DEFAULT_STREAM_PORT: u16 = 8888;

/// Default port for refresh-only (datagram) traffic.
pub const DEFAULT_DATAGRAM_PORT: u16 = 5555;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about = "Chat relay server", long_about = None)]
pub struct ServerConfig {
    /// Address for the session listener.
    #[arg(long, env = "RELAY_STREAM_ADDR", default_value = "0.0.0.0:8888")]
    pub stream_addr: SocketAddr,

    /// Address for the refresh datagram socket.
    #[arg(long, env = "RELAY_DATAGRAM_ADDR", default_value = "0.0.0.0:5555")]
    pub datagram_addr: SocketAddr,

    /// SQLite database file. Messages and users are kept in memory when unset.
    #[arg(long, env = "RELAY_DATABASE")]
    pub database: Option<PathBuf>,

    /// Upper bound on concurrent sessions. Unbounded when unset.
    #[arg(long, env = "RELAY_MAX_SESSIONS")]
    pub max_sessions: Option<usize>,

    /// File that receives a plain-text copy of the log, appended across runs.
    #[arg(long, env = "RELAY_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Loopback configuration on ephemeral ports, for tests and local runs.
    pub fn ephemeral() -> Self {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        ServerConfig {
            stream_addr: loopback,
            datagram_addr: loopback,
            database: None,
            max_sessions: None,
            log_file: None,
        }
    }

    /// Builds the store selected by this configuration. Nothing is opened yet.
    pub fn open_store(&self) -> Arc<dyn ChatStore> {
        match &self.database {
            Some(path) => Arc::new(SqliteStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            stream_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_STREAM_PORT)),
            datagram_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_DATAGRAM_PORT)),
            database: None,
            max_sessions: None,
            log_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_defaults_match_default_impl() {
        let parsed = ServerConfig::try_parse_from(["relay-server"]).unwrap();
        assert_eq!(parsed.stream_addr.port(), DEFAULT_STREAM_PORT);
        assert_eq!(parsed.datagram_addr.port(), DEFAULT_DATAGRAM_PORT);
        assert_eq!(ServerConfig::default().stream_addr.port(), DEFAULT_STREAM_PORT);
        assert_eq!(parsed.log_file, None);
    }

    #[test]
    fn parses_overrides() {
        let parsed = ServerConfig::try_parse_from([
            "relay-server",
            "--stream-addr",
            "127.0.0.1:9000",
            "--database",
            "chat.db",
            "--max-sessions",
            "16",
            "--log-file",
            "logs/relay.log",
        ])
        .unwrap();
        assert_eq!(parsed.stream_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(parsed.database, Some(PathBuf::from("chat.db")));
        assert_eq!(parsed.max_sessions, Some(16));
        assert_eq!(parsed.log_file, Some(PathBuf::from("logs/relay.log")));
    }
}
