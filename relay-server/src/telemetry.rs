//! Tracing setup for the relay binary.
//!
//! Events always go to stderr. When a log file is configured, the same
//! events are appended to it as plain text.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Opens `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Builds the subscriber: stderr output plus an optional file sink.
pub fn build_subscriber(filter: EnvFilter, log_file: Option<File>) -> impl Subscriber + Send + Sync + 'static {
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
}

/// Installs the global subscriber. A second call is ignored.
pub fn init_tracing(log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file = log_file.map(open_log_file).transpose()?;
    let _ = build_subscriber(filter, file).try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing::{info, warn};

    use super::*;

    #[test]
    fn file_sink_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("relay.log");
        let file = open_log_file(&path).unwrap();

        let subscriber = build_subscriber(EnvFilter::new("info"), Some(file));
        tracing::subscriber::with_default(subscriber, || {
            info!(peer = "127.0.0.1:4000", "session opened");
            warn!(header = 99, "unknown command received");
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("session opened"));
        assert!(contents.contains("unknown command received"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        fs::write(&path, "earlier run\n").unwrap();

        let subscriber = build_subscriber(EnvFilter::new("info"), Some(open_log_file(&path).unwrap()));
        tracing::subscriber::with_default(subscriber, || info!("relay exited"));

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("earlier run\n"));
        assert!(contents.contains("relay exited"));
    }
}
