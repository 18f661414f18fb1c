//! # Message Cache
//!
//! Process-wide copy of the conversation, shared by every session and
//! datagram handler.
//!
//! ## Design Principles
//!
//! 1. **Swap, Don't Mutate**: The history lives in an `Arc<[Message]>`.
//!    Writers build a new slice and swap the pointer; readers clone the
//!    pointer. A reader sees the old or the new history, never a mix.
//! 2. **Short Critical Sections**: The lock is held only for the pointer
//!    clone or swap, never while serializing or talking to the store.
//! 3. **Single Writer Refresh**: Reloads from the store are serialized, and
//!    each one reads the store only after it holds the gate, so the last
//!    refresh to finish reflects every write committed before it began.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use relay_common::Message;

use crate::error::CacheError;
use crate::gateway::StoreGateway;

pub struct MessageCache {
    messages: RwLock<Arc<[Message]>>,
    version: AtomicU64,
    loaded: AtomicBool,
    refresh_gate: Mutex<()>,
}

impl MessageCache {
    /// Creates an empty, not yet loaded cache.
    pub fn new() -> Self {
        MessageCache {
            messages: RwLock::new(Arc::from(Vec::new())),
            version: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Populates the cache at server start.
    ///
    /// Fails if the cache was already loaded and not discarded since.
    pub fn load(&self, initial: Vec<Message>) -> Result<(), CacheError> {
        if self.loaded.swap(true, Ordering::AcqRel) {
            return Err(CacheError::AlreadyLoaded);
        }
        let count = initial.len();
        self.replace_all(initial);
        debug!(count, "message cache loaded");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Returns the current history. Cheap: clones a pointer.
    pub fn snapshot(&self) -> Arc<[Message]> {
        Arc::clone(&self.messages.read())
    }

    /// Atomically replaces the whole history and returns the new version.
    pub fn replace_all(&self, messages: Vec<Message>) -> u64 {
        let messages: Arc<[Message]> = Arc::from(messages);
        let mut slot = self.messages.write();
        *slot = messages;
        // Bumped under the write lock so versions follow swap order.
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of swaps performed since creation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reloads the full history from the store and swaps it in.
    ///
    /// Returns false and keeps the previous history if the store load fails.
    pub async fn refresh_from(&self, gateway: &StoreGateway) -> bool {
        let _gate = self.refresh_gate.lock().await;
        match gateway.all_messages().await {
            Some(messages) => {
                let count = messages.len();
                let version = self.replace_all(messages);
                debug!(count, version, "message cache refreshed");
                true
            }
            None => {
                warn!("message reload failed; keeping previous cache contents");
                false
            }
        }
    }

    /// Drops the history at shutdown so the next start can load again.
    pub fn discard(&self) {
        *self.messages.write() = Arc::from(Vec::new());
        self.loaded.store(false, Ordering::Release);
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}
