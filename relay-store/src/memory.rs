//! # In-Memory Store
//!
//! A process-local [`ChatStore`] used by tests and by the server when no
//! database path is configured. Contents are lost on exit.

use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use relay_common::{Message, User};

use crate::store::{ChatStore, StoreResult};

/// User table and message log guarded by reader-writer locks.
///
/// Behaves like a remote backend: every operation fails softly until
/// [`ChatStore::connect`] has been called, and again after `disconnect`.
#[derive(Default)]
pub struct MemoryStore {
    connected: AtomicBool,
    users: RwLock<HashMap<String, String, RandomState>>,
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `messages`, e.g. for restart tests.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        MemoryStore {
            messages: RwLock::new(messages),
            ..Self::default()
        }
    }

    /// Number of stored messages, regardless of connection state.
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    fn is_connected(&self) -> bool {
        let connected = self.connected.load(Ordering::Acquire);
        if !connected {
            warn!("memory store used before connect");
        }
        connected
    }
}

impl ChatStore for MemoryStore {
    fn connect(&self) -> StoreResult<()> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            debug!("memory store connected");
        }
        Ok(())
    }

    fn user_exists(&self, user: &User) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.users
            .read()
            .get(&user.nickname)
            .is_some_and(|password| *password == user.password)
    }

    fn create_user(&self, user: &User) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut users = self.users.write();
        if users.contains_key(&user.nickname) {
            return false;
        }
        users.insert(user.nickname.clone(), user.password.clone());
        true
    }

    fn all_messages(&self) -> Option<Vec<Message>> {
        if !self.is_connected() {
            return None;
        }
        let mut messages = self.messages.read().clone();
        // Stable: equal timestamps keep insertion order.
        messages.sort_by_key(|message| message.posted_at);
        Some(messages)
    }

    fn post_message(&self, message: &Message) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.messages.write().push(message.clone());
        true
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("memory store disconnected");
        }
    }
}
