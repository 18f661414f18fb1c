//! # Wire Data Model
//!
//! Values carried as JSON inside frame payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A chat message. Immutable once posted; equality covers all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_nickname: String,
    /// Empty for a broadcast to everyone.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub receiver_nickname: String,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

impl Message {
    /// Builds a broadcast message.
    pub fn broadcast(
        sender: impl Into<String>,
        text: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> Self {
        Message {
            sender_nickname: sender.into(),
            receiver_nickname: String::new(),
            text: text.into(),
            posted_at,
        }
    }

    /// Builds a message addressed to one receiver.
    pub fn direct(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        text: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> Self {
        Message {
            sender_nickname: sender.into(),
            receiver_nickname: receiver.into(),
            text: text.into(),
            posted_at,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver_nickname.is_empty()
    }
}

/// A nickname/password pair presented for sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub nickname: String,
    pub password: String,
}

impl User {
    pub fn new(nickname: impl Into<String>, password: impl Into<String>) -> Self {
        User {
            nickname: nickname.into(),
            password: password.into(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
