//! Async adapter over the blocking [`ChatStore`] contract.
//!
//! Every call runs on Tokio's blocking pool so a slow backend never stalls
//! the accept loops. A call that panics or is cancelled is reported the same
//! way the store reports its own failures: `false` or `None`.

use std::sync::Arc;

use tracing::error;

use relay_common::{Message, User};
use relay_store::{ChatStore, StoreError, StoreResult};

/// Cloneable handle to the shared store.
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn ChatStore>,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        StoreGateway { store }
    }

    pub async fn connect(&self) -> StoreResult<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.connect())
            .await
            .unwrap_or_else(|err| Err(StoreError::Connection(err.to_string())))
    }

    pub async fn user_exists(&self, user: User) -> bool {
        self.call("user_exists", false, move |store| store.user_exists(&user))
            .await
    }

    pub async fn create_user(&self, user: User) -> bool {
        self.call("create_user", false, move |store| store.create_user(&user))
            .await
    }

    pub async fn all_messages(&self) -> Option<Vec<Message>> {
        self.call("all_messages", None, |store| store.all_messages())
            .await
    }

    pub async fn post_message(&self, message: Message) -> bool {
        self.call("post_message", false, move |store| store.post_message(&message))
            .await
    }

    pub async fn disconnect(&self) {
        self.call("disconnect", (), |store| store.disconnect()).await
    }

    async fn call<T, F>(&self, op: &'static str, fallback: T, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&dyn ChatStore) -> T + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || f(store.as_ref())).await {
            Ok(value) => value,
            Err(err) => {
                error!(op, error = %err, "store call did not complete");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn forwards_to_store() {
        let gateway = StoreGateway::new(Arc::new(MemoryStore::new()));
        let user = User::new("Nick", "pw");

        assert!(!gateway.create_user(user.clone()).await);
        gateway.connect().await.unwrap();
        assert!(gateway.create_user(user.clone()).await);
        assert!(gateway.user_exists(user).await);

        gateway.disconnect().await;
        assert!(gateway.all_messages().await.is_none());
    }
}
