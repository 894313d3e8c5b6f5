use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cubby_common::ConditionalSync;
use tokio::sync::RwLock;

use crate::StateError;

#[cfg(not(target_arch = "wasm32"))]
mod fs;
#[cfg(not(target_arch = "wasm32"))]
pub use fs::*;

/// Small string values that outlive the process.
///
/// All client-side persistence goes through one of these, so there is a
/// single write path to reason about.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait DurableState: ConditionalSync {
    /// The value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StateError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StateError>;
}

/// A [DurableState] that only lasts as long as the process. Clones share
/// their entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl DurableState for MemoryState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StateError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
