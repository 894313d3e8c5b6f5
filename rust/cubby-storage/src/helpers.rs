use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use cubby_common::time::utc_now;
use cubby_credentials::CredentialSet;
use futures_util::TryStreamExt;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use url::Url;

use crate::{Metadata, ObjectEntry, ObjectHead, ObjectStore, PutObject, StoreError};

/// Names the [ObjectStore] operations, for scripting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [ObjectStore::put]
    Put,
    /// [ObjectStore::list]
    List,
    /// [ObjectStore::head]
    Head,
    /// [ObjectStore::delete]
    Delete,
    /// [ObjectStore::copy_with_metadata]
    Copy,
    /// [ObjectStore::presign]
    Presign,
}

/// An object held by a [MemoryObjectStore].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// The content.
    pub body: Bytes,
    /// Content type and user metadata.
    pub metadata: Metadata,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct Script {
    failures: HashMap<Operation, VecDeque<StoreError>>,
    calls: Vec<(Operation, CredentialSet)>,
    chunk_latency: Duration,
}

/// An [ObjectStore] kept in memory, for tests. Clones share their objects.
///
/// Failures can be queued per operation with [MemoryObjectStore::fail_next],
/// and every call is recorded with the credentials it was signed with.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    script: Arc<Mutex<Script>>,
}

impl MemoryObjectStore {
    /// Make the next call to `operation` fail with `error`. Queued failures
    /// are consumed in order.
    pub fn fail_next(&self, operation: Operation, error: StoreError) {
        self.script
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Wait `latency` before consuming each chunk of an uploaded body.
    pub fn set_chunk_latency(&self, latency: Duration) {
        self.script.lock().chunk_latency = latency;
    }

    /// Every call so far, with the credentials it was signed with.
    pub fn calls(&self) -> Vec<(Operation, CredentialSet)> {
        self.script.lock().calls.clone()
    }

    /// Number of calls to `operation` so far.
    pub fn calls_to(&self, operation: Operation) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|(called, _)| *called == operation)
            .count()
    }

    /// Place an object directly, bypassing credentials and scripting.
    pub async fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>, metadata: Metadata) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                body: body.into(),
                metadata,
                last_modified: utc_now(),
            },
        );
    }

    /// The object stored under `key`, if any.
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// Every key currently stored.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    fn call(&self, operation: Operation, credentials: &CredentialSet) -> Result<(), StoreError> {
        let mut script = self.script.lock();
        script.calls.push((operation, credentials.clone()));
        match script
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, credentials: &CredentialSet, object: PutObject) -> Result<(), StoreError> {
        self.call(Operation::Put, credentials)?;
        let latency = self.script.lock().chunk_latency;

        let mut body = object.body;
        let mut buffer = BytesMut::with_capacity(object.content_length as usize);
        while let Some(chunk) = body.try_next().await? {
            #[cfg(not(target_arch = "wasm32"))]
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            buffer.extend_from_slice(&chunk);
        }
        #[cfg(target_arch = "wasm32")]
        let _ = latency;

        if buffer.len() as u64 != object.content_length {
            return Err(StoreError::BodyFailed(format!(
                "declared {} bytes, received {}",
                object.content_length,
                buffer.len()
            )));
        }

        self.insert(object.key, buffer.freeze(), object.metadata)
            .await;
        Ok(())
    }

    async fn list(
        &self,
        credentials: &CredentialSet,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StoreError> {
        self.call(Operation::List, credentials)?;
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectEntry {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn head(&self, credentials: &CredentialSet, key: &str) -> Result<ObjectHead, StoreError> {
        self.call(Operation::Head, credentials)?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        Ok(ObjectHead {
            key: key.to_owned(),
            size: object.body.len() as u64,
            last_modified: Some(object.last_modified),
            metadata: object.metadata.clone(),
        })
    }

    async fn delete(&self, credentials: &CredentialSet, key: &str) -> Result<(), StoreError> {
        self.call(Operation::Delete, credentials)?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn copy_with_metadata(
        &self,
        credentials: &CredentialSet,
        key: &str,
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        self.call(Operation::Copy, credentials)?;
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        object.metadata = metadata;
        object.last_modified = utc_now();
        Ok(())
    }

    fn presign(
        &self,
        credentials: &CredentialSet,
        key: &str,
        ttl: Duration,
    ) -> Result<Url, StoreError> {
        self.call(Operation::Presign, credentials)?;
        let mut url = Url::parse("memory://objects/")
            .map_err(|error| StoreError::AuthorizationError(error.to_string()))?;
        url.set_path(key);
        url.query_pairs_mut()
            .append_pair("expires", &ttl.as_secs().to_string())
            .append_pair("credential", credentials.access_key_id());
        Ok(url)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use anyhow::Result;
    use bytes::Bytes;
    use cubby_credentials::{CredentialSet, IdentityKind};
    use futures_util::stream;

    use super::{MemoryObjectStore, Operation};
    use crate::{Metadata, ObjectStore, PutObject, StoreError};

    fn credentials() -> CredentialSet {
        CredentialSet::new(
            "ASIATEST",
            "secret",
            chrono::Utc::now(),
            IdentityKind::Anonymous,
        )
    }

    fn object(key: &str, content: &'static [u8]) -> PutObject {
        PutObject {
            key: key.into(),
            content_length: content.len() as u64,
            metadata: Metadata::with_content_type("text/plain"),
            body: Box::pin(stream::iter(vec![Ok::<_, StoreError>(Bytes::from_static(
                content,
            ))])),
        }
    }

    #[tokio::test]
    async fn it_lists_by_prefix_only() -> Result<()> {
        let store = MemoryObjectStore::default();
        store.put(&credentials(), object("users/ab/1-a", b"a")).await?;
        store.put(&credentials(), object("users/abc/1-b", b"b")).await?;

        let listed = store.list(&credentials(), "users/ab/").await?;

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "users/ab/1-a");
        assert!(store.list(&credentials(), "users/zz/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn it_replays_scripted_failures_once() -> Result<()> {
        let store = MemoryObjectStore::default();
        store.fail_next(Operation::List, StoreError::Denied("expired".into()));

        let first = store.list(&credentials(), "users/").await;
        let second = store.list(&credentials(), "users/").await;

        assert_eq!(first, Err(StoreError::Denied("expired".into())));
        assert!(second.is_ok());
        assert_eq!(store.calls_to(Operation::List), 2);
        Ok(())
    }

    #[tokio::test]
    async fn it_replaces_metadata_on_copy() -> Result<()> {
        let store = MemoryObjectStore::default();
        store.put(&credentials(), object("users/ab/1-a", b"abc")).await?;

        let mut metadata = Metadata::with_content_type("text/plain");
        metadata
            .user
            .insert("expires-at".into(), "2030-01-01T00:00:00+00:00".into());
        store
            .copy_with_metadata(&credentials(), "users/ab/1-a", metadata.clone())
            .await?;

        let head = store.head(&credentials(), "users/ab/1-a").await?;
        assert_eq!(head.metadata, metadata);
        assert_eq!(head.size, 3);

        let missing = store
            .copy_with_metadata(&credentials(), "users/ab/missing", Metadata::default())
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_bodies_shorter_than_declared() -> Result<()> {
        let store = MemoryObjectStore::default();
        let mut short = object("users/ab/1-a", b"abc");
        short.content_length = 10;

        let result = store.put(&credentials(), short).await;

        assert!(matches!(result, Err(StoreError::BodyFailed(_))));
        assert!(store.object("users/ab/1-a").await.is_none());
        Ok(())
    }
}
