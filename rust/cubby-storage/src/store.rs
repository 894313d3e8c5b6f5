use std::time::Duration;

use async_trait::async_trait;
use cubby_common::ConditionalSync;
use cubby_credentials::CredentialSet;
use url::Url;

use crate::{Metadata, ObjectEntry, ObjectHead, PutObject, StoreError};

/// A shared object store, addressed by key.
///
/// Every operation is signed with the [CredentialSet] it is given; the store
/// itself holds no credentials.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ObjectStore: ConditionalSync {
    /// Write an object, replacing whatever was stored under its key.
    async fn put(&self, credentials: &CredentialSet, object: PutObject) -> Result<(), StoreError>;

    /// Every object whose key starts with `prefix`, in key order.
    async fn list(
        &self,
        credentials: &CredentialSet,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StoreError>;

    /// Size, timestamps and metadata of one object.
    async fn head(&self, credentials: &CredentialSet, key: &str) -> Result<ObjectHead, StoreError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, credentials: &CredentialSet, key: &str) -> Result<(), StoreError>;

    /// Copy an object onto itself, replacing all of its metadata with
    /// `metadata`.
    async fn copy_with_metadata(
        &self,
        credentials: &CredentialSet,
        key: &str,
        metadata: Metadata,
    ) -> Result<(), StoreError>;

    /// A URL anyone can GET the object from until `ttl` elapses.
    fn presign(
        &self,
        credentials: &CredentialSet,
        key: &str,
        ttl: Duration,
    ) -> Result<Url, StoreError>;
}
