use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use cubby_common::time::{unix_millis, utc_now};
use cubby_credentials::{
    Authenticator, CredentialProvider, CredentialSet, SessionEvent,
};
use cubby_storage::s3::Bucket;
use cubby_storage::{ByteStream, DurableState, Metadata, ObjectStore, PutObject, StoreError};
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Config, CubbyError, Namespace, NamespaceCache, NamespaceResolver};

/// User metadata field holding an object's expiration, as RFC 3339.
pub const EXPIRES_AT_METADATA: &str = "expires-at";

/// Lifetime of the links attached to returned objects, before clamping to
/// the configured maximum: one hour.
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(3600);

/// Receives upload progress as a percentage between 0 and 100.
#[cfg(not(target_arch = "wasm32"))]
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Receives upload progress as a percentage between 0 and 100.
#[cfg(target_arch = "wasm32")]
pub type ProgressCallback = Arc<dyn Fn(u8)>;

/// An object in the caller's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    /// Full object key.
    pub key: String,
    /// The last segment of the key.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was last written, if known.
    pub last_modified: Option<DateTime<Utc>>,
    /// When the object is meant to expire. Listings leave this unset; the
    /// store only reports it per object.
    pub expires_at: Option<DateTime<Utc>>,
    /// The MIME type, if known. Unset in listings.
    pub content_type: Option<String>,
    /// A presigned GET link, valid for [DEFAULT_LINK_TTL] or the configured
    /// maximum share lifetime, whichever is shorter.
    pub url: Option<Url>,
}

/// Optional parts of an upload.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Stamp the object with an expiration.
    pub expires_at: Option<DateTime<Utc>>,
    /// Called as the body is streamed out. Sees 100 exactly once, when the
    /// store has accepted the object.
    pub progress: Option<ProgressCallback>,
    /// Abandon the upload when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl UploadOptions {
    /// Stamp the object with an expiration.
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Report progress to `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Abandon the upload when `cancel` is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("expires_at", &self.expires_at)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Credential and namespace state shared with the session listener.
struct Session<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    provider: CredentialProvider<Auth>,
    namespaces: NamespaceCache<Auth, State>,
}

impl<Auth, State> Session<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    fn on_session_change(&self, event: &SessionEvent) {
        match event {
            SessionEvent::SignedIn { subject } => {
                info!(%subject, "Session started, dropping cached identity");
            }
            SessionEvent::SignedOut => {
                info!("Session ended, dropping cached identity");
                self.namespaces.resolver().forget_on_next_resolve();
            }
        }
        self.invalidate();
    }

    fn invalidate(&self) {
        self.provider.invalidate();
        self.namespaces.invalidate();
    }
}

/// Identity-scoped access to a shared object store.
///
/// One instance per application session. Each operation first makes sure
/// live credentials are held, then resolves the caller's [Namespace], then
/// talks to the store. Operations that change an existing object refuse
/// keys outside the namespace before the store is contacted.
///
/// Store failures are retried once after dropping the held credentials and
/// namespace. Authorization failures, missing objects and cancellations are
/// never retried.
pub struct Cubby<Auth, State, Store>
where
    Auth: Authenticator,
    State: DurableState,
    Store: ObjectStore,
{
    session: Arc<Session<Auth, State>>,
    store: Store,
    max_share_ttl: Duration,
    upload_chunk_size: usize,
    last_stamp: AtomicU64,
}

impl<Auth, State> Cubby<Auth, State, Bucket>
where
    Auth: Authenticator + 'static,
    State: DurableState + 'static,
{
    /// Talk to the S3 bucket at `config.address`.
    pub fn connect(
        config: Config,
        authenticator: Arc<Auth>,
        state: Arc<State>,
    ) -> Result<Self, CubbyError> {
        let bucket = Bucket::open(&config.address)
            .map_err(|error| CubbyError::InvalidConfig(error.to_string()))?;
        Self::new(config, authenticator, state, bucket)
    }
}

impl<Auth, State, Store> Cubby<Auth, State, Store>
where
    Auth: Authenticator + 'static,
    State: DurableState + 'static,
    Store: ObjectStore,
{
    /// Assemble a facade over `store` and start listening for session
    /// changes on `authenticator`.
    pub fn new(
        config: Config,
        authenticator: Arc<Auth>,
        state: Arc<State>,
        store: Store,
    ) -> Result<Self, CubbyError> {
        config.validate()?;

        let provider = CredentialProvider::new(authenticator.clone(), config.identity_pool)
            .with_timeout(config.auth_timeout)
            .with_renewal_margin(config.credential_renewal_margin);
        let resolver =
            NamespaceResolver::new(authenticator.clone(), state).with_timeout(config.auth_timeout);
        let namespaces = NamespaceCache::new(resolver, provider.subscribe(), config.namespace_ttl);

        let session = Arc::new(Session {
            provider,
            namespaces,
        });

        // The authenticator outlives nothing it is handed, so the listener
        // holds the session weakly.
        let listener: Weak<Session<Auth, State>> = Arc::downgrade(&session);
        authenticator.on_session_change(Box::new(move |event| {
            if let Some(session) = listener.upgrade() {
                session.on_session_change(&event);
            }
        }));

        Ok(Self {
            session,
            store,
            max_share_ttl: config.max_share_ttl,
            upload_chunk_size: config.upload_chunk_size,
            last_stamp: AtomicU64::new(0),
        })
    }

    /// React to a sign-in or sign-out. Called automatically for events the
    /// authenticator reports.
    pub fn on_session_change(&self, event: SessionEvent) {
        self.session.on_session_change(&event);
    }

    /// The caller's current namespace.
    pub async fn namespace(&self) -> Result<Namespace, CubbyError> {
        let (_, namespace) = self.context().await?;
        Ok(namespace)
    }

    /// Upload `content` as `name`.
    ///
    /// The object lands at `<namespace><millis>-<name>`, with any `/` in the
    /// name replaced by `_`. Millisecond stamps never repeat within one
    /// facade, so two uploads of the same name never overwrite each other.
    pub async fn upload(
        &self,
        name: &str,
        content: Bytes,
        content_type: &str,
        options: UploadOptions,
    ) -> Result<StorageObject, CubbyError> {
        let cancel = options.cancel.clone().unwrap_or_default();

        let upload = self.with_retry("upload", |credentials, namespace| {
            self.upload_once(credentials, namespace, name, content.clone(), content_type, &options)
        });

        let object = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(%name, "Upload cancelled");
                return Err(CubbyError::Cancelled);
            }
            result = upload => result?,
        };

        if let Some(progress) = &options.progress {
            progress(100);
        }
        Ok(object)
    }

    /// Every object in the caller's namespace.
    pub async fn list(&self) -> Result<Vec<StorageObject>, CubbyError> {
        self.with_retry("list", |credentials, namespace| {
            self.list_once(credentials, namespace)
        })
        .await
    }

    /// Delete an object from the caller's namespace.
    pub async fn delete(&self, key: &str) -> Result<(), CubbyError> {
        self.with_retry("delete", |credentials, namespace| {
            self.delete_once(credentials, namespace, key)
        })
        .await
    }

    /// Set or, with `None`, clear an object's expiration. All other
    /// metadata is kept.
    pub async fn set_expiration(
        &self,
        key: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<StorageObject, CubbyError> {
        self.with_retry("set_expiration", |credentials, namespace| {
            self.set_expiration_once(credentials, namespace, key, expires_at)
        })
        .await
    }

    /// A presigned GET URL for `key`, valid for `ttl` clamped to between one
    /// second and the configured maximum.
    ///
    /// Anyone holding the URL can read the object, so it is up to the caller
    /// which keys it hands out links for.
    pub async fn shareable_url(&self, key: &str, ttl: Duration) -> Result<Url, CubbyError> {
        let ttl = self.clamp_share_ttl(ttl);
        self.with_retry("shareable_url", |credentials, _| async move {
            Ok(self.store.presign(&credentials, key, ttl)?)
        })
        .await
    }

    async fn context(&self) -> Result<(CredentialSet, Namespace), CubbyError> {
        let credentials = self.session.provider.acquire().await?;
        let namespace = self.session.namespaces.get(credentials.kind()).await?;
        Ok((credentials, namespace))
    }

    fn clamp_share_ttl(&self, ttl: Duration) -> Duration {
        Duration::from_secs(ttl.as_secs().clamp(1, self.max_share_ttl.as_secs().max(1)))
    }

    /// A link for a returned object. The object itself is fine without
    /// one, so a signing failure only costs the link.
    fn link(&self, credentials: &CredentialSet, key: &str) -> Option<Url> {
        match self
            .store
            .presign(credentials, key, self.clamp_share_ttl(DEFAULT_LINK_TTL))
        {
            Ok(url) => Some(url),
            Err(error) => {
                warn!(%key, %error, "Could not sign object link");
                None
            }
        }
    }

    async fn with_retry<T, Attempt, Fut>(
        &self,
        operation: &'static str,
        mut attempt: Attempt,
    ) -> Result<T, CubbyError>
    where
        Attempt: FnMut(CredentialSet, Namespace) -> Fut,
        Fut: Future<Output = Result<T, CubbyError>>,
    {
        let (credentials, namespace) = self.context().await?;
        match attempt(credentials, namespace).await {
            Err(error) if is_retryable(&error) => {
                warn!(%operation, %error, "Retrying with fresh credentials");
                self.session.invalidate();
                let (credentials, namespace) = self.context().await?;
                attempt(credentials, namespace).await
            }
            outcome => outcome,
        }
    }

    fn authorize(&self, namespace: &Namespace, key: &str) -> Result<(), CubbyError> {
        if namespace.contains(key) {
            Ok(())
        } else {
            warn!(%key, %namespace, "Refusing access outside namespace");
            Err(CubbyError::Unauthorized {
                key: key.to_owned(),
                namespace: namespace.to_string(),
            })
        }
    }

    async fn upload_once(
        &self,
        credentials: CredentialSet,
        namespace: Namespace,
        name: &str,
        content: Bytes,
        content_type: &str,
        options: &UploadOptions,
    ) -> Result<StorageObject, CubbyError> {
        let key = namespace.object_key(self.next_stamp(), name);
        let size = content.len() as u64;

        let mut metadata = Metadata::with_content_type(content_type);
        if let Some(expires_at) = options.expires_at {
            metadata
                .user
                .insert(EXPIRES_AT_METADATA.into(), expires_at.to_rfc3339());
        }

        debug!(%key, size, "Uploading");
        self.store
            .put(
                &credentials,
                PutObject {
                    key: key.clone(),
                    content_length: size,
                    metadata,
                    body: chunked(content, self.upload_chunk_size, options.progress.clone()),
                },
            )
            .await
            .map_err(CubbyError::UploadFailed)?;

        Ok(StorageObject {
            name: file_name(&key).to_owned(),
            url: self.link(&credentials, &key),
            key,
            size,
            last_modified: Some(utc_now()),
            expires_at: options.expires_at,
            content_type: Some(content_type.to_owned()),
        })
    }

    async fn list_once(
        &self,
        credentials: CredentialSet,
        namespace: Namespace,
    ) -> Result<Vec<StorageObject>, CubbyError> {
        let entries = self.store.list(&credentials, namespace.as_str()).await?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.key != namespace.as_str())
            .map(|entry| StorageObject {
                url: self.link(&credentials, &entry.key),
                name: file_name(&entry.key).to_owned(),
                key: entry.key,
                size: entry.size,
                last_modified: entry.last_modified,
                expires_at: None,
                content_type: None,
            })
            .collect())
    }

    async fn delete_once(
        &self,
        credentials: CredentialSet,
        namespace: Namespace,
        key: &str,
    ) -> Result<(), CubbyError> {
        self.authorize(&namespace, key)?;
        self.store.delete(&credentials, key).await?;
        info!(%key, "Deleted object");
        Ok(())
    }

    async fn set_expiration_once(
        &self,
        credentials: CredentialSet,
        namespace: Namespace,
        key: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<StorageObject, CubbyError> {
        self.authorize(&namespace, key)?;

        let head = self.store.head(&credentials, key).await?;
        let mut metadata = head.metadata;
        match expires_at {
            Some(expires_at) => {
                metadata
                    .user
                    .insert(EXPIRES_AT_METADATA.into(), expires_at.to_rfc3339());
            }
            None => {
                metadata.user.remove(EXPIRES_AT_METADATA);
            }
        }

        self.store
            .copy_with_metadata(&credentials, key, metadata.clone())
            .await?;
        info!(%key, expires_at = ?expires_at, "Updated expiration");

        Ok(StorageObject {
            key: key.to_owned(),
            name: file_name(key).to_owned(),
            size: head.size,
            last_modified: head.last_modified,
            expires_at,
            content_type: metadata.content_type,
            url: self.link(&credentials, key),
        })
    }

    /// Milliseconds since the epoch, bumped past the previous stamp when the
    /// clock has not moved (or moved back).
    fn next_stamp(&self) -> u64 {
        let now = unix_millis();
        let mut last = self.last_stamp.load(Ordering::Acquire);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// The expiration recorded in `metadata`, if it parses.
pub fn expiration_of(metadata: &Metadata) -> Option<DateTime<Utc>> {
    metadata
        .user
        .get(EXPIRES_AT_METADATA)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

/// Store failures that fresh credentials might cure. A missing object stays
/// missing however the request is signed.
fn is_retryable(error: &CubbyError) -> bool {
    matches!(
        error.store_error(),
        Some(store_error) if !matches!(store_error, StoreError::NotFound(_))
    )
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Stream `content` in `chunk_size` pieces, reporting the rounded share
/// handed out so far. Never reports 100; that is left for when the store
/// has accepted the whole object.
fn chunked(content: Bytes, chunk_size: usize, progress: Option<ProgressCallback>) -> ByteStream {
    let total = content.len();
    let chunk_size = chunk_size.max(1);
    let chunks = (0..total)
        .step_by(chunk_size)
        .map(move |start| content.slice(start..(start + chunk_size).min(total)));

    let mut loaded = 0usize;
    Box::pin(stream::iter(chunks).map(move |chunk| {
        loaded += chunk.len();
        if let Some(progress) = &progress {
            progress(percentage(loaded, total).min(99));
        }
        Ok::<_, StoreError>(chunk)
    }))
}

fn percentage(loaded: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((loaded as u128 * 100 + total as u128 / 2) / total as u128) as u8
}
