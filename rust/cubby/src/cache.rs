use std::time::Duration;

use cubby_common::Flight;
use cubby_common::time::Instant;
use cubby_credentials::{Authenticator, IdentityKind};
use cubby_storage::DurableState;
use tokio::sync::watch;
use tracing::warn;

use crate::{CubbyError, Namespace, NamespaceResolver};

/// Default lifetime of a cached namespace: 30 minutes.
pub const DEFAULT_NAMESPACE_TTL: Duration = Duration::from_secs(30 * 60);

/// A resolved namespace and the conditions it was resolved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    namespace: Namespace,
    kind: IdentityKind,
    created_at: Instant,
    ttl: Duration,
    subject: Option<String>,
}

impl CacheEntry {
    /// The cached namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The kind of identity the namespace was derived for.
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// When the namespace was resolved.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// How long the entry is served for.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether a caller holding `credentials` may be handed this namespace.
    /// Authenticated credentials never write under an anonymous namespace.
    pub fn serves(&self, credentials: IdentityKind) -> bool {
        !(credentials == IdentityKind::Authenticated && self.kind == IdentityKind::Anonymous)
    }

    fn is_fresh(&self, subject: &Option<String>, credentials: IdentityKind) -> bool {
        self.created_at.elapsed() < self.ttl && self.subject == *subject && self.serves(credentials)
    }
}

/// A single-entry, TTL-bounded cache in front of a [NamespaceResolver].
///
/// The entry remembers which authenticated subject the credential provider
/// last reported when it was resolved; once the provider reports a
/// different subject the entry is stale, without anyone having to reach in
/// and clear it.
///
/// A resolution that fell back to the anonymous identifier is never handed
/// to a caller holding authenticated credentials, nor kept for one. Such a
/// caller gets [CubbyError::IdentityUnavailable] until the session yields a
/// stable key.
pub struct NamespaceCache<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    resolver: NamespaceResolver<Auth, State>,
    subject: watch::Receiver<Option<String>>,
    ttl: Duration,
    entry: Flight<CacheEntry, CubbyError>,
}

impl<Auth, State> NamespaceCache<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    /// Cache `resolver`'s answers for `ttl`, or until `subject` changes.
    pub fn new(
        resolver: NamespaceResolver<Auth, State>,
        subject: watch::Receiver<Option<String>>,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            subject,
            ttl,
            entry: Flight::default(),
        }
    }

    /// The resolver behind the cache.
    pub fn resolver(&self) -> &NamespaceResolver<Auth, State> {
        &self.resolver
    }

    /// The namespace for a caller holding `credentials`, resolving it if the
    /// entry expired or cannot serve that caller.
    pub async fn get(&self, credentials: IdentityKind) -> Result<Namespace, CubbyError> {
        let entry = self
            .entry
            .run(
                |entry| entry.is_fresh(&self.subject.borrow(), credentials),
                || async {
                    let subject = self.subject.borrow().clone();
                    // A `changed` resolution already carries the new
                    // namespace, so it is cached like any other.
                    let resolution = self.resolver.resolve().await;
                    let entry = CacheEntry {
                        namespace: resolution.namespace,
                        kind: resolution.identity.kind,
                        created_at: Instant::now(),
                        ttl: self.ttl,
                        subject,
                    };

                    if entry.serves(credentials) {
                        Ok(entry)
                    } else {
                        warn!(
                            namespace = %entry.namespace,
                            "Signed-in session has no stable key yet, refusing anonymous namespace"
                        );
                        Err(CubbyError::IdentityUnavailable(
                            "signed-in session has no stable key yet".into(),
                        ))
                    }
                },
            )
            .await?;

        Ok(entry.namespace)
    }

    /// The live entry, if any.
    pub async fn entry(&self) -> Option<CacheEntry> {
        self.entry.peek().await.filter(|entry| {
            entry.created_at.elapsed() < entry.ttl && entry.subject == *self.subject.borrow()
        })
    }

    /// Expire the entry now. A resolution already in flight still answers
    /// its callers but is not kept.
    pub fn invalidate(&self) {
        self.entry.invalidate();
    }
}
