use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cubby_common::time::timeout;
use cubby_credentials::{
    AuthenticationError, Authenticator, Identity, IdentityKind, SessionIdentity,
};
use cubby_storage::DurableState;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Namespace, has_stable_key_shape};

/// Durable key holding the last stable key read from a session profile.
pub const STABLE_KEY_HINT: &str = "cubby.stable-key";

/// Durable key holding the session subject [STABLE_KEY_HINT] was recorded
/// for.
pub const STABLE_KEY_SUBJECT: &str = "cubby.stable-key.subject";

/// Durable key holding this installation's anonymous identifier.
pub const ANONYMOUS_ID: &str = "cubby.anonymous-id";

const ANONYMOUS_ID_PREFIX: &str = "anonymous_";

/// Where a [Resolution] got its stable key from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionSource {
    /// The signed-in session's `email` profile attribute.
    SessionProfile,
    /// A stable key persisted by an earlier resolution.
    PersistedHint,
    /// The session subject, which happened to be shaped like a stable key.
    SessionSubject,
    /// The installation's anonymous identifier.
    Anonymous,
}

/// The outcome of one namespace resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The resolved namespace.
    pub namespace: Namespace,
    /// The identity it was derived from.
    pub identity: Identity,
    /// Which source supplied the stable key.
    pub source: ResolutionSource,
    /// True when a session profile yielded a stable key other than the
    /// persisted one. Informational: [Resolution::namespace] already is the
    /// new namespace, so nothing needs to be invalidated on account of it.
    pub changed: bool,
}

impl Resolution {
    /// Anything short of a readable session profile is degraded.
    pub fn is_degraded(&self) -> bool {
        self.source != ResolutionSource::SessionProfile
    }

    /// The identity kind the namespace was derived for.
    pub fn kind(&self) -> IdentityKind {
        self.identity.kind
    }
}

enum Session {
    Active(SessionIdentity),
    SignedOut,
    Unreadable,
}

/// Derives the caller's [Namespace] from whatever identity information is
/// available.
///
/// Sources are tried in order: the session's profile email, the stable key
/// persisted by a previous resolution, the bare session subject (only when
/// shaped like `local@domain`), and finally an anonymous identifier minted
/// once per installation. Resolution never fails; every fallback is logged.
///
/// A persisted hint is only trusted while the session cannot be read, or
/// when the readable session is the one the hint was recorded for. A definite
/// sign-out skips straight to the anonymous identity.
pub struct NamespaceResolver<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    authenticator: Arc<Auth>,
    state: Arc<State>,
    timeout: Duration,
    forget_pending: AtomicBool,
    anonymous_id: Mutex<Option<String>>,
}

impl<Auth, State> NamespaceResolver<Auth, State>
where
    Auth: Authenticator,
    State: DurableState,
{
    /// Resolve against `authenticator`, persisting hints in `state`.
    pub fn new(authenticator: Arc<Auth>, state: Arc<State>) -> Self {
        Self {
            authenticator,
            state,
            timeout: cubby_credentials::DEFAULT_AUTH_TIMEOUT,
            forget_pending: AtomicBool::new(false),
            anonymous_id: Mutex::new(None),
        }
    }

    /// Bound the session lookup by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the current namespace.
    pub async fn resolve(&self) -> Resolution {
        if self.forget_pending.swap(false, Ordering::AcqRel) {
            self.forget().await;
        }

        let session = self.read_session().await;

        if let Session::Active(profile) = &session {
            if let Some(email) = profile.email().filter(|email| has_stable_key_shape(email)) {
                let changed = self.remember(email, &profile.subject).await;
                return self.report(Resolution {
                    namespace: Namespace::for_key(email),
                    identity: Identity::authenticated(email, Some(profile.subject.clone())),
                    source: ResolutionSource::SessionProfile,
                    changed,
                });
            }
        }

        if let Some(resolution) = self.from_hint(&session).await {
            return self.report(resolution);
        }

        if let Session::Active(profile) = &session {
            if has_stable_key_shape(&profile.subject) {
                return self.report(Resolution {
                    namespace: Namespace::for_key(&profile.subject),
                    identity: Identity::authenticated(
                        profile.subject.clone(),
                        Some(profile.subject.clone()),
                    ),
                    source: ResolutionSource::SessionSubject,
                    changed: false,
                });
            }
            debug!(subject = %profile.subject, "Session subject is not a usable stable key");
        }

        let anonymous_id = self.anonymous_id().await;
        self.report(Resolution {
            namespace: Namespace::for_key(&anonymous_id),
            identity: Identity::anonymous(anonymous_id),
            source: ResolutionSource::Anonymous,
            changed: false,
        })
    }

    /// Drop the persisted stable-key hint.
    pub async fn forget(&self) {
        for key in [STABLE_KEY_HINT, STABLE_KEY_SUBJECT] {
            if let Err(error) = self.state.remove(key).await {
                warn!(%key, %error, "Could not forget stable key hint");
            }
        }
        debug!("Forgot stable key hint");
    }

    /// Forget the hint at the start of the next [NamespaceResolver::resolve].
    /// For callers that cannot wait, such as session callbacks.
    pub fn forget_on_next_resolve(&self) {
        self.forget_pending.store(true, Ordering::Release);
    }

    async fn read_session(&self) -> Session {
        match timeout(self.timeout, self.authenticator.current_identity()).await {
            Ok(Ok(session)) => Session::Active(session),
            Ok(Err(AuthenticationError::NotAuthenticated)) => Session::SignedOut,
            Ok(Err(error)) => {
                warn!(%error, "Could not read session");
                Session::Unreadable
            }
            Err(elapsed) => {
                warn!(error = %elapsed, "Session lookup timed out");
                Session::Unreadable
            }
        }
    }

    async fn from_hint(&self, session: &Session) -> Option<Resolution> {
        if matches!(session, Session::SignedOut) {
            return None;
        }

        let hint = self.read(STABLE_KEY_HINT).await?;
        if !has_stable_key_shape(&hint) {
            warn!("Ignoring malformed stable key hint");
            return None;
        }
        let recorded_for = self.read(STABLE_KEY_SUBJECT).await;

        if let Session::Active(profile) = session {
            if recorded_for.as_deref() != Some(profile.subject.as_str()) {
                debug!(subject = %profile.subject, "Stable key hint belongs to another session");
                return None;
            }
        }

        Some(Resolution {
            namespace: Namespace::for_key(&hint),
            identity: Identity::authenticated(hint, recorded_for),
            source: ResolutionSource::PersistedHint,
            changed: false,
        })
    }

    /// Persist `stable_key` for `subject`, returning whether it differs from
    /// what was persisted before.
    async fn remember(&self, stable_key: &str, subject: &str) -> bool {
        let previous = self.read(STABLE_KEY_HINT).await;
        let previous_subject = self.read(STABLE_KEY_SUBJECT).await;

        if previous.as_deref() != Some(stable_key) {
            self.write(STABLE_KEY_HINT, stable_key).await;
        }
        if previous_subject.as_deref() != Some(subject) {
            self.write(STABLE_KEY_SUBJECT, subject).await;
        }

        previous.as_deref() != Some(stable_key)
    }

    /// The persisted anonymous identifier, or the one this resolver already
    /// handed out when durable state lost or never took it.
    async fn anonymous_id(&self) -> String {
        let held = self.anonymous_id.lock().clone();

        if let Some(existing) = self.read(ANONYMOUS_ID).await {
            if is_anonymous_id(&existing) {
                *self.anonymous_id.lock() = Some(existing.clone());
                return existing;
            }
            warn!("Replacing malformed anonymous identifier");
        }

        if let Some(held) = held {
            self.write(ANONYMOUS_ID, &held).await;
            return held;
        }

        let minted = format!("{ANONYMOUS_ID_PREFIX}{:032x}", rand::random::<u128>());
        self.write(ANONYMOUS_ID, &minted).await;
        info!(anonymous_id = %minted, "Minted anonymous identifier");
        *self.anonymous_id.lock() = Some(minted.clone());
        minted
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.state.get(key).await {
            Ok(value) => value,
            Err(error) => {
                warn!(%key, %error, "Could not read durable state");
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &str) {
        if let Err(error) = self.state.set(key, value).await {
            warn!(%key, %error, "Could not write durable state");
        }
    }

    fn report(&self, resolution: Resolution) -> Resolution {
        if resolution.is_degraded() {
            warn!(
                source = ?resolution.source,
                namespace = %resolution.namespace,
                "Namespace resolution degraded"
            );
        } else {
            debug!(namespace = %resolution.namespace, "Resolved namespace from session profile");
        }
        if resolution.changed {
            info!(namespace = %resolution.namespace, "Namespace changed");
        }
        resolution
    }
}

fn is_anonymous_id(candidate: &str) -> bool {
    candidate
        .strip_prefix(ANONYMOUS_ID_PREFIX)
        .is_some_and(|hex| {
            hex.len() == 32 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use cubby_credentials::{IdentityKind, SessionIdentity, TestAuthenticator};
    use cubby_storage::{DurableState, MemoryState, StateError};

    use super::*;

    fn resolver(
        authenticator: &Arc<TestAuthenticator>,
        state: &Arc<MemoryState>,
    ) -> NamespaceResolver<TestAuthenticator, MemoryState> {
        NamespaceResolver::new(authenticator.clone(), state.clone())
            .with_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn it_prefers_the_profile_email() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");

        let resolution = resolver(&authenticator, &state).resolve().await;

        assert_eq!(resolution.namespace.as_str(), "users/a-at-b-dot-com/");
        assert_eq!(resolution.source, ResolutionSource::SessionProfile);
        assert!(resolution.changed);
        assert!(!resolution.is_degraded());
        assert_eq!(
            state.get(STABLE_KEY_HINT).await?.as_deref(),
            Some("a@b.com")
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_no_change_for_the_same_profile() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);

        resolver.resolve().await;
        let again = resolver.resolve().await;

        assert!(!again.changed);
        Ok(())
    }

    #[tokio::test]
    async fn it_uses_the_hint_while_the_session_is_unreadable() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);
        resolver.resolve().await;

        authenticator.set_session_latency(Duration::from_secs(5));
        let resolution = resolver.resolve().await;

        assert_eq!(resolution.namespace.as_str(), "users/a-at-b-dot-com/");
        assert_eq!(resolution.source, ResolutionSource::PersistedHint);
        assert!(resolution.is_degraded());
        Ok(())
    }

    #[tokio::test]
    async fn it_uses_the_hint_for_the_same_subject_without_profile() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);
        resolver.resolve().await;

        // Same session, profile attributes not loaded yet
        authenticator.sign_in_with(SessionIdentity::new(TestAuthenticator::subject_for(
            "a@b.com",
        )));
        let resolution = resolver.resolve().await;

        assert_eq!(resolution.source, ResolutionSource::PersistedHint);
        assert_eq!(resolution.namespace.as_str(), "users/a-at-b-dot-com/");
        Ok(())
    }

    #[tokio::test]
    async fn it_ignores_a_hint_recorded_for_another_session() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);
        resolver.resolve().await;

        authenticator.sign_in_with(SessionIdentity::new("3f2a9c1e-opaque"));
        let resolution = resolver.resolve().await;

        assert_eq!(resolution.source, ResolutionSource::Anonymous);
        assert_ne!(resolution.namespace.as_str(), "users/a-at-b-dot-com/");
        Ok(())
    }

    #[tokio::test]
    async fn it_ignores_the_hint_after_sign_out() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);
        resolver.resolve().await;

        authenticator.sign_out();
        let resolution = resolver.resolve().await;

        assert_eq!(resolution.source, ResolutionSource::Anonymous);
        assert_eq!(resolution.kind(), IdentityKind::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn it_accepts_a_bare_subject_shaped_like_a_stable_key() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in_with(SessionIdentity::new("c@d.org"));

        let resolution = resolver(&authenticator, &state).resolve().await;

        assert_eq!(resolution.source, ResolutionSource::SessionSubject);
        assert_eq!(resolution.namespace.as_str(), "users/c-at-d-dot-org/");
        Ok(())
    }

    #[tokio::test]
    async fn it_mints_and_keeps_an_anonymous_identifier() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        let resolver = resolver(&authenticator, &state);

        let first = resolver.resolve().await;
        let second = resolver.resolve().await;

        let stored = state.get(ANONYMOUS_ID).await?.unwrap_or_default();
        assert!(is_anonymous_id(&stored));
        assert_eq!(first.namespace.as_str(), format!("users/{stored}/"));
        assert_eq!(first.namespace, second.namespace);
        Ok(())
    }

    #[tokio::test]
    async fn it_replaces_a_malformed_anonymous_identifier() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        state.set(ANONYMOUS_ID, "../../etc").await?;

        let resolution = resolver(&authenticator, &state).resolve().await;

        let stored = state.get(ANONYMOUS_ID).await?.unwrap_or_default();
        assert!(is_anonymous_id(&stored));
        assert_eq!(resolution.namespace.as_str(), format!("users/{stored}/"));
        Ok(())
    }

    #[tokio::test]
    async fn it_forgets_the_hint_on_the_next_resolution() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        authenticator.sign_in("a@b.com");
        let resolver = resolver(&authenticator, &state);
        resolver.resolve().await;

        resolver.forget_on_next_resolve();
        authenticator.set_reachable(false);
        let resolution = resolver.resolve().await;

        assert_eq!(resolution.source, ResolutionSource::Anonymous);
        assert_eq!(state.get(STABLE_KEY_HINT).await?, None);
        assert_eq!(state.get(STABLE_KEY_SUBJECT).await?, None);
        Ok(())
    }

    struct BrokenState;

    #[async_trait]
    impl DurableState for BrokenState {
        async fn get(&self, _key: &str) -> Result<Option<String>, StateError> {
            Err(StateError::Unavailable("disk on fire".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StateError> {
            Err(StateError::Unavailable("disk on fire".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StateError> {
            Err(StateError::Unavailable("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn it_keeps_the_anonymous_namespace_when_durable_state_is_broken() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let resolver = NamespaceResolver::new(authenticator, Arc::new(BrokenState));

        let first = resolver.resolve().await;
        let second = resolver.resolve().await;

        assert_eq!(first.source, ResolutionSource::Anonymous);
        assert_eq!(first.namespace, second.namespace);
        Ok(())
    }

    #[tokio::test]
    async fn it_restores_a_lost_anonymous_identifier() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let state = Arc::new(MemoryState::default());
        let resolver = resolver(&authenticator, &state);

        let first = resolver.resolve().await;
        state.remove(ANONYMOUS_ID).await?;
        let second = resolver.resolve().await;

        assert_eq!(first.namespace, second.namespace);
        assert_eq!(
            Some(first.namespace.as_str().to_owned()),
            state
                .get(ANONYMOUS_ID)
                .await?
                .map(|id| format!("users/{id}/"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_still_resolves_when_durable_state_is_broken() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let resolver = NamespaceResolver::new(authenticator.clone(), Arc::new(BrokenState));

        let anonymous = resolver.resolve().await;
        assert_eq!(anonymous.source, ResolutionSource::Anonymous);

        authenticator.sign_in("a@b.com");
        let profile = resolver.resolve().await;
        assert_eq!(profile.namespace.as_str(), "users/a-at-b-dot-com/");
        Ok(())
    }
}
