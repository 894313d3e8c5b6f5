use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use cubby_common::Flight;
use cubby_common::time::{timeout, utc_now};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    AuthenticationError, Authenticator, CredentialError, CredentialSet, IdentityKind, Principal,
};

/// Default bound on every call to the identity service.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default head start taken when renewing credentials before they lapse.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Obtains, holds and renews the [CredentialSet] used to reach the object
/// store.
///
/// Acquisition prefers credentials scoped to the signed-in session and falls
/// back to the anonymous identity pool. Whatever is issued is held until it
/// comes within the renewal margin of its expiry or until
/// [CredentialProvider::invalidate] is called.
///
/// Every successful acquisition publishes the authenticated session subject
/// (or `None` for anonymous credentials) on a watch channel, so namespace
/// caches can notice that the identity behind the credentials moved.
pub struct CredentialProvider<Auth>
where
    Auth: Authenticator,
{
    authenticator: Arc<Auth>,
    pool: String,
    timeout: Duration,
    renewal_margin: Duration,
    held: Flight<CredentialSet, CredentialError>,
    subject: watch::Sender<Option<String>>,
}

impl<Auth> CredentialProvider<Auth>
where
    Auth: Authenticator,
{
    /// Create a provider that falls back to the anonymous identity `pool`.
    pub fn new(authenticator: Arc<Auth>, pool: impl Into<String>) -> Self {
        let (subject, _) = watch::channel(None);
        Self {
            authenticator,
            pool: pool.into(),
            timeout: DEFAULT_AUTH_TIMEOUT,
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
            held: Flight::default(),
            subject,
        }
    }

    /// Bound each identity service call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renew credentials once they have less than `margin` left.
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Observe the subject of the most recently acquired credentials.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.subject.subscribe()
    }

    /// Return the held credentials, or acquire new ones.
    ///
    /// Concurrent callers that find nothing usable held share one request to
    /// the identity service and all observe its result.
    pub async fn acquire(&self) -> Result<CredentialSet, CredentialError> {
        let margin = TimeDelta::from_std(self.renewal_margin).unwrap_or(TimeDelta::zero());
        self.held
            .run(
                |credentials| credentials.is_live_at(utc_now(), margin),
                || self.issue(),
            )
            .await
    }

    /// Drop the held credentials; the next [CredentialProvider::acquire]
    /// resolves the session again from scratch.
    pub fn invalidate(&self) {
        debug!("Invalidating held credentials");
        self.held.invalidate();
    }

    async fn issue(&self) -> Result<CredentialSet, CredentialError> {
        match timeout(self.timeout, self.authenticator.current_identity()).await {
            Ok(Ok(session)) => {
                let principal = Principal::Session(session.subject.clone());
                match self.request(&principal).await {
                    Ok(credentials) => {
                        info!(
                            subject = %session.subject,
                            expires_at = %credentials.expires_at(),
                            "Acquired session credentials"
                        );
                        self.publish(Some(session.subject));
                        return Ok(credentials);
                    }
                    Err(error) => {
                        warn!(subject = %session.subject, error = %error, "Session credentials unavailable, falling back to anonymous");
                    }
                }
            }
            Ok(Err(AuthenticationError::NotAuthenticated)) => {
                debug!("No session, requesting anonymous credentials");
            }
            Ok(Err(error)) => {
                warn!(error = %error, "Could not read session, falling back to anonymous");
            }
            Err(elapsed) => {
                warn!(error = %elapsed, "Session lookup timed out, falling back to anonymous");
            }
        }

        let principal = Principal::Anonymous(self.pool.clone());
        let credentials = self.request(&principal).await.inspect_err(
            |error| warn!(pool = %self.pool, error = %error, "Anonymous credentials unavailable"),
        )?;

        info!(expires_at = %credentials.expires_at(), "Acquired anonymous credentials");
        self.publish(None);
        Ok(credentials)
    }

    async fn request(&self, principal: &Principal) -> Result<CredentialSet, CredentialError> {
        let issued = timeout(
            self.timeout,
            self.authenticator.issue_temporary_credentials(principal),
        )
        .await
        .map_err(|elapsed| CredentialError::IdentityUnavailable(elapsed.to_string()))?
        .map_err(|error| CredentialError::IdentityUnavailable(error.to_string()))?;

        // The label is ours to decide; never trust the issuer to keep
        // session and anonymous credentials apart.
        Ok(issued.issued_for(principal.kind()))
    }

    fn publish(&self, subject: Option<String>) {
        self.subject.send_if_modified(|current| {
            if *current == subject {
                false
            } else {
                *current = subject;
                true
            }
        });
    }
}

impl<Auth> CredentialProvider<Auth>
where
    Auth: Authenticator,
{
    /// The kind of the credentials currently held, if any.
    pub async fn held_kind(&self) -> Option<IdentityKind> {
        self.held.peek().await.map(|credentials| credentials.kind())
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use futures_util::future::join_all;

    use super::CredentialProvider;
    use crate::{CredentialError, IdentityKind, TestAuthenticator};

    fn provider(authenticator: &Arc<TestAuthenticator>) -> CredentialProvider<TestAuthenticator> {
        CredentialProvider::new(authenticator.clone(), "test-pool")
            .with_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn it_issues_anonymous_credentials_without_a_session() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let provider = provider(&authenticator);

        let credentials = provider.acquire().await?;

        assert_eq!(credentials.kind(), IdentityKind::Anonymous);
        assert_eq!(*provider.subscribe().borrow(), None);
        Ok(())
    }

    #[tokio::test]
    async fn it_prefers_session_credentials() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.sign_in("a@b.com");
        let provider = provider(&authenticator);

        let credentials = provider.acquire().await?;

        assert_eq!(credentials.kind(), IdentityKind::Authenticated);
        assert_eq!(
            provider.subscribe().borrow().as_deref(),
            Some(TestAuthenticator::subject_for("a@b.com").as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_falls_back_when_session_credentials_are_refused() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.sign_in("a@b.com");
        authenticator.refuse_session_credentials(true);
        let provider = provider(&authenticator);

        let credentials = provider.acquire().await?;

        assert_eq!(credentials.kind(), IdentityKind::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn it_falls_back_when_the_session_lookup_hangs() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.sign_in("a@b.com");
        authenticator.set_session_latency(Duration::from_secs(5));
        let provider = provider(&authenticator);

        let credentials = provider.acquire().await?;

        assert_eq!(credentials.kind(), IdentityKind::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn it_fails_when_the_identity_service_is_unreachable() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.set_reachable(false);
        let provider = provider(&authenticator);

        let result = provider.acquire().await;

        assert!(matches!(
            result,
            Err(CredentialError::IdentityUnavailable(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn it_reuses_live_credentials() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let provider = provider(&authenticator);

        let first = provider.acquire().await?;
        let second = provider.acquire().await?;

        assert_eq!(first, second);
        assert_eq!(authenticator.issue_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_renews_credentials_inside_the_margin() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.set_credential_lifetime(Duration::from_secs(30));
        let provider = provider(&authenticator).with_renewal_margin(Duration::from_secs(60));

        provider.acquire().await?;
        provider.acquire().await?;

        assert_eq!(authenticator.issue_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn it_collapses_concurrent_acquisitions() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        authenticator.set_session_latency(Duration::from_millis(20));
        authenticator.sign_in("a@b.com");
        let provider = provider(&authenticator);

        let results = join_all((0..8).map(|_| provider.acquire())).await;

        assert_eq!(authenticator.issue_calls(), 1);
        let first = results[0].clone()?;
        for result in results {
            assert_eq!(result?, first);
        }
        Ok(())
    }

    #[tokio::test]
    async fn it_starts_over_after_invalidation() -> Result<()> {
        let authenticator = Arc::new(TestAuthenticator::default());
        let provider = provider(&authenticator);

        let anonymous = provider.acquire().await?;
        authenticator.sign_in("a@b.com");

        // Held credentials are not swapped behind the caller's back
        assert_eq!(provider.acquire().await?, anonymous);

        provider.invalidate();
        let credentials = provider.acquire().await?;

        assert_eq!(credentials.kind(), IdentityKind::Authenticated);
        assert_eq!(provider.held_kind().await, Some(IdentityKind::Authenticated));
        Ok(())
    }
}
