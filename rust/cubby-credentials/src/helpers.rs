use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use cubby_common::time::utc_now;
use parking_lot::Mutex;

use crate::{
    AuthenticationError, Authenticator, CredentialSet, EMAIL_ATTRIBUTE, IdentityKind, Principal,
    SessionCallback, SessionEvent, SessionIdentity,
};

#[derive(Debug)]
struct State {
    session: Option<SessionIdentity>,
    reachable: bool,
    refuse_session_credentials: bool,
    session_latency: Duration,
    credential_lifetime: Duration,
    identity_calls: usize,
    issue_calls: usize,
    issued: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            session: None,
            reachable: true,
            refuse_session_credentials: false,
            session_latency: Duration::ZERO,
            credential_lifetime: Duration::from_secs(3600),
            identity_calls: 0,
            issue_calls: 0,
            issued: 0,
        }
    }
}

/// A scriptable in-process [Authenticator] for tests.
///
/// Starts signed out and reachable. Issued credentials carry `ASIA…` access
/// keys, a session token, and a one hour lifetime unless told otherwise.
#[derive(Default)]
pub struct TestAuthenticator {
    state: Mutex<State>,
    listeners: Mutex<Vec<SessionCallback>>,
}

impl TestAuthenticator {
    /// The opaque subject assigned to sessions started with
    /// [TestAuthenticator::sign_in].
    pub fn subject_for(email: &str) -> String {
        format!("subject:{email}")
    }

    /// Start a session for `email`, with the email loaded as a profile
    /// attribute.
    pub fn sign_in(&self, email: &str) {
        self.sign_in_with(
            SessionIdentity::new(Self::subject_for(email)).with_attribute(EMAIL_ATTRIBUTE, email),
        );
    }

    /// Start an arbitrary session.
    pub fn sign_in_with(&self, session: SessionIdentity) {
        let subject = session.subject.clone();
        self.state.lock().session = Some(session);
        self.notify(SessionEvent::SignedIn { subject });
    }

    /// Set a profile attribute on the current session without announcing a
    /// session change, as when attributes finish loading after sign-in.
    pub fn update_profile(&self, name: &str, value: &str) {
        if let Some(session) = self.state.lock().session.as_mut() {
            session.attributes.insert(name.to_owned(), value.to_owned());
        }
    }

    /// End the current session.
    pub fn sign_out(&self) {
        self.state.lock().session = None;
        self.notify(SessionEvent::SignedOut);
    }

    /// Make every call fail with [AuthenticationError::Unavailable] while
    /// `reachable` is false.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Refuse to issue session-scoped credentials; the anonymous pool keeps
    /// working.
    pub fn refuse_session_credentials(&self, refuse: bool) {
        self.state.lock().refuse_session_credentials = refuse;
    }

    /// Delay every session lookup by `latency`.
    pub fn set_session_latency(&self, latency: Duration) {
        self.state.lock().session_latency = latency;
    }

    /// Lifetime of credentials issued from now on.
    pub fn set_credential_lifetime(&self, lifetime: Duration) {
        self.state.lock().credential_lifetime = lifetime;
    }

    /// Number of session lookups so far.
    pub fn identity_calls(&self) -> usize {
        self.state.lock().identity_calls
    }

    /// Number of credential requests so far, successful or not.
    pub fn issue_calls(&self) -> usize {
        self.state.lock().issue_calls
    }

    fn notify(&self, event: SessionEvent) {
        for listener in self.listeners.lock().iter() {
            listener(event.clone());
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Authenticator for TestAuthenticator {
    async fn current_identity(&self) -> Result<SessionIdentity, AuthenticationError> {
        let (latency, outcome) = {
            let mut state = self.state.lock();
            state.identity_calls += 1;
            let outcome = if !state.reachable {
                Err(AuthenticationError::Unavailable(
                    "identity service offline".into(),
                ))
            } else {
                state
                    .session
                    .clone()
                    .ok_or(AuthenticationError::NotAuthenticated)
            };
            (state.session_latency, outcome)
        };

        #[cfg(not(target_arch = "wasm32"))]
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        #[cfg(target_arch = "wasm32")]
        let _ = latency;

        outcome
    }

    async fn issue_temporary_credentials(
        &self,
        principal: &Principal,
    ) -> Result<CredentialSet, AuthenticationError> {
        let mut state = self.state.lock();
        state.issue_calls += 1;

        if !state.reachable {
            return Err(AuthenticationError::Unavailable(
                "identity service offline".into(),
            ));
        }

        if let Principal::Session(subject) = principal {
            if state.refuse_session_credentials {
                return Err(AuthenticationError::Rejected(
                    "session credentials refused".into(),
                ));
            }
            let current = state.session.as_ref().map(|session| &session.subject);
            if current != Some(subject) {
                return Err(AuthenticationError::Rejected(format!(
                    "no session for {subject}"
                )));
            }
        }

        state.issued += 1;
        let lifetime = TimeDelta::from_std(state.credential_lifetime)
            .map_err(|error| AuthenticationError::Rejected(error.to_string()))?;
        let kind = match principal {
            Principal::Session(_) => IdentityKind::Authenticated,
            Principal::Anonymous(_) => IdentityKind::Anonymous,
        };

        Ok(CredentialSet::new(
            format!("ASIATEST{:08}", state.issued),
            format!("secret-{}", state.issued),
            utc_now() + lifetime,
            kind,
        )
        .with_session_token(format!("token-{}", state.issued)))
    }

    fn on_session_change(&self, callback: SessionCallback) {
        self.listeners.lock().push(callback);
    }
}
