use async_trait::async_trait;
use cubby_common::ConditionalSync;

use crate::{AuthenticationError, CredentialSet, Principal, SessionIdentity};

/// A change in the signed-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session for `subject` became active.
    SignedIn {
        /// Subject of the new session.
        subject: String,
    },
    /// The session ended.
    SignedOut,
}

/// Listener registered with [Authenticator::on_session_change].
#[cfg(not(target_arch = "wasm32"))]
pub type SessionCallback = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Listener registered with [Authenticator::on_session_change].
#[cfg(target_arch = "wasm32")]
pub type SessionCallback = Box<dyn Fn(SessionEvent)>;

/// The third-party identity service, seen from the storage layer.
///
/// Sign-up, sign-in and password flows live elsewhere; the storage layer
/// only needs to know who is signed in and to trade that for temporary
/// credentials.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Authenticator: ConditionalSync {
    /// The current session, or [AuthenticationError::NotAuthenticated].
    async fn current_identity(&self) -> Result<SessionIdentity, AuthenticationError>;

    /// Issue temporary credentials for `principal`.
    async fn issue_temporary_credentials(
        &self,
        principal: &Principal,
    ) -> Result<CredentialSet, AuthenticationError>;

    /// Register `callback` to be told about sign-ins and sign-outs.
    fn on_session_change(&self, callback: SessionCallback);
}
