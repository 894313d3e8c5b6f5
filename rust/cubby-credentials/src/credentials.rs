use chrono::{DateTime, TimeDelta, Utc};

use crate::IdentityKind;

/// Temporary object-store credentials.
///
/// The secret half never shows up in `Debug` output, so a set can be logged
/// or traced safely.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expires_at: DateTime<Utc>,
    kind: IdentityKind,
}

impl CredentialSet {
    /// Create a credential set issued for `kind` that lapses at `expires_at`.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        expires_at: DateTime<Utc>,
        kind: IdentityKind,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at,
            kind,
        }
    }

    /// Attach the session token that temporary credentials are signed with.
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    /// Re-label the set with the identity kind it was requested for.
    pub fn issued_for(mut self, kind: IdentityKind) -> Self {
        self.kind = kind;
        self
    }

    /// The access key id.
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret access key.
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// The session token, for temporary credentials.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// When the credentials stop working.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The identity kind these credentials were issued for.
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// True while the set has more than `margin` left at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        now + margin < self.expires_at
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("kind", &self.kind)
            .finish()
    }
}
