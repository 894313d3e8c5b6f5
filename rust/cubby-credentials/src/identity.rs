use std::collections::BTreeMap;

/// Profile attribute carrying the user's email address.
pub const EMAIL_ATTRIBUTE: &str = "email";

/// Whether a principal proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Backed by a signed-in session.
    Authenticated,
    /// The shared public identity pool.
    Anonymous,
}

/// A principal as seen by one namespace resolution attempt.
///
/// Identities are never persisted; only the namespace derived from their
/// stable key is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Whether the identity is backed by a session.
    pub kind: IdentityKind,
    /// Identity-derived string a namespace is built from.
    pub stable_key: String,
    /// Provider-assigned identifier, when one is known. May differ from
    /// `stable_key`.
    pub credential_subject_id: Option<String>,
}

impl Identity {
    /// An authenticated identity.
    pub fn authenticated(stable_key: impl Into<String>, subject: Option<String>) -> Self {
        Self {
            kind: IdentityKind::Authenticated,
            stable_key: stable_key.into(),
            credential_subject_id: subject,
        }
    }

    /// An anonymous identity keyed by a generated identifier.
    pub fn anonymous(anonymous_id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Anonymous,
            stable_key: anonymous_id.into(),
            credential_subject_id: None,
        }
    }
}

/// What the authentication collaborator knows about the signed-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Provider-assigned session subject (often an opaque UUID).
    pub subject: String,
    /// User-profile attributes, e.g. `email`.
    pub attributes: BTreeMap<String, String>,
}

impl SessionIdentity {
    /// A session with no profile attributes loaded yet.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add a profile attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The `email` profile attribute, if loaded.
    pub fn email(&self) -> Option<&str> {
        self.attributes.get(EMAIL_ATTRIBUTE).map(String::as_str)
    }
}

/// Who temporary credentials are requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The signed-in session with this subject.
    Session(String),
    /// The well-known anonymous identity pool with this id.
    Anonymous(String),
}

impl Principal {
    /// The identity kind credentials for this principal are issued for.
    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::Session(_) => IdentityKind::Authenticated,
            Self::Anonymous(_) => IdentityKind::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reads_the_email_attribute() {
        let session = SessionIdentity::new("0f1c-uuid").with_attribute("email", "a@b.com");

        assert_eq!(session.email(), Some("a@b.com"));
        assert_eq!(SessionIdentity::new("0f1c-uuid").email(), None);
    }

    #[test]
    fn it_maps_principals_to_identity_kinds() {
        assert_eq!(
            Principal::Session("sub".into()).kind(),
            IdentityKind::Authenticated
        );
        assert_eq!(
            Principal::Anonymous("pool".into()).kind(),
            IdentityKind::Anonymous
        );
    }
}
