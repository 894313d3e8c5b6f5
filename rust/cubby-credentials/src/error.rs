use thiserror::Error;

/// Errors reported by the authentication collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Nobody is signed in.
    #[error("No authenticated session")]
    NotAuthenticated,

    /// The identity service could not be reached.
    #[error("Identity service unreachable: {0}")]
    Unavailable(String),

    /// The identity service refused the request.
    #[error("Identity service rejected the request: {0}")]
    Rejected(String),
}

/// Errors produced while acquiring credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Neither session-scoped nor anonymous credentials could be obtained.
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),
}
