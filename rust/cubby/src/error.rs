use cubby_credentials::CredentialError;
use cubby_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by [crate::Cubby].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CubbyError {
    /// No credentials could be obtained, for the session or anonymously.
    /// Worth retrying later.
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The key lies outside the caller's namespace. Never retried.
    #[error("Key {key} is outside namespace {namespace}")]
    Unauthorized {
        /// The key that was refused.
        key: String,
        /// The namespace the caller resolved to.
        namespace: String,
    },

    /// Writing an upload to the store failed.
    #[error("Upload failed: {0}")]
    UploadFailed(StoreError),

    /// Any other object store failure.
    #[error("Object store operation failed: {0}")]
    Store(StoreError),

    /// The caller abandoned the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CubbyError {
    /// The store failure behind this error, if there is one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::UploadFailed(error) | Self::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl From<CredentialError> for CubbyError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::IdentityUnavailable(reason) => Self::IdentityUnavailable(reason),
        }
    }
}

impl From<StoreError> for CubbyError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
