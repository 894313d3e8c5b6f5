use thiserror::Error;

/// Errors reported by an [crate::ObjectStore].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object store could not be reached.
    #[error("Failed to connect to object store: {0}")]
    ConnectionFailed(String),

    /// The request was sent but did not complete.
    #[error("Object store request failed: {0}")]
    RequestFailed(String),

    /// The store refused the credentials the request was signed with.
    #[error("Access denied: {0}")]
    Denied(String),

    /// The addressed object does not exist.
    #[error("No such object: {0}")]
    NotFound(String),

    /// The store answered with an error of its own.
    #[error("Object store error: {0}")]
    ServiceError(String),

    /// The request could not be signed.
    #[error("Failed to authorize request: {0}")]
    AuthorizationError(String),

    /// A response could not be understood.
    #[error("Failed to parse object store response: {0}")]
    SerializationError(String),

    /// Reading the body being uploaded failed.
    #[error("Failed to read upload body: {0}")]
    BodyFailed(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        {
            if error.is_connect() {
                StoreError::ConnectionFailed(error.to_string())
            } else {
                StoreError::RequestFailed(error.to_string())
            }
        }
        #[cfg(target_arch = "wasm32")]
        {
            StoreError::RequestFailed(error.to_string())
        }
    }
}

/// Errors reported by a [crate::DurableState].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The backing medium could not be read or written.
    #[error("Durable state unavailable: {0}")]
    Unavailable(String),

    /// A stored value is not valid UTF-8.
    #[error("Durable state is corrupt: {0}")]
    Corrupt(String),
}
