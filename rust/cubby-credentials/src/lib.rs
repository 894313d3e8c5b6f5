#![warn(missing_docs)]

//! Temporary object-store credentials for authenticated and anonymous
//! callers.
//!
//! The [CredentialProvider] asks an [Authenticator] for credentials scoped to
//! the current session and falls back to the anonymous identity pool when no
//! session is available. The resulting [CredentialSet] is held until it
//! nears expiry or is explicitly invalidated, and concurrent callers that
//! find nothing held share a single request to the identity service.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cubby_credentials::{Authenticator, CredentialProvider};
//!
//! # async fn example<A: Authenticator>(authenticator: A) -> Result<(), Box<dyn std::error::Error>> {
//! let provider = CredentialProvider::new(Arc::new(authenticator), "us-east-1:public-pool");
//! let credentials = provider.acquire().await?;
//! println!("issued for {:?} until {}", credentials.kind(), credentials.expires_at());
//! # Ok(())
//! # }
//! ```

mod authenticator;
pub use authenticator::*;

mod credentials;
pub use credentials::*;

mod error;
pub use error::*;

mod identity;
pub use identity::*;

mod provider;
pub use provider::*;

#[cfg(any(test, feature = "helpers"))]
mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::*;
