#![warn(missing_docs)]

//! Object-store access and durable client state.
//!
//! The [ObjectStore] trait is the seam between the storage facade and
//! whatever actually holds the bytes. [s3::Bucket] speaks the S3 REST API,
//! signing every request with SigV4 query-string authentication using the
//! temporary [cubby_credentials::CredentialSet] handed to it per call.
//!
//! [DurableState] is the one place small pieces of client state (identity
//! hints, the anonymous identifier) are written to so they survive restarts.

mod error;
pub use error::*;

mod object;
pub use object::*;

mod store;
pub use store::*;

mod state;
pub use state::*;

pub mod s3;

#[cfg(any(test, feature = "helpers"))]
mod helpers;
#[cfg(any(test, feature = "helpers"))]
pub use helpers::*;
