#![warn(missing_docs)]

//! Identity-scoped access to a shared object store.
//!
//! Every caller, signed in or not, gets a private prefix in one shared
//! bucket: `users/<safe-id>/`, where the id comes from the signed-in user's
//! email, a hint persisted by an earlier run, or an anonymous identifier
//! minted once per installation. [Cubby] ties the pieces together:
//!
//! - a [cubby_credentials::CredentialProvider] holds temporary store
//!   credentials for the session, falling back to the anonymous pool;
//! - a [NamespaceCache] holds the resolved namespace for a while;
//! - every mutating call checks that its key lies under that namespace
//!   before anything reaches the store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use cubby::{Config, Cubby, UploadOptions};
//! use cubby_credentials::Authenticator;
//! use cubby_storage::FileSystemState;
//!
//! # async fn example<A: Authenticator + 'static>(authenticator: A) -> anyhow::Result<()> {
//! let config = Config::from_json(&std::fs::read_to_string("cubby.json")?)?;
//! let state = FileSystemState::new(".cubby").await?;
//! let cubby = Cubby::connect(config, Arc::new(authenticator), Arc::new(state))?;
//!
//! let object = cubby
//!     .upload("notes.txt", Bytes::from_static(b"hello"), "text/plain", UploadOptions::default())
//!     .await?;
//! let link = cubby.shareable_url(&object.key, std::time::Duration::from_secs(3600)).await?;
//! println!("{link}");
//! # Ok(())
//! # }
//! ```

mod cache;
pub use cache::*;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod facade;
pub use facade::*;

mod namespace;
pub use namespace::*;

mod resolver;
pub use resolver::*;
