use std::collections::BTreeMap;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;

use crate::StoreError;

/// A body streamed into the object store.
#[cfg(not(target_arch = "wasm32"))]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send + Sync>>;

/// A body streamed into the object store.
#[cfg(target_arch = "wasm32")]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>>>>;

/// Metadata that travels with an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The MIME type of the content.
    pub content_type: Option<String>,
    /// `Cache-Control` served with the object.
    pub cache_control: Option<String>,
    /// `Content-Disposition` served with the object.
    pub content_disposition: Option<String>,
    /// `Content-Encoding` of the stored bytes.
    pub content_encoding: Option<String>,
    /// User-defined metadata (`x-amz-meta-*` on S3), keyed without the
    /// prefix.
    pub user: BTreeMap<String, String>,
}

impl Metadata {
    /// Metadata carrying only a content type.
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// The standard HTTP headers set on this object, lower-cased.
    pub fn standard_headers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("content-type", &self.content_type),
            ("cache-control", &self.cache_control),
            ("content-disposition", &self.content_disposition),
            ("content-encoding", &self.content_encoding),
        ]
        .into_iter()
        .filter_map(|(name, value)| Some((name, value.as_deref()?)))
    }
}

/// An object to be written.
pub struct PutObject {
    /// Full object key.
    pub key: String,
    /// Exact number of bytes `body` will yield.
    pub content_length: u64,
    /// Content type and user metadata to store with the object.
    pub metadata: Metadata,
    /// The content.
    pub body: ByteStream,
}

impl std::fmt::Debug for PutObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutObject")
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// One object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was last written, if the store reported it.
    pub last_modified: Option<DateTime<Utc>>,
}

/// What a HEAD request reports about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was last written, if the store reported it.
    pub last_modified: Option<DateTime<Utc>>,
    /// Content type and user metadata.
    pub metadata: Metadata,
}
