//! ListObjectsV2 response parsing.
//!
//! See [ListObjectsV2](https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListObjectsV2.html).

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{ObjectEntry, StoreError};

/// One page of a listing.
#[derive(Debug)]
pub struct ListPage {
    /// Objects on this page.
    pub entries: Vec<ObjectEntry>,
    /// Token to fetch the next page with, when the listing was truncated.
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "ListBucketResult")]
struct ListBucketResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "Contents", default)]
    contents: Vec<Contents>,
    #[serde(rename = "NextContinuationToken")]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contents {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "LastModified")]
    last_modified: Option<String>,
}

/// S3 `<Error>` document, returned for failures such as `NoSuchBucket` or
/// `AccessDenied` and occasionally inside a 200 response to a copy.
#[derive(Debug, Deserialize)]
#[serde(rename = "Error")]
pub(crate) struct ErrorDocument {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

impl ErrorDocument {
    pub(crate) fn parse(xml: &str) -> Option<Self> {
        if !xml.contains("<Error") {
            return None;
        }
        quick_xml::de::from_str(xml).ok()
    }

    pub(crate) fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.code, message),
            None => self.code.clone(),
        }
    }
}

/// Parse one ListObjectsV2 page.
pub fn parse_list_response(xml: &str) -> Result<ListPage, StoreError> {
    if let Some(error) = ErrorDocument::parse(xml) {
        return Err(StoreError::ServiceError(error.describe()));
    }

    // quick-xml happily parses unrelated documents into defaults
    if !xml.contains("<ListBucketResult") {
        return Err(StoreError::SerializationError(
            "Unexpected XML response: missing ListBucketResult element".into(),
        ));
    }

    let result: ListBucketResult = quick_xml::de::from_str(xml)
        .map_err(|e| StoreError::SerializationError(format!("Failed to parse XML: {e}")))?;

    let is_truncated = result.is_truncated;
    let entries = result
        .contents
        .into_iter()
        .map(|contents| ObjectEntry {
            key: contents.key,
            size: contents.size,
            last_modified: contents
                .last_modified
                .as_deref()
                .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
                .map(|value| value.with_timezone(&Utc)),
        })
        .collect();

    Ok(ListPage {
        entries,
        next_continuation_token: result.next_continuation_token.filter(|_| is_truncated),
    })
}
