//! An [ObjectStore] speaking the S3 REST API.
//!
//! Works against any S3-compatible service (AWS S3, Cloudflare R2, MinIO).
//! Requests are signed per call with the [CredentialSet] the caller passes
//! in, so one [Bucket] serves authenticated and anonymous callers alike.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cubby_credentials::CredentialSet;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{Metadata, ObjectEntry, ObjectHead, ObjectStore, PutObject, StoreError};

pub mod access;
mod list;
pub use list::*;

use access::{Invocation, MAX_EXPIRES, authorize, percent_encode_path};
use list::ErrorDocument;

/// Prefix S3 puts in front of user metadata header names.
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Where a bucket lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    /// The S3-compatible endpoint (e.g. "https://s3.us-east-1.amazonaws.com").
    pub endpoint: String,
    /// The region requests are signed for ("auto" for R2).
    pub region: String,
    /// The bucket name.
    pub bucket: String,
    /// Force path-style (`endpoint/bucket/key`) or virtual-hosted
    /// (`bucket.endpoint/key`) URLs. Unset means path-style for IP
    /// addresses and `localhost`, virtual-hosted otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_style: Option<bool>,
}

impl Address {
    /// An address with the default URL style.
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: region.into(),
            bucket: bucket.into(),
            path_style: None,
        }
    }

    /// Force the URL style.
    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = Some(path_style);
        self
    }
}

/// True when `endpoint` is addressed by IP or is `localhost`, where
/// virtual-hosted buckets cannot resolve.
pub fn is_path_style_default(endpoint: &Url) -> bool {
    use url::Host;
    match endpoint.host() {
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        Some(Host::Domain(domain)) => domain == "localhost",
        None => false,
    }
}

/// A bucket reached over HTTP.
#[derive(Debug, Clone)]
pub struct Bucket {
    endpoint: Url,
    region: String,
    bucket: String,
    path_style: bool,
    client: reqwest::Client,
}

impl Bucket {
    /// Open the bucket at `address`.
    pub fn open(address: &Address) -> Result<Self, StoreError> {
        let endpoint = Url::parse(&address.endpoint).map_err(|error| {
            StoreError::AuthorizationError(format!("Invalid endpoint {}: {error}", address.endpoint))
        })?;
        if endpoint.host_str().is_none() {
            return Err(StoreError::AuthorizationError(format!(
                "Invalid endpoint {}: no host",
                address.endpoint
            )));
        }
        let path_style = address
            .path_style
            .unwrap_or_else(|| is_path_style_default(&endpoint));

        Ok(Self {
            endpoint,
            region: address.region.clone(),
            bucket: address.bucket.clone(),
            path_style,
            client: reqwest::Client::new(),
        })
    }

    /// URL of `key`, or of the bucket itself when `key` is empty.
    pub fn url(&self, key: &str) -> Result<Url, StoreError> {
        let key = percent_encode_path(key);
        let mut url = self.endpoint.clone();
        if self.path_style {
            url.set_path(&format!("{}/{}", self.bucket, key));
        } else {
            let host = self.endpoint.host_str().unwrap_or_default();
            url.set_host(Some(&format!("{}.{}", self.bucket, host)))
                .map_err(|error| StoreError::AuthorizationError(format!("Invalid host: {error}")))?;
            url.set_path(&format!("/{key}"));
        }
        Ok(url)
    }

    fn request(&self, method: &'static str, url: Url) -> Request {
        Request {
            method,
            url,
            region: self.region.clone(),
            headers: Vec::new(),
            expires: access::DEFAULT_EXPIRES,
        }
    }

    async fn send(
        &self,
        credentials: &CredentialSet,
        request: &Request,
        body: Option<(reqwest::Body, u64)>,
    ) -> Result<reqwest::Response, StoreError> {
        let authorized = authorize(credentials, request)
            .map_err(|error| StoreError::AuthorizationError(error.to_string()))?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|error| StoreError::RequestFailed(error.to_string()))?;
        let mut builder = self.client.request(method, authorized.url);
        for (name, value) in authorized.headers {
            // reqwest derives host from the URL
            if name != "host" {
                builder = builder.header(name, value);
            }
        }
        if let Some((body, content_length)) = body {
            // S3 refuses chunked uploads, so the length is always declared
            builder = builder
                .header("content-length", content_length.to_string())
                .body(body);
        }

        let response = builder.send().await?;
        check(response, request).await
    }
}

/// Turn non-success responses into the matching [StoreError].
async fn check(
    response: reqwest::Response,
    request: &Request,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = ErrorDocument::parse(&body)
        .map(|error| error.describe())
        .unwrap_or_else(|| status.to_string());

    warn!(method = request.method, url = %request.url.path(), %status, "Object store request failed");

    Err(match status.as_u16() {
        401 | 403 => StoreError::Denied(detail),
        404 => StoreError::NotFound(request.url.path().to_string()),
        _ => StoreError::ServiceError(detail),
    })
}

/// A signed S3 call.
#[derive(Debug)]
struct Request {
    method: &'static str,
    url: Url,
    region: String,
    headers: Vec<(String, String)>,
    expires: u64,
}

impl Request {
    fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn with_metadata(mut self, metadata: &Metadata) -> Self {
        for (name, value) in metadata.standard_headers() {
            self = self.with_header(name, value);
        }
        for (name, value) in &metadata.user {
            self = self.with_header(format!("{USER_METADATA_PREFIX}{name}"), value);
        }
        self
    }
}

impl Invocation for Request {
    fn method(&self) -> &'static str {
        self.method
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn expires(&self) -> u64 {
        self.expires
    }
}

fn read_metadata(headers: &HeaderMap) -> Metadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    let user = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
            Some((name.to_owned(), value.to_str().ok()?.to_owned()))
        })
        .collect::<BTreeMap<_, _>>();

    Metadata {
        content_type: header("content-type"),
        cache_control: header("cache-control"),
        content_disposition: header("content-disposition"),
        content_encoding: header("content-encoding"),
        user,
    }
}

fn read_last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get("last-modified")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

#[cfg(not(target_arch = "wasm32"))]
async fn into_body(object: PutObject) -> Result<reqwest::Body, StoreError> {
    Ok(reqwest::Body::wrap_stream(object.body))
}

#[cfg(target_arch = "wasm32")]
async fn into_body(mut object: PutObject) -> Result<reqwest::Body, StoreError> {
    use futures_util::TryStreamExt;

    // fetch cannot stream request bodies
    let mut buffer = Vec::with_capacity(object.content_length as usize);
    while let Some(chunk) = object.body.try_next().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(reqwest::Body::from(buffer))
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ObjectStore for Bucket {
    async fn put(&self, credentials: &CredentialSet, object: PutObject) -> Result<(), StoreError> {
        let request = self
            .request("PUT", self.url(&object.key)?)
            .with_metadata(&object.metadata);
        debug!(key = %object.key, size = object.content_length, "Putting object");

        let content_length = object.content_length;
        let body = into_body(object).await?;
        self.send(credentials, &request, Some((body, content_length)))
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        credentials: &CredentialSet,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut url = self.url("")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("list-type", "2");
                query.append_pair("prefix", prefix);
                if let Some(token) = &continuation_token {
                    query.append_pair("continuation-token", token);
                }
            }

            let request = self.request("GET", url);
            let response = self.send(credentials, &request, None).await?;
            let body = response.text().await?;
            let page = parse_list_response(&body)?;

            entries.extend(page.entries);
            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        debug!(%prefix, count = entries.len(), "Listed objects");
        Ok(entries)
    }

    async fn head(&self, credentials: &CredentialSet, key: &str) -> Result<ObjectHead, StoreError> {
        let request = self.request("HEAD", self.url(key)?);
        let response = self.send(credentials, &request, None).await?;
        let headers = response.headers();

        let size = headers
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        Ok(ObjectHead {
            key: key.to_owned(),
            size,
            last_modified: read_last_modified(headers),
            metadata: read_metadata(headers),
        })
    }

    async fn delete(&self, credentials: &CredentialSet, key: &str) -> Result<(), StoreError> {
        let request = self.request("DELETE", self.url(key)?);
        match self.send(credentials, &request, None).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn copy_with_metadata(
        &self,
        credentials: &CredentialSet,
        key: &str,
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        let source = format!("/{}/{}", self.bucket, percent_encode_path(key));
        let request = self
            .request("PUT", self.url(key)?)
            .with_header("x-amz-copy-source", source)
            .with_header("x-amz-metadata-directive", "REPLACE")
            .with_metadata(&metadata);

        let response = self.send(credentials, &request, None).await?;

        // A copy can fail after S3 has already answered 200
        let body = response.text().await?;
        if let Some(error) = ErrorDocument::parse(&body) {
            return Err(StoreError::ServiceError(error.describe()));
        }
        Ok(())
    }

    fn presign(
        &self,
        credentials: &CredentialSet,
        key: &str,
        ttl: Duration,
    ) -> Result<Url, StoreError> {
        let mut request = self.request("GET", self.url(key)?);
        request.expires = ttl.as_secs().clamp(1, MAX_EXPIRES);

        authorize(credentials, &request)
            .map(|authorization| authorization.url)
            .map_err(|error| StoreError::AuthorizationError(error.to_string()))
    }
}
