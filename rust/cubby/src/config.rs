use std::time::Duration;

use cubby_storage::s3::Address;
use serde::{Deserialize, Serialize};

use crate::CubbyError;

/// Default lifetime cap for shareable URLs: 7 days.
pub const DEFAULT_MAX_SHARE_TTL: Duration = Duration::from_secs(604_800);

/// Default size of the chunks uploads are streamed in: 64 KiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Settings for a [crate::Cubby].
///
/// Durations are written as whole seconds when (de)serialized:
///
/// ```
/// use cubby::Config;
///
/// let config = Config::from_json(r#"{
///     "address": {
///         "endpoint": "https://s3.us-east-1.amazonaws.com",
///         "region": "us-east-1",
///         "bucket": "cubby-uploads"
///     },
///     "identity_pool": "us-east-1:00000000-0000-0000-0000-000000000000",
///     "namespace_ttl": 600
/// }"#).unwrap();
///
/// assert_eq!(config.namespace_ttl.as_secs(), 600);
/// assert_eq!(config.auth_timeout.as_secs(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Where the shared bucket lives.
    pub address: Address,
    /// The identity pool anonymous credentials are issued from.
    pub identity_pool: String,
    /// How long a resolved namespace is served from cache.
    #[serde(default = "defaults::namespace_ttl", with = "seconds")]
    pub namespace_ttl: Duration,
    /// Bound on each call to the identity service.
    #[serde(default = "defaults::auth_timeout", with = "seconds")]
    pub auth_timeout: Duration,
    /// Credentials are renewed once they have less than this left.
    #[serde(default = "defaults::credential_renewal_margin", with = "seconds")]
    pub credential_renewal_margin: Duration,
    /// Longest lifetime a shareable URL may be given.
    #[serde(default = "defaults::max_share_ttl", with = "seconds")]
    pub max_share_ttl: Duration,
    /// Size of the chunks uploads are streamed in.
    #[serde(default = "defaults::upload_chunk_size")]
    pub upload_chunk_size: usize,
}

impl Config {
    /// A configuration with every tunable at its default.
    pub fn new(address: Address, identity_pool: impl Into<String>) -> Self {
        Self {
            address,
            identity_pool: identity_pool.into(),
            namespace_ttl: defaults::namespace_ttl(),
            auth_timeout: defaults::auth_timeout(),
            credential_renewal_margin: defaults::credential_renewal_margin(),
            max_share_ttl: defaults::max_share_ttl(),
            upload_chunk_size: defaults::upload_chunk_size(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, CubbyError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|error| CubbyError::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<(), CubbyError> {
        if self.identity_pool.is_empty() {
            return Err(CubbyError::InvalidConfig("identity_pool is empty".into()));
        }
        if self.upload_chunk_size == 0 {
            return Err(CubbyError::InvalidConfig(
                "upload_chunk_size must be positive".into(),
            ));
        }
        if self.max_share_ttl < Duration::from_secs(1) {
            return Err(CubbyError::InvalidConfig(
                "max_share_ttl must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Serve cached namespaces for `ttl`.
    pub fn with_namespace_ttl(mut self, ttl: Duration) -> Self {
        self.namespace_ttl = ttl;
        self
    }

    /// Bound identity service calls by `timeout`.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Renew credentials once they have less than `margin` left.
    pub fn with_credential_renewal_margin(mut self, margin: Duration) -> Self {
        self.credential_renewal_margin = margin;
        self
    }

    /// Cap shareable URL lifetimes at `ttl`.
    pub fn with_max_share_ttl(mut self, ttl: Duration) -> Self {
        self.max_share_ttl = ttl;
        self
    }

    /// Stream uploads in chunks of `size` bytes.
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size;
        self
    }
}

mod defaults {
    use std::time::Duration;

    pub fn namespace_ttl() -> Duration {
        crate::DEFAULT_NAMESPACE_TTL
    }

    pub fn auth_timeout() -> Duration {
        cubby_credentials::DEFAULT_AUTH_TIMEOUT
    }

    pub fn credential_renewal_margin() -> Duration {
        cubby_credentials::DEFAULT_RENEWAL_MARGIN
    }

    pub fn max_share_ttl() -> Duration {
        super::DEFAULT_MAX_SHARE_TTL
    }

    pub fn upload_chunk_size() -> usize {
        super::DEFAULT_UPLOAD_CHUNK_SIZE
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::new("http://localhost:9000", "us-east-1", "cubby")
    }

    #[test]
    fn it_fills_in_defaults() {
        let config = Config::from_json(
            r#"{
                "address": { "endpoint": "http://localhost:9000", "region": "us-east-1", "bucket": "cubby" },
                "identity_pool": "pool"
            }"#,
        )
        .unwrap();

        assert_eq!(config, Config::new(address(), "pool"));
        assert_eq!(config.namespace_ttl, Duration::from_secs(1800));
        assert_eq!(config.credential_renewal_margin, Duration::from_secs(60));
        assert_eq!(config.max_share_ttl, Duration::from_secs(604_800));
        assert_eq!(config.upload_chunk_size, 65_536);
    }

    #[test]
    fn it_round_trips_through_json() {
        let config = Config::new(address().with_path_style(true), "pool")
            .with_auth_timeout(Duration::from_secs(2))
            .with_upload_chunk_size(1024);

        let json = serde_json::to_string(&config).unwrap();

        assert!(json.contains(r#""auth_timeout":2"#));
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn it_rejects_unusable_settings() {
        let zero_chunks = serde_json::to_string(&Config::new(address(), "pool").with_upload_chunk_size(0)).unwrap();
        assert!(matches!(
            Config::from_json(&zero_chunks),
            Err(CubbyError::InvalidConfig(_))
        ));

        assert!(matches!(
            Config::from_json(r#"{ "identity_pool": "pool" }"#),
            Err(CubbyError::InvalidConfig(_))
        ));
        assert!(Config::new(address(), "").validate().is_err());
    }
}
