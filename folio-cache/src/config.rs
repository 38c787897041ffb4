//! Cache TTL configuration.

use std::time::Duration;

/// Default TTL for every cache namespace (24 hours).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// TTLs applied by [`CacheClient`](crate::CacheClient) when it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for folder/note metadata snapshots.
    pub metadata_ttl: Duration,
    /// TTL for team membership sets, refreshed on every write to the set.
    pub membership_ttl: Duration,
    /// TTL for ACL maps, refreshed on every upsert. `None` keeps ACL maps
    /// until they are explicitly removed.
    pub acl_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            membership_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            acl_ttl: Some(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
        }
    }
}

impl CacheConfig {
    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_CACHE_METADATA_TTL_SECS`: metadata TTL (default: 86400)
    /// - `FOLIO_CACHE_MEMBERSHIP_TTL_SECS`: membership TTL (default: 86400)
    /// - `FOLIO_CACHE_ACL_TTL_SECS`: ACL TTL, `0` disables it (default: 86400)
    pub fn from_env() -> Self {
        let metadata_ttl = Duration::from_secs(
            std::env::var("FOLIO_CACHE_METADATA_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        );

        let membership_ttl = Duration::from_secs(
            std::env::var("FOLIO_CACHE_MEMBERSHIP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        );

        let acl_ttl_secs: u64 = std::env::var("FOLIO_CACHE_ACL_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        Self {
            metadata_ttl,
            membership_ttl,
            acl_ttl: (acl_ttl_secs > 0).then(|| Duration::from_secs(acl_ttl_secs)),
        }
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn with_membership_ttl(mut self, ttl: Duration) -> Self {
        self.membership_ttl = ttl;
        self
    }

    pub fn with_acl_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.acl_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_one_day() {
        let config = CacheConfig::default();
        assert_eq!(config.metadata_ttl, Duration::from_secs(86400));
        assert_eq!(config.membership_ttl, Duration::from_secs(86400));
        assert_eq!(config.acl_ttl, Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::default()
            .with_metadata_ttl(Duration::from_secs(5))
            .with_acl_ttl(None);
        assert_eq!(config.metadata_ttl, Duration::from_secs(5));
        assert_eq!(config.acl_ttl, None);
    }
}
