//! Configuration for the image-delivery pipeline.
//!
//! Configuration is parsed once (from command-line arguments and `DERIVA_`
//! environment variables) into an immutable snapshot. Each request carries an
//! `Arc<Config>`; a runtime reload is a matter of building a new snapshot and
//! swapping the pointer between requests — running requests keep the snapshot
//! they started with.
//!
//! # Environment Variables
//!
//! - `DERIVA_RESOLVER` - Default source provider name (default: filesystem)
//! - `DERIVA_DELEGATE_RESOLVER` - Consult the delegate's `get_resolver` hook
//! - `DERIVA_FS_PREFIX` / `DERIVA_FS_SUFFIX` - Filesystem path affixes
//! - `DERIVA_HTTP_PREFIX` / `DERIVA_HTTP_SUFFIX` - HTTP URL affixes
//! - `DERIVA_HTTP_USERNAME` / `DERIVA_HTTP_SECRET` - HTTP basic auth
//! - `DERIVA_HTTP_TRUST_ALL_CERTS` - Disable TLS verification (testing only)
//! - `DERIVA_S3_BUCKET` / `DERIVA_S3_REGION` / `DERIVA_S3_ENDPOINT` - Object store
//! - `DERIVA_LOOKUP_STRATEGY` - `basic` or `script` key mapping
//! - `DERIVA_LIMIT_TO_8_BITS` - Clamp deep sources to 8 bits per sample
//! - `DERIVA_NORMALIZE` - Stretch each channel to the full dynamic range
//! - `DERIVA_PRESERVE_METADATA` - Re-embed metadata on same-format output
//! - `DERIVA_DERIVATIVE_DIR` - Derivative cache directory
//! - `DERIVA_DERIVATIVE_SIZE` - Derivative cache soft cap in bytes
//! - `DERIVA_DERIVATIVE_TTL` - Derivative cache TTL in seconds (0 = off)
//! - `DERIVA_INFO_CACHE_ENTRIES` - Info cache LRU capacity
//! - `DERIVA_SINGLE_FLIGHT` - Collapse concurrent identical builds
//! - `DERIVA_OPEN_TIMEOUT` / `DERIVA_READ_TIMEOUT` / `DERIVA_REQUEST_TIMEOUT`

use clap::Parser;

// =============================================================================
// Default Values
// =============================================================================

/// Default source provider.
pub const DEFAULT_RESOLVER: &str = "filesystem";

/// Default AWS region for the object-store provider.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default derivative cache soft cap: 1GB.
pub const DEFAULT_DERIVATIVE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default info cache capacity (number of images).
pub const DEFAULT_INFO_CACHE_ENTRIES: usize = 1000;

/// Default source-open timeout in seconds.
pub const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 30;

/// Default per-read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Configuration
// =============================================================================

/// Immutable configuration snapshot for the image pipeline.
#[derive(Parser, Debug, Clone)]
#[command(name = "deriva")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Source Resolution
    // =========================================================================
    /// Name of the default source provider (filesystem, http, s3, database).
    #[arg(long, default_value = DEFAULT_RESOLVER, env = "DERIVA_RESOLVER")]
    pub resolver: String,

    /// Consult the delegate's `get_resolver` hook to pick a provider per request.
    #[arg(long, default_value_t = false, env = "DERIVA_DELEGATE_RESOLVER")]
    pub delegate_resolver: bool,

    /// Key/path lookup strategy: `basic` (affix mapping) or `script` (delegate).
    #[arg(long, default_value = "basic", env = "DERIVA_LOOKUP_STRATEGY")]
    pub lookup_strategy: String,

    // =========================================================================
    // Filesystem Provider
    // =========================================================================
    /// Path prefix prepended to identifiers.
    #[arg(long, default_value = "", env = "DERIVA_FS_PREFIX")]
    pub fs_prefix: String,

    /// Path suffix appended to identifiers.
    #[arg(long, default_value = "", env = "DERIVA_FS_SUFFIX")]
    pub fs_suffix: String,

    // =========================================================================
    // HTTP Provider
    // =========================================================================
    /// URL prefix prepended to identifiers.
    #[arg(long, default_value = "", env = "DERIVA_HTTP_PREFIX")]
    pub http_prefix: String,

    /// URL suffix appended to identifiers.
    #[arg(long, default_value = "", env = "DERIVA_HTTP_SUFFIX")]
    pub http_suffix: String,

    /// Basic auth username for the HTTP provider.
    #[arg(long, env = "DERIVA_HTTP_USERNAME")]
    pub http_username: Option<String>,

    /// Basic auth secret for the HTTP provider.
    #[arg(long, env = "DERIVA_HTTP_SECRET")]
    pub http_secret: Option<String>,

    /// Disable TLS certificate verification for the HTTP provider.
    ///
    /// WARNING: Only enable in development/testing.
    #[arg(long, default_value_t = false, env = "DERIVA_HTTP_TRUST_ALL_CERTS")]
    pub http_trust_all_certs: bool,

    // =========================================================================
    // Object-Store Provider
    // =========================================================================
    /// Bucket name for the object-store provider.
    #[arg(long, env = "DERIVA_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Region for the object-store provider.
    #[arg(long, default_value = DEFAULT_REGION, env = "DERIVA_S3_REGION")]
    pub s3_region: String,

    /// Custom endpoint for S3-compatible services (MinIO, gateways, etc.).
    #[arg(long, env = "DERIVA_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Key prefix prepended to identifiers in the object store.
    #[arg(long, default_value = "", env = "DERIVA_S3_PREFIX")]
    pub s3_prefix: String,

    /// Key suffix appended to identifiers in the object store.
    #[arg(long, default_value = "", env = "DERIVA_S3_SUFFIX")]
    pub s3_suffix: String,

    // =========================================================================
    // Reader Behavior
    // =========================================================================
    /// Rescale sources deeper than 8 bits per sample down to 8.
    #[arg(long, default_value_t = false, env = "DERIVA_LIMIT_TO_8_BITS")]
    pub limit_to_8_bits: bool,

    /// Linearly stretch each channel's observed range to the full depth range.
    #[arg(long, default_value_t = false, env = "DERIVA_NORMALIZE")]
    pub normalize: bool,

    /// Re-embed source metadata when the output format matches the source.
    #[arg(long, default_value_t = false, env = "DERIVA_PRESERVE_METADATA")]
    pub preserve_metadata: bool,

    // =========================================================================
    // Caches
    // =========================================================================
    /// Directory holding derivative cache payloads. Empty disables the cache.
    #[arg(long, default_value = "", env = "DERIVA_DERIVATIVE_DIR")]
    pub derivative_dir: String,

    /// Soft cap on total derivative cache size in bytes.
    #[arg(long, default_value_t = DEFAULT_DERIVATIVE_SIZE, env = "DERIVA_DERIVATIVE_SIZE")]
    pub derivative_size_bytes: u64,

    /// Derivative cache entry TTL in seconds. 0 disables TTL eviction.
    #[arg(long, default_value_t = 0, env = "DERIVA_DERIVATIVE_TTL")]
    pub derivative_ttl_seconds: u64,

    /// Maximum number of image infos to keep in memory.
    #[arg(long, default_value_t = DEFAULT_INFO_CACHE_ENTRIES, env = "DERIVA_INFO_CACHE_ENTRIES")]
    pub info_cache_entries: usize,

    /// Collapse concurrent identical requests into one build.
    ///
    /// When disabled, concurrent duplicates each run independently.
    #[arg(long, default_value_t = true, env = "DERIVA_SINGLE_FLIGHT")]
    pub single_flight: bool,

    // =========================================================================
    // Timeouts
    // =========================================================================
    /// Source-open timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_OPEN_TIMEOUT_SECS, env = "DERIVA_OPEN_TIMEOUT")]
    pub open_timeout_secs: u64,

    /// Per-read timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT_SECS, env = "DERIVA_READ_TIMEOUT")]
    pub read_timeout_secs: u64,

    /// Whole-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, env = "DERIVA_REQUEST_TIMEOUT")]
    pub request_timeout_secs: u64,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self.resolver.as_str() {
            "filesystem" | "http" | "s3" | "database" => {}
            other => {
                return Err(format!(
                    "unknown resolver '{}': expected filesystem, http, s3, or database",
                    other
                ))
            }
        }

        match self.lookup_strategy.as_str() {
            "basic" | "script" => {}
            other => {
                return Err(format!(
                    "unknown lookup_strategy '{}': expected basic or script",
                    other
                ))
            }
        }

        if self.resolver == "s3" && self.s3_bucket.is_none() {
            return Err(
                "object-store resolver selected but no bucket configured. \
                 Set --s3-bucket or DERIVA_S3_BUCKET"
                    .to_string(),
            );
        }

        if self.http_username.is_some() != self.http_secret.is_some() {
            return Err("HTTP basic auth needs both a username and a secret".to_string());
        }

        if self.info_cache_entries == 0 {
            return Err("info_cache_entries must be greater than 0".to_string());
        }

        if self.open_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Build a config with defaults, without touching argv or the environment.
    ///
    /// This is what library embedders and tests start from.
    pub fn standalone() -> Self {
        Config {
            resolver: DEFAULT_RESOLVER.to_string(),
            delegate_resolver: false,
            lookup_strategy: "basic".to_string(),
            fs_prefix: String::new(),
            fs_suffix: String::new(),
            http_prefix: String::new(),
            http_suffix: String::new(),
            http_username: None,
            http_secret: None,
            http_trust_all_certs: false,
            s3_bucket: None,
            s3_region: DEFAULT_REGION.to_string(),
            s3_endpoint: None,
            s3_prefix: String::new(),
            s3_suffix: String::new(),
            limit_to_8_bits: false,
            normalize: false,
            preserve_metadata: false,
            derivative_dir: String::new(),
            derivative_size_bytes: DEFAULT_DERIVATIVE_SIZE,
            derivative_ttl_seconds: 0,
            info_cache_entries: DEFAULT_INFO_CACHE_ENTRIES,
            single_flight: true,
            open_timeout_secs: DEFAULT_OPEN_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::standalone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::standalone().validate().is_ok());
    }

    #[test]
    fn test_unknown_resolver() {
        let mut config = Config::standalone();
        config.resolver = "carrier-pigeon".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("resolver"));
    }

    #[test]
    fn test_s3_resolver_requires_bucket() {
        let mut config = Config::standalone();
        config.resolver = "s3".to_string();
        assert!(config.validate().is_err());

        config.s3_bucket = Some("images".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_auth_needs_both_halves() {
        let mut config = Config::standalone();
        config.http_username = Some("alice".to_string());
        assert!(config.validate().is_err());

        config.http_secret = Some("s3cret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_lookup_strategy() {
        let mut config = Config::standalone();
        config.lookup_strategy = "guesswork".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = Config::standalone();
        config.open_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::standalone();
        config.read_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_info_cache_rejected() {
        let mut config = Config::standalone();
        config.info_cache_entries = 0;
        assert!(config.validate().is_err());
    }
}
