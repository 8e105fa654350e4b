//! Configuration for the response cache

use crate::cache::operation::{HeaderConflictPolicy, PredicatePrecedence};
use crate::cache::store::DEFAULT_MAX_ENTRIES;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the response cache
///
/// Global defaults applied when a call's options leave a setting open:
/// - Default TTL: 1 hour
/// - Compression and encryption off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live of entries cached without an explicit TTL
    pub default_ttl: Duration,

    /// Compress payloads when the operation does not say
    pub compress: bool,

    /// Encrypt payloads when the operation does not say
    pub encrypt: bool,

    /// Let single-value callers take the first emission even if it is not final
    pub allow_non_final: bool,

    /// Maximum number of entries in the memory store
    pub memory_max_entries: usize,

    /// Whether an explicit operation beats the cache predicate
    pub predicate_precedence: PredicatePrecedence,

    /// What to do when a header operation disagrees with the declared one
    pub header_conflict: HeaderConflictPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            compress: false,
            encrypt: false,
            allow_non_final: false,
            memory_max_entries: DEFAULT_MAX_ENTRIES,
            predicate_precedence: PredicatePrecedence::default(),
            header_conflict: HeaderConflictPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if self.memory_max_entries == 0 {
            return Err(CacheError::ConfigError(
                "memory_max_entries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from the environment, reading `.env` first if present.
    ///
    /// Recognised variables: `CACHE_DEFAULT_TTL_SECS`, `CACHE_COMPRESS`,
    /// `CACHE_ENCRYPT`, `CACHE_ALLOW_NON_FINAL`, `CACHE_MEMORY_MAX_ENTRIES`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
            value
                .map(|v| {
                    v.trim().parse::<T>().map_err(|_| {
                        CacheError::ConfigError(format!("invalid value for {}: {}", key, v))
                    })
                })
                .transpose()
        }

        let mut builder = Self::builder();

        if let Some(secs) = parse::<u64>("CACHE_DEFAULT_TTL_SECS", lookup("CACHE_DEFAULT_TTL_SECS"))? {
            builder = builder.default_ttl(Duration::from_secs(secs));
        }
        if let Some(compress) = parse("CACHE_COMPRESS", lookup("CACHE_COMPRESS"))? {
            builder = builder.compress(compress);
        }
        if let Some(encrypt) = parse("CACHE_ENCRYPT", lookup("CACHE_ENCRYPT"))? {
            builder = builder.encrypt(encrypt);
        }
        if let Some(allow) = parse("CACHE_ALLOW_NON_FINAL", lookup("CACHE_ALLOW_NON_FINAL"))? {
            builder = builder.allow_non_final(allow);
        }
        if let Some(max) = parse("CACHE_MEMORY_MAX_ENTRIES", lookup("CACHE_MEMORY_MAX_ENTRIES"))? {
            builder = builder.memory_max_entries(max);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    compress: Option<bool>,
    encrypt: Option<bool>,
    allow_non_final: Option<bool>,
    memory_max_entries: Option<usize>,
    predicate_precedence: Option<PredicatePrecedence>,
    header_conflict: Option<HeaderConflictPolicy>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    pub fn allow_non_final(mut self, allow: bool) -> Self {
        self.allow_non_final = Some(allow);
        self
    }

    /// Set maximum number of entries in the memory store
    pub fn memory_max_entries(mut self, max: usize) -> Self {
        self.memory_max_entries = Some(max);
        self
    }

    pub fn predicate_precedence(mut self, precedence: PredicatePrecedence) -> Self {
        self.predicate_precedence = Some(precedence);
        self
    }

    pub fn header_conflict(mut self, policy: HeaderConflictPolicy) -> Self {
        self.header_conflict = Some(policy);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            compress: self.compress.unwrap_or(defaults.compress),
            encrypt: self.encrypt.unwrap_or(defaults.encrypt),
            allow_non_final: self.allow_non_final.unwrap_or(defaults.allow_non_final),
            memory_max_entries: self
                .memory_max_entries
                .unwrap_or(defaults.memory_max_entries),
            predicate_precedence: self
                .predicate_precedence
                .unwrap_or(defaults.predicate_precedence),
            header_conflict: self.header_conflict.unwrap_or(defaults.header_conflict),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Configuration for rapidly changing data (5 minute TTL)
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            ..Default::default()
        }
    }

    /// Configuration for reference data (48 hour TTL, compressed)
    pub fn static_content() -> Self {
        Self {
            default_ttl: Duration::from_secs(48 * 3600),
            compress: true,
            memory_max_entries: 200,
            ..Default::default()
        }
    }
}
