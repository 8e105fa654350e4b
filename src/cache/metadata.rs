//! State transitions after a network fetch
//!
//! Given the outcome of a fetch and the entry that was cached before it, the
//! [`MetadataManager`] decides the status, dates and serialisation flags of
//! the final emission.

use crate::cache::clock::Clock;
use crate::cache::config::CacheConfig;
use crate::cache::entry::{add_ttl, SerialisationTag};
use crate::cache::operation::CacheOptions;
use crate::cache::policy::{CacheStatus, FreshnessPreference};
use crate::cache::token::{CacheToken, CallTiming, ResultEnvelope};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A previously cached value, decoded
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse<T> {
    pub value: T,

    pub cache_date: DateTime<Utc>,

    pub expiry_date: DateTime<Utc>,

    pub is_compressed: bool,

    pub is_encrypted: bool,
}

impl<T> CachedResponse<T> {
    pub fn tag(&self) -> SerialisationTag {
        SerialisationTag::new(self.is_compressed, self.is_encrypted)
    }
}

/// Computes the metadata of network responses
#[derive(Clone)]
pub struct MetadataManager {
    clock: Arc<dyn Clock>,

    config: Arc<CacheConfig>,
}

impl fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MetadataManager {
    pub fn new(clock: Arc<dyn Clock>, config: Arc<CacheConfig>) -> Self {
        Self { clock, config }
    }

    /// Time-to-live of a cache operation
    pub fn ttl(&self, options: &CacheOptions) -> Duration {
        options
            .ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl)
    }

    /// Serialisation flags for a new entry.
    ///
    /// A previous entry's flags win over the operation's, which win over the
    /// configured defaults.
    pub fn resolve_flags(
        &self,
        options: &CacheOptions,
        previous: Option<SerialisationTag>,
    ) -> SerialisationTag {
        previous.unwrap_or_else(|| {
            SerialisationTag::new(
                options.compress.unwrap_or(self.config.compress),
                options.encrypt.unwrap_or(self.config.encrypt),
            )
        })
    }

    /// Build the final emission of a fetch
    pub fn network_response<T>(
        &self,
        base: &CacheToken,
        options: &CacheOptions,
        result: Result<T>,
        previous: Option<CachedResponse<T>>,
        timing: CallTiming,
    ) -> ResultEnvelope<T> {
        let fresh_only = options.priority.freshness() == FreshnessPreference::FreshOnly;
        let flags = self.resolve_flags(options, previous.as_ref().map(CachedResponse::tag));

        let (status, value, dates, exception) = match (result, previous) {
            (Ok(value), previous) => {
                let now = self.clock.now();
                let status = if previous.is_some() {
                    CacheStatus::Refreshed
                } else {
                    CacheStatus::Network
                };
                let expiry = add_ttl(now, self.ttl(options));
                (status, Some(value), (Some(now), Some(expiry)), None)
            }
            (Err(error), Some(previous)) if !fresh_only => {
                warn!("Could not refresh {}, returning cached data: {}", base.identity, error);
                (
                    CacheStatus::CouldNotRefresh,
                    Some(previous.value),
                    (Some(previous.cache_date), Some(previous.expiry_date)),
                    Some(error),
                )
            }
            (Err(error), _) => {
                warn!("Fetch failed for {}: {}", base.identity, error);
                (CacheStatus::Empty, None, (None, None), Some(error))
            }
        };

        debug!("Network response for {}: {}", base.identity, status);

        let token = base
            .with_dates(dates.0, dates.1)
            .with_flags(flags.compressed, flags.encrypted)
            .with_status(status);

        let envelope = ResultEnvelope::new(value, token).with_timing(timing);
        match exception {
            Some(error) => envelope.with_exception(error),
            None => envelope,
        }
    }

    /// Downgrade an emission whose value could not be cached
    pub fn serialisation_failed<T>(
        &self,
        envelope: ResultEnvelope<T>,
        error: CacheError,
    ) -> ResultEnvelope<T> {
        warn!(
            "Could not cache response for {}: {}",
            envelope.token.identity, error
        );

        let token = envelope
            .token
            .with_status(CacheStatus::NotCached)
            .with_dates(None, None);

        ResultEnvelope {
            token,
            ..envelope
        }
        .with_exception(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::entry::from_millis;
    use crate::cache::fingerprint::RequestIdentity;
    use crate::cache::operation::Operation;
    use crate::cache::policy::CachePriority;

    fn manager(clock: &ManualClock) -> MetadataManager {
        MetadataManager::new(Arc::new(clock.clone()), Arc::new(CacheConfig::default()))
    }

    fn options(priority: CachePriority) -> CacheOptions {
        CacheOptions::new(priority).ttl_seconds(1)
    }

    fn base(options: &CacheOptions, now: i64) -> CacheToken {
        CacheToken::new(
            RequestIdentity::unhashed("Facts"),
            Operation::cache(options.clone()),
            CacheStatus::Network,
            from_millis(now).unwrap(),
        )
    }

    fn previous(value: &str) -> CachedResponse<String> {
        CachedResponse {
            value: value.to_string(),
            cache_date: from_millis(0).unwrap(),
            expiry_date: from_millis(1000).unwrap(),
            is_compressed: true,
            is_encrypted: true,
        }
    }

    fn failure() -> Result<String> {
        Err(CacheError::NetworkFailure("offline".to_string()))
    }

    #[test]
    fn test_network_without_previous() {
        let clock = ManualClock::at_millis(1500);
        let options = options(CachePriority::StaleAcceptedFirst);

        let envelope = manager(&clock).network_response(
            &base(&options, 1500),
            &options,
            Ok("new".to_string()),
            None,
            CallTiming::split(10, 50),
        );

        assert_eq!(envelope.status(), CacheStatus::Network);
        assert_eq!(envelope.value.as_deref(), Some("new"));
        assert_eq!(envelope.token.cache_date.unwrap().timestamp_millis(), 1500);
        assert_eq!(envelope.token.expiry_date.unwrap().timestamp_millis(), 2500);
        assert_eq!(envelope.timing.network_millis, 40);
        assert!(!envelope.token.is_compressed);
    }

    #[test]
    fn test_refreshed_inherits_flags() {
        let clock = ManualClock::at_millis(1500);
        let options = options(CachePriority::StaleAcceptedFirst).compress(false).encrypt(false);

        let envelope = manager(&clock).network_response(
            &base(&options, 1500),
            &options,
            Ok("new".to_string()),
            Some(previous("old")),
            CallTiming::default(),
        );

        assert_eq!(envelope.status(), CacheStatus::Refreshed);
        assert_eq!(envelope.value.as_deref(), Some("new"));
        assert!(envelope.token.is_compressed);
        assert!(envelope.token.is_encrypted);
    }

    #[test]
    fn test_failure_with_previous_could_not_refresh() {
        let clock = ManualClock::at_millis(1500);
        let options = options(CachePriority::StaleAcceptedLast);

        let envelope = manager(&clock).network_response(
            &base(&options, 1500),
            &options,
            failure(),
            Some(previous("old")),
            CallTiming::default(),
        );

        assert_eq!(envelope.status(), CacheStatus::CouldNotRefresh);
        assert_eq!(envelope.value.as_deref(), Some("old"));
        assert_eq!(envelope.token.cache_date.unwrap().timestamp_millis(), 0);
        assert_eq!(envelope.token.expiry_date.unwrap().timestamp_millis(), 1000);
        assert!(matches!(envelope.exception, Some(CacheError::NetworkFailure(_))));
    }

    #[test]
    fn test_failure_fresh_only_is_empty() {
        let clock = ManualClock::at_millis(1500);
        let options = options(CachePriority::StaleNotAccepted);

        let envelope = manager(&clock).network_response(
            &base(&options, 1500),
            &options,
            failure(),
            Some(previous("old")),
            CallTiming::default(),
        );

        assert_eq!(envelope.status(), CacheStatus::Empty);
        assert_eq!(envelope.value, None);
        assert_eq!(envelope.token.cache_date, None);
        assert_eq!(envelope.token.expiry_date, None);
        assert!(envelope.exception.is_some());
    }

    #[test]
    fn test_failure_without_previous_is_empty() {
        let clock = ManualClock::at_millis(1500);
        let options = options(CachePriority::StaleAcceptedFirst);

        let envelope = manager(&clock).network_response(
            &base(&options, 1500),
            &options,
            failure(),
            None,
            CallTiming::default(),
        );

        assert_eq!(envelope.status(), CacheStatus::Empty);
        assert_eq!(envelope.value, None);
    }

    #[test]
    fn test_flag_resolution_order() {
        let clock = ManualClock::at_millis(0);
        let config = CacheConfig::builder().compress(true).build();
        let manager = MetadataManager::new(Arc::new(clock), Arc::new(config));

        let open = CacheOptions::default();
        assert_eq!(manager.resolve_flags(&open, None), SerialisationTag::new(true, false));

        let explicit = CacheOptions::default().compress(false).encrypt(true);
        assert_eq!(
            manager.resolve_flags(&explicit, None),
            SerialisationTag::new(false, true)
        );

        let previous = SerialisationTag::new(true, true);
        assert_eq!(manager.resolve_flags(&explicit, Some(previous)), previous);
    }

    #[test]
    fn test_default_ttl() {
        let manager = manager(&ManualClock::at_millis(0));
        assert_eq!(manager.ttl(&CacheOptions::default()), Duration::from_secs(3600));
        assert_eq!(
            manager.ttl(&CacheOptions::default().ttl_seconds(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_serialisation_failure_downgrade() {
        let clock = ManualClock::at_millis(1500);
        let manager = manager(&clock);
        let options = options(CachePriority::StaleAcceptedFirst);

        let envelope = manager.network_response(
            &base(&options, 1500),
            &options,
            Ok("new".to_string()),
            None,
            CallTiming::default(),
        );
        let downgraded = manager.serialisation_failed(
            envelope,
            CacheError::SerialisationFailure("disk full".to_string()),
        );

        assert_eq!(downgraded.status(), CacheStatus::NotCached);
        assert_eq!(downgraded.value.as_deref(), Some("new"));
        assert_eq!(downgraded.token.cache_date, None);
        assert_eq!(downgraded.token.expiry_date, None);
        assert!(matches!(
            downgraded.exception,
            Some(CacheError::SerialisationFailure(_))
        ));
    }
}
