//! Cache tokens and result envelopes
//!
//! A [`CacheToken`] describes one emission: which request, under which
//! operation, with which status and dates. Tokens are values; every state
//! transition builds a new token instead of mutating an existing one.

use crate::cache::fingerprint::RequestIdentity;
use crate::cache::operation::Operation;
use crate::cache::policy::{CachePriority, CacheStatus};
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata attached to every emission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheToken {
    pub identity: RequestIdentity,

    pub operation: Operation,

    pub status: CacheStatus,

    /// When the call was made
    pub request_date: DateTime<Utc>,

    /// When the data was cached; `None` for EMPTY and DONE
    pub cache_date: Option<DateTime<Utc>>,

    /// When the data goes stale; `None` for EMPTY and DONE
    pub expiry_date: Option<DateTime<Utc>>,

    pub is_compressed: bool,

    pub is_encrypted: bool,
}

impl CacheToken {
    pub fn new(
        identity: RequestIdentity,
        operation: Operation,
        status: CacheStatus,
        request_date: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            operation,
            status,
            request_date,
            cache_date: None,
            expiry_date: None,
            is_compressed: false,
            is_encrypted: false,
        }
    }

    /// Copy with a new status; EMPTY and DONE drop the dates
    pub fn with_status(&self, status: CacheStatus) -> Self {
        let mut token = Self {
            status,
            ..self.clone()
        };
        if matches!(status, CacheStatus::Empty | CacheStatus::Done) {
            token.cache_date = None;
            token.expiry_date = None;
        }
        token
    }

    /// Copy with new cache and expiry dates
    pub fn with_dates(
        &self,
        cache_date: Option<DateTime<Utc>>,
        expiry_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            cache_date,
            expiry_date,
            ..self.clone()
        }
    }

    /// Copy with new serialisation flags
    pub fn with_flags(&self, is_compressed: bool, is_encrypted: bool) -> Self {
        Self {
            is_compressed,
            is_encrypted,
            ..self.clone()
        }
    }

    /// Priority of the operation, for cache operations
    pub fn priority(&self) -> Option<CachePriority> {
        self.operation.cache_options().map(|options| options.priority)
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn millis(date: Option<DateTime<Utc>>) -> String {
            date.map(|d| d.timestamp_millis().to_string())
                .unwrap_or_else(|| "-".to_string())
        }

        write!(
            f,
            "{} [{}] cached {} expires {}",
            self.identity,
            self.status,
            millis(self.cache_date),
            millis(self.expiry_date)
        )
    }
}

/// Time spent on a call, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallTiming {
    /// Reading the store
    pub disk_millis: u64,

    /// Waiting on the network
    pub network_millis: u64,

    pub total_millis: u64,
}

impl CallTiming {
    /// Timing of a call that only touched the store
    pub fn disk_only(disk_millis: u64) -> Self {
        Self {
            disk_millis,
            network_millis: 0,
            total_millis: disk_millis,
        }
    }

    /// Split a total duration into its disk and network parts
    pub fn split(disk_millis: u64, total_millis: u64) -> Self {
        Self {
            disk_millis,
            network_millis: total_millis.saturating_sub(disk_millis),
            total_millis,
        }
    }
}

/// One emission of a cached call
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope<T> {
    /// `None` for EMPTY and DONE
    pub value: Option<T>,

    pub token: CacheToken,

    pub exception: Option<CacheError>,

    pub timing: CallTiming,
}

impl<T> ResultEnvelope<T> {
    pub fn new(value: Option<T>, token: CacheToken) -> Self {
        Self {
            value,
            token,
            exception: None,
            timing: CallTiming::default(),
        }
    }

    pub fn with_exception(mut self, exception: CacheError) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_timing(mut self, timing: CallTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn status(&self) -> CacheStatus {
        self.token.status
    }

    /// Whether this is the last emission of the call
    pub fn is_final(&self) -> bool {
        self.token.status.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::from_millis;

    fn token() -> CacheToken {
        CacheToken::new(
            RequestIdentity::unhashed("Facts"),
            Operation::do_not_cache(),
            CacheStatus::Network,
            from_millis(0).unwrap(),
        )
    }

    #[test]
    fn test_copy_on_write() {
        let original = token().with_dates(from_millis(0), from_millis(1000));
        let refreshed = original.with_status(CacheStatus::Refreshed);

        assert_eq!(original.status, CacheStatus::Network);
        assert_eq!(refreshed.status, CacheStatus::Refreshed);
        assert_eq!(refreshed.cache_date, original.cache_date);

        let flagged = refreshed.with_flags(true, false);
        assert!(flagged.is_compressed);
        assert!(!refreshed.is_compressed);
    }

    #[test]
    fn test_empty_and_done_drop_dates() {
        let dated = token().with_dates(from_millis(0), from_millis(1000));

        for status in [CacheStatus::Empty, CacheStatus::Done] {
            let token = dated.with_status(status);
            assert_eq!(token.cache_date, None);
            assert_eq!(token.expiry_date, None);
        }
    }

    #[test]
    fn test_timing_split() {
        let timing = CallTiming::split(20, 150);
        assert_eq!(timing.disk_millis, 20);
        assert_eq!(timing.network_millis, 130);
        assert_eq!(timing.total_millis, 150);

        assert_eq!(CallTiming::split(30, 10).network_millis, 0);
        assert_eq!(CallTiming::disk_only(7).total_millis, 7);
    }

    #[test]
    fn test_envelope() {
        let envelope = ResultEnvelope::new(Some(3), token())
            .with_exception(CacheError::Other("x".to_string()));

        assert_eq!(envelope.status(), CacheStatus::Network);
        assert!(envelope.is_final());
        assert!(envelope.exception.is_some());
        assert!(token().to_string().contains("[NETWORK]"));
    }
}
