//! Stored cache entries

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The epoch, used as the expiry date of invalidated entries
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

/// Convert epoch milliseconds back into a date
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Add a time-to-live to a date, saturating at the latest representable date
pub fn add_ttl(date: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// How a payload was transformed before storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SerialisationTag {
    pub compressed: bool,

    pub encrypted: bool,
}

impl SerialisationTag {
    pub fn new(compressed: bool, encrypted: bool) -> Self {
        Self {
            compressed,
            encrypted,
        }
    }

    /// Plain JSON, no transforms
    pub fn plain() -> Self {
        Self::default()
    }
}

impl fmt::Display for SerialisationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match (self.compressed, self.encrypted) {
            (false, false) => "0",
            (true, false) => "C",
            (false, true) => "E",
            (true, true) => "CE",
        };
        f.write_str(tag)
    }
}

impl FromStr for SerialisationTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::new(false, false)),
            "C" => Ok(Self::new(true, false)),
            "E" => Ok(Self::new(false, true)),
            "CE" => Ok(Self::new(true, true)),
            other => Err(format!("unknown serialisation tag: {}", other)),
        }
    }
}

/// Everything known about a stored entry except its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub request_hash: String,

    pub class_hash: String,

    /// Name of the response type, for diagnostics
    pub response_type: String,

    pub cache_date: DateTime<Utc>,

    /// Set to the epoch when the entry is invalidated
    pub expiry_date: DateTime<Utc>,

    pub tag: SerialisationTag,
}

impl EntryHeader {
    /// Check if the entry has expired at `now`
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    /// Whether the entry was explicitly invalidated
    pub fn is_invalidated(&self) -> bool {
        self.expiry_date == epoch()
    }

    /// Time left before expiry, if any
    pub fn time_until_expiration(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expiry_date - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// A serialised response as held by a persistence backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub header: EntryHeader,

    /// Serialised, possibly transformed, payload
    pub payload: Vec<u8>,
}

impl StoredEntry {
    /// Create an entry cached at `cache_date` expiring `ttl` later
    pub fn new(
        request_hash: impl Into<String>,
        class_hash: impl Into<String>,
        response_type: impl Into<String>,
        cache_date: DateTime<Utc>,
        ttl: Duration,
        tag: SerialisationTag,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: EntryHeader {
                request_hash: request_hash.into(),
                class_hash: class_hash.into(),
                response_type: response_type.into(),
                cache_date,
                expiry_date: add_ttl(cache_date, ttl),
                tag,
            },
            payload,
        }
    }

    pub fn request_hash(&self) -> &str {
        &self.header.request_hash
    }

    pub fn class_hash(&self) -> &str {
        &self.header.class_hash
    }

    pub fn cache_date(&self) -> DateTime<Utc> {
        self.header.cache_date
    }

    pub fn expiry_date(&self) -> DateTime<Utc> {
        self.header.expiry_date
    }

    pub fn tag(&self) -> SerialisationTag {
        self.header.tag
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.header.is_stale(now)
    }

    /// Copy of this entry with its expiry date reset to the epoch
    pub fn invalidated(&self) -> Self {
        let mut entry = self.clone();
        entry.header.expiry_date = epoch();
        entry
    }

    /// Approximate size of this entry in bytes
    pub fn size_bytes(&self) -> usize {
        self.header.request_hash.len()
            + self.header.class_hash.len()
            + self.header.response_type.len()
            + self.payload.len()
    }
}
