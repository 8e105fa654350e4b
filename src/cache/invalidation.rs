//! Invalidation and clearing of stored entries
//!
//! Invalidation keeps an entry but resets its expiry date to the epoch, so the
//! next lookup sees it as stale. Clearing removes entries entirely, selected by
//! a [`ClearFilter`].

use crate::cache::entry::EntryHeader;
use crate::cache::fingerprint::RequestIdentity;
use crate::cache::operation::ClearScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entries targeted by a clear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearTarget {
    /// The entry with this request hash
    Request(String),

    /// Every entry with this class hash
    Class(String),

    All,
}

/// Selection of entries to remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearFilter {
    pub target: ClearTarget,

    /// Only remove entries that expired before `now`
    pub stale_only: bool,

    pub now: DateTime<Utc>,
}

impl ClearFilter {
    /// Build the filter of a clear operation issued for `identity`
    pub fn for_identity(
        scope: ClearScope,
        identity: &RequestIdentity,
        stale_only: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let target = match scope {
            ClearScope::Request => ClearTarget::Request(identity.request_hash.clone()),
            ClearScope::Class => ClearTarget::Class(identity.class_hash.clone()),
            ClearScope::All => ClearTarget::All,
        };

        Self {
            target,
            stale_only,
            now,
        }
    }

    /// Remove everything
    pub fn all(now: DateTime<Utc>) -> Self {
        Self {
            target: ClearTarget::All,
            stale_only: false,
            now,
        }
    }

    /// Check if an entry is selected by this filter
    pub fn matches(&self, header: &EntryHeader) -> bool {
        let in_scope = match &self.target {
            ClearTarget::Request(hash) => header.request_hash == *hash,
            ClearTarget::Class(hash) => header.class_hash == *hash,
            ClearTarget::All => true,
        };

        in_scope && (!self.stale_only || header.expiry_date < self.now)
    }
}

/// Why an entry stopped being served
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Explicit invalidate operation
    Invalidated,

    /// Removed by a clear operation
    Cleared,

    /// Payload could not be deserialised
    Corrupt,

    /// Evicted by LRU policy
    LeastRecentlyUsed,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Invalidated => write!(f, "invalidated"),
            InvalidationReason::Cleared => write!(f, "cleared"),
            InvalidationReason::Corrupt => write!(f, "corrupt entry"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
        }
    }
}

/// Record of entries leaving the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub reason: InvalidationReason,

    pub timestamp: DateTime<Utc>,

    /// Request hashes of the affected entries
    pub keys: Vec<String>,

    pub context: Option<String>,
}

impl InvalidationEvent {
    pub fn new(reason: InvalidationReason, keys: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} entries {}", self.keys.len(), self.reason)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}
