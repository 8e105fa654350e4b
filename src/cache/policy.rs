//! Cache priorities and result statuses
//!
//! A [`CachePriority`] is one of the eight legal combinations of a
//! [`Behaviour`] (when the network is used) and a [`FreshnessPreference`]
//! (how much stale data is tolerated). Each priority declares up front the
//! closed set of [`CacheStatus`] values it may ever produce.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a priority uses the network and the existing cached data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behaviour {
    /// Serve cached data while it is fresh, refresh it from the network otherwise
    Online,
    /// Treat any cached data as stale and always refresh it
    Invalidate,
    /// Never use the network
    Offline,
}

impl Behaviour {
    /// Whether this behaviour may call the network
    pub fn uses_network(&self) -> bool {
        !matches!(self, Behaviour::Offline)
    }
}

/// How aggressively stale data is avoided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreshnessPreference {
    /// Stale data is served first, then refreshed
    Any,
    /// Stale data is only served when a refresh fails
    FreshPreferred,
    /// Stale data is never served
    FreshOnly,
}

impl FreshnessPreference {
    /// Whether a stale cached value is emitted before refreshing
    pub fn emits_cached_stale(&self) -> bool {
        matches!(self, FreshnessPreference::Any)
    }

    /// Whether a stale value is returned when the refresh fails
    pub fn emits_network_stale(&self) -> bool {
        !matches!(self, FreshnessPreference::FreshOnly)
    }

    /// Whether the call produces exactly one emission
    pub fn has_single_response(&self) -> bool {
        !matches!(self, FreshnessPreference::Any)
    }
}

/// Status of a result emitted by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Served from the cache, not yet expired
    Fresh,
    /// Served from the cache after expiry
    Stale,
    /// Fetched from the network with nothing cached before
    Network,
    /// Fetched from the network, replacing a previous entry
    Refreshed,
    /// The refresh failed; the previous stale value is returned
    CouldNotRefresh,
    /// No value could be produced
    Empty,
    /// Fetched from the network but not cached
    NotCached,
    /// A local operation (invalidate/clear) completed
    Done,
}

impl CacheStatus {
    pub const ALL: [CacheStatus; 8] = [
        CacheStatus::Fresh,
        CacheStatus::Stale,
        CacheStatus::Network,
        CacheStatus::Refreshed,
        CacheStatus::CouldNotRefresh,
        CacheStatus::Empty,
        CacheStatus::NotCached,
        CacheStatus::Done,
    ];

    /// Whether this is the last emission of a call
    pub fn is_final(&self) -> bool {
        !matches!(self, CacheStatus::Stale)
    }

    /// Whether the associated data is considered fresh
    pub fn is_fresh(&self) -> bool {
        matches!(
            self,
            CacheStatus::Fresh
                | CacheStatus::Network
                | CacheStatus::Refreshed
                | CacheStatus::NotCached
        )
    }

    /// Whether the associated data was read from the cache
    pub fn is_from_cache(&self) -> bool {
        matches!(
            self,
            CacheStatus::Fresh | CacheStatus::Stale | CacheStatus::CouldNotRefresh
        )
    }

    /// Whether this status reports a failure
    pub fn is_error(&self) -> bool {
        matches!(self, CacheStatus::CouldNotRefresh | CacheStatus::Empty)
    }

    /// Whether a result with this status gets written to the store
    pub fn is_persistable(&self) -> bool {
        matches!(self, CacheStatus::Network | CacheStatus::Refreshed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Fresh => "FRESH",
            CacheStatus::Stale => "STALE",
            CacheStatus::Network => "NETWORK",
            CacheStatus::Refreshed => "REFRESHED",
            CacheStatus::CouldNotRefresh => "COULD_NOT_REFRESH",
            CacheStatus::Empty => "EMPTY",
            CacheStatus::NotCached => "NOT_CACHED",
            CacheStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named combination of behaviour and freshness preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachePriority {
    /// Online, stale data emitted first then refreshed
    StaleAcceptedFirst,
    /// Online, stale data only returned when the refresh fails
    StaleAcceptedLast,
    /// Online, stale data never returned
    StaleNotAccepted,
    /// Invalidate, stale data emitted first then refreshed
    InvalidateStaleAcceptedFirst,
    /// Invalidate, stale data only returned when the refresh fails
    InvalidateStaleAcceptedLast,
    /// Invalidate, stale data never returned
    InvalidateStaleNotAccepted,
    /// Offline, cached data returned as is
    OfflineStaleAccepted,
    /// Offline, only fresh cached data returned
    OfflineStaleNotAccepted,
}

impl Default for CachePriority {
    fn default() -> Self {
        CachePriority::StaleAcceptedFirst
    }
}

impl CachePriority {
    pub const ALL: [CachePriority; 8] = [
        CachePriority::StaleAcceptedFirst,
        CachePriority::StaleAcceptedLast,
        CachePriority::StaleNotAccepted,
        CachePriority::InvalidateStaleAcceptedFirst,
        CachePriority::InvalidateStaleAcceptedLast,
        CachePriority::InvalidateStaleNotAccepted,
        CachePriority::OfflineStaleAccepted,
        CachePriority::OfflineStaleNotAccepted,
    ];

    /// Look up the priority for a behaviour and freshness preference.
    ///
    /// Offline has no distinct "fresh preferred" mode: without the network a
    /// stale value can never be replaced, so it collapses to
    /// [`CachePriority::OfflineStaleAccepted`].
    pub fn with(behaviour: Behaviour, freshness: FreshnessPreference) -> Self {
        use Behaviour::*;
        use FreshnessPreference::*;

        match (behaviour, freshness) {
            (Online, Any) => CachePriority::StaleAcceptedFirst,
            (Online, FreshPreferred) => CachePriority::StaleAcceptedLast,
            (Online, FreshOnly) => CachePriority::StaleNotAccepted,
            (Invalidate, Any) => CachePriority::InvalidateStaleAcceptedFirst,
            (Invalidate, FreshPreferred) => CachePriority::InvalidateStaleAcceptedLast,
            (Invalidate, FreshOnly) => CachePriority::InvalidateStaleNotAccepted,
            (Offline, FreshOnly) => CachePriority::OfflineStaleNotAccepted,
            (Offline, _) => CachePriority::OfflineStaleAccepted,
        }
    }

    pub fn behaviour(&self) -> Behaviour {
        match self {
            CachePriority::StaleAcceptedFirst
            | CachePriority::StaleAcceptedLast
            | CachePriority::StaleNotAccepted => Behaviour::Online,
            CachePriority::InvalidateStaleAcceptedFirst
            | CachePriority::InvalidateStaleAcceptedLast
            | CachePriority::InvalidateStaleNotAccepted => Behaviour::Invalidate,
            CachePriority::OfflineStaleAccepted | CachePriority::OfflineStaleNotAccepted => {
                Behaviour::Offline
            }
        }
    }

    pub fn freshness(&self) -> FreshnessPreference {
        match self {
            CachePriority::StaleAcceptedFirst
            | CachePriority::InvalidateStaleAcceptedFirst
            | CachePriority::OfflineStaleAccepted => FreshnessPreference::Any,
            CachePriority::StaleAcceptedLast | CachePriority::InvalidateStaleAcceptedLast => {
                FreshnessPreference::FreshPreferred
            }
            CachePriority::StaleNotAccepted
            | CachePriority::InvalidateStaleNotAccepted
            | CachePriority::OfflineStaleNotAccepted => FreshnessPreference::FreshOnly,
        }
    }

    /// The closed set of statuses this priority may emit
    pub fn possible_statuses(&self) -> &'static [CacheStatus] {
        use CacheStatus::*;

        match self {
            CachePriority::StaleAcceptedFirst => {
                &[Fresh, Stale, Network, Refreshed, Empty, CouldNotRefresh]
            }
            CachePriority::StaleAcceptedLast => {
                &[Fresh, Network, Refreshed, Empty, CouldNotRefresh]
            }
            CachePriority::StaleNotAccepted => &[Fresh, Network, Refreshed, Empty],
            CachePriority::InvalidateStaleAcceptedFirst => {
                &[Stale, Network, Refreshed, Empty, CouldNotRefresh]
            }
            CachePriority::InvalidateStaleAcceptedLast => {
                &[Network, Refreshed, Empty, CouldNotRefresh]
            }
            CachePriority::InvalidateStaleNotAccepted => &[Network, Refreshed, Empty],
            CachePriority::OfflineStaleAccepted => &[Fresh, Stale, Empty],
            CachePriority::OfflineStaleNotAccepted => &[Fresh, Empty],
        }
    }

    /// Whether `status` belongs to this priority's declared set
    pub fn permits(&self, status: CacheStatus) -> bool {
        self.possible_statuses().contains(&status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePriority::StaleAcceptedFirst => "STALE_ACCEPTED_FIRST",
            CachePriority::StaleAcceptedLast => "STALE_ACCEPTED_LAST",
            CachePriority::StaleNotAccepted => "STALE_NOT_ACCEPTED",
            CachePriority::InvalidateStaleAcceptedFirst => "INVALIDATE_STALE_ACCEPTED_FIRST",
            CachePriority::InvalidateStaleAcceptedLast => "INVALIDATE_STALE_ACCEPTED_LAST",
            CachePriority::InvalidateStaleNotAccepted => "INVALIDATE_STALE_NOT_ACCEPTED",
            CachePriority::OfflineStaleAccepted => "OFFLINE_STALE_ACCEPTED",
            CachePriority::OfflineStaleNotAccepted => "OFFLINE_STALE_NOT_ACCEPTED",
        }
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CachePriority::ALL
            .iter()
            .copied()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| format!("unknown cache priority: {}", s))
    }
}
