//! Read-only diagnostics over stored entries

use crate::cache::entry::EntryHeader;
use crate::cache::policy::CacheStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One stored entry as seen at `generated_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatistics {
    /// FRESH or STALE
    pub status: CacheStatus,

    pub cache_date: DateTime<Utc>,

    pub expiry_date: DateTime<Utc>,

    pub compressed: bool,

    pub encrypted: bool,
}

/// Summary of the entries of one response type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStatistics {
    pub response_type: String,

    pub fresh: usize,

    pub stale: usize,

    /// Earliest cache date
    pub oldest: Option<DateTime<Utc>>,

    /// Latest cache date
    pub latest: Option<DateTime<Utc>>,

    pub entries: Vec<EntryStatistics>,
}

/// Per response type breakdown of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub generated_at: DateTime<Utc>,

    /// Sorted by response type
    pub classes: Vec<ClassStatistics>,
}

impl CacheStatistics {
    /// Build the statistics of a list of entry headers
    pub fn from_headers(headers: Vec<EntryHeader>, now: DateTime<Utc>) -> Self {
        let mut grouped: BTreeMap<String, ClassStatistics> = BTreeMap::new();

        for header in headers {
            let class = grouped
                .entry(header.response_type.clone())
                .or_insert_with(|| ClassStatistics {
                    response_type: header.response_type.clone(),
                    fresh: 0,
                    stale: 0,
                    oldest: None,
                    latest: None,
                    entries: Vec::new(),
                });

            let status = if header.is_stale(now) {
                class.stale += 1;
                CacheStatus::Stale
            } else {
                class.fresh += 1;
                CacheStatus::Fresh
            };

            class.oldest = Some(class.oldest.map_or(header.cache_date, |d| d.min(header.cache_date)));
            class.latest = Some(class.latest.map_or(header.cache_date, |d| d.max(header.cache_date)));

            class.entries.push(EntryStatistics {
                status,
                cache_date: header.cache_date,
                expiry_date: header.expiry_date,
                compressed: header.tag.compressed,
                encrypted: header.tag.encrypted,
            });
        }

        for class in grouped.values_mut() {
            class.entries.sort_by_key(|e| e.cache_date);
        }

        Self {
            generated_at: now,
            classes: grouped.into_values().collect(),
        }
    }

    pub fn total_entries(&self) -> usize {
        self.classes.iter().map(|c| c.entries.len()).sum()
    }

    pub fn class(&self, response_type: &str) -> Option<&ClassStatistics> {
        self.classes.iter().find(|c| c.response_type == response_type)
    }
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.classes.is_empty() {
            return writeln!(f, "Cache is empty");
        }

        writeln!(
            f,
            "{:<24} {:<6} {:<5} {:<6} {:<24} {:<24}",
            "Class", "Status", "Comp", "Encr", "Cached", "Expires"
        )?;

        for class in &self.classes {
            for entry in &class.entries {
                writeln!(
                    f,
                    "{:<24} {:<6} {:<5} {:<6} {:<24} {:<24}",
                    class.response_type,
                    entry.status.as_str(),
                    entry.compressed,
                    entry.encrypted,
                    entry.cache_date.format("%Y-%m-%d %H:%M:%S"),
                    entry.expiry_date.format("%Y-%m-%d %H:%M:%S"),
                )?;
            }
        }

        for class in &self.classes {
            writeln!(
                f,
                "{}: {} fresh, {} stale",
                class.response_type, class.fresh, class.stale
            )?;
        }

        Ok(())
    }
}
