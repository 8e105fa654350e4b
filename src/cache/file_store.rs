//! File-backed persistence
//!
//! One file per entry. Everything but the payload and response type is
//! encoded in the file name:
//!
//! ```text
//! <requestHash>_<classHash>_<cacheMillis>_<expiryMillis>_<tag>
//! ```
//!
//! The file holds the response type on its first line followed by the payload.
//! Writes land in a temporary file that is renamed into place, so readers never
//! observe a partially written entry.

use crate::cache::{
    entry::{epoch, from_millis, EntryHeader, StoredEntry},
    fingerprint::RequestIdentity,
    invalidation::{ClearFilter, InvalidationEvent, InvalidationReason},
    store::Persistence,
    types::CacheStats,
};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SEPARATOR: char = '_';
const TEMP_SUFFIX: &str = ".tmp";

/// Encodes entry headers into file names and back
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySerialiser;

impl KeySerialiser {
    /// File name of an entry
    pub fn serialise(&self, header: &EntryHeader) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            header.request_hash,
            header.class_hash,
            header.cache_date.timestamp_millis(),
            header.expiry_date.timestamp_millis(),
            header.tag,
            sep = SEPARATOR
        )
    }

    /// Parse a file name; the response type is not part of it and is left empty
    pub fn deserialise(&self, name: &str) -> Result<EntryHeader> {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
            return Err(CacheError::CorruptEntry(format!("invalid key: {}", name)));
        }

        let millis = |token: &str| {
            token
                .parse::<i64>()
                .ok()
                .and_then(from_millis)
                .ok_or_else(|| CacheError::CorruptEntry(format!("invalid date in key: {}", name)))
        };

        Ok(EntryHeader {
            request_hash: parts[0].to_string(),
            class_hash: parts[1].to_string(),
            response_type: String::new(),
            cache_date: millis(parts[2])?,
            expiry_date: millis(parts[3])?,
            tag: parts[4].parse().map_err(CacheError::CorruptEntry)?,
        })
    }

    /// Whether a file name belongs to the given request
    pub fn matches_request(&self, name: &str, request_hash: &str) -> bool {
        name.strip_prefix(request_hash)
            .map_or(false, |rest| rest.starts_with(SEPARATOR))
    }
}

/// Store keeping one file per entry in a directory
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,

    keys: KeySerialiser,

    stats: Arc<RwLock<CacheStats>>,
}

impl FileStore {
    /// Open a store in `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!("Opened file store at {}", root.display());

        Ok(Self {
            root,
            keys: KeySerialiser,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every entry file, temporary files excluded
    async fn file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && !name.ends_with(TEMP_SUFFIX) {
                names.push(name);
            }
        }

        Ok(names)
    }

    /// Headers of the files of one request, most recently cached first
    async fn request_headers(&self, request_hash: &str) -> Result<Vec<(String, EntryHeader)>> {
        let mut headers: Vec<(String, EntryHeader)> = self
            .file_names()
            .await?
            .into_iter()
            .filter(|name| self.keys.matches_request(name, request_hash))
            .filter_map(|name| match self.keys.deserialise(&name) {
                Ok(header) => Some((name, header)),
                Err(e) => {
                    warn!("Skipping unreadable cache file {}: {}", name, e);
                    None
                }
            })
            .collect();

        headers.sort_by(|a, b| b.1.cache_date.cmp(&a.1.cache_date));
        Ok(headers)
    }

    async fn read_entry(&self, name: &str, mut header: EntryHeader) -> Result<StoredEntry> {
        let content = fs::read(self.root.join(name)).await?;

        let split = content
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::CorruptEntry(format!("missing type line in {}", name)))?;

        header.response_type = String::from_utf8_lossy(&content[..split]).into_owned();
        Ok(StoredEntry {
            header,
            payload: content[split + 1..].to_vec(),
        })
    }

    async fn update_entry_count(&self) -> Result<()> {
        let count = self.file_names().await?.len();
        self.stats.write().await.entries = count;
        Ok(())
    }
}

#[async_trait]
impl Persistence for FileStore {
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
        let found = self
            .request_headers(&identity.request_hash)
            .await?
            .into_iter()
            .find(|(_, header)| header.class_hash == identity.class_hash);

        let Some((name, header)) = found else {
            self.stats.write().await.misses += 1;
            debug!("File store miss: {}", identity);
            return Ok(None);
        };

        let entry = self.read_entry(&name, header).await?;
        self.stats.write().await.hits += 1;
        debug!("File store hit: {}", identity);
        Ok(Some(entry))
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        let name = self.keys.serialise(&entry.header);
        let temp = self.root.join(format!(".{}{}", Uuid::new_v4(), TEMP_SUFFIX));

        let mut content = Vec::with_capacity(entry.header.response_type.len() + 1 + entry.payload.len());
        content.extend_from_slice(entry.header.response_type.as_bytes());
        content.push(b'\n');
        content.extend_from_slice(&entry.payload);

        let previous = self.request_headers(entry.request_hash()).await?;

        fs::write(&temp, &content).await?;
        if let Err(e) = fs::rename(&temp, self.root.join(&name)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        for (old_name, _) in previous.into_iter().filter(|(n, _)| *n != name) {
            if let Err(e) = fs::remove_file(self.root.join(&old_name)).await {
                warn!("Could not remove replaced cache file {}: {}", old_name, e);
            }
        }

        debug!("Cached entry to {}", name);
        self.update_entry_count().await
    }

    async fn invalidate(&self, identity: &RequestIdentity) -> Result<bool> {
        let found = self
            .request_headers(&identity.request_hash)
            .await?
            .into_iter()
            .next();

        let Some((name, header)) = found else {
            return Ok(false);
        };

        if header.is_invalidated() {
            return Ok(false);
        }

        let invalidated = EntryHeader {
            expiry_date: epoch(),
            ..header
        };
        let new_name = self.keys.serialise(&invalidated);
        fs::rename(self.root.join(&name), self.root.join(&new_name)).await?;

        self.stats.write().await.invalidations += 1;
        let event = InvalidationEvent::new(
            InvalidationReason::Invalidated,
            vec![identity.request_hash.clone()],
            Utc::now(),
        );
        debug!("{}", event);

        Ok(true)
    }

    async fn clear(&self, filter: &ClearFilter) -> Result<usize> {
        let mut removed = Vec::new();

        for name in self.file_names().await? {
            let Ok(header) = self.keys.deserialise(&name) else {
                continue;
            };
            if filter.matches(&header) {
                fs::remove_file(self.root.join(&name)).await?;
                removed.push(header.request_hash);
            }
        }

        self.stats.write().await.cleared += removed.len() as u64;
        self.update_entry_count().await?;

        let event = InvalidationEvent::new(InvalidationReason::Cleared, removed, filter.now)
            .with_context(format!("{:?}, stale only: {}", filter.target, filter.stale_only));
        info!("File store: {}", event);

        Ok(event.keys.len())
    }

    async fn list(&self) -> Result<Vec<EntryHeader>> {
        let mut headers = Vec::new();

        for name in self.file_names().await? {
            let Ok(header) = self.keys.deserialise(&name) else {
                continue;
            };
            match self.read_entry(&name, header).await {
                Ok(entry) => headers.push(entry.header),
                Err(e) => warn!("Skipping unreadable cache file {}: {}", name, e),
            }
        }

        Ok(headers)
    }

    async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}
