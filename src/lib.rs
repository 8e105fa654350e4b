//! # Ouroboros Cache (ouroboros-cache)
//!
//! A client-side response cache for network calls with stale-while-revalidate
//! semantics.
//!
//! ## Features
//!
//! - Eight cache priorities covering online, offline and forced refresh calls
//! - Async-first design using tokio and futures streams
//! - Every emission tagged with its status, dates and serialisation flags
//! - In-memory and file-backed persistence
//! - Operations declarable per call, per header, or by predicate
//!
//! ## Cache Priorities
//!
//! ### Stale Accepted First
//! A stale entry is emitted immediately, then refreshed from the network.
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheOptions, CachePriority, Operation, RequestDescriptor, ResponseCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = ResponseCache::new(CacheConfig::default())?;
//!     let request = RequestDescriptor::get("https://api.example.com/users/1", "User");
//!     let operation = Operation::cache(
//!         CacheOptions::new(CachePriority::StaleAcceptedFirst).ttl_seconds(60),
//!     );
//!
//!     let user: String = cache
//!         .fetch(&request, Some(operation), async { Ok::<_, anyhow::Error>("alice".to_string()) })
//!         .await?;
//!     println!("User: {}", user);
//!     Ok(())
//! }
//! ```
//!
//! ### Offline
//! Only the store is consulted; the network is never called.
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheOptions, CachePriority, Operation, RequestDescriptor, ResponseCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = ResponseCache::new(CacheConfig::default())?;
//!     let request = RequestDescriptor::get("https://api.example.com/users/1", "User");
//!     let operation = Operation::cache(CacheOptions::new(CachePriority::OfflineStaleAccepted));
//!
//!     let envelope = cache
//!         .fetch_envelope(&request, Some(operation), async { Ok::<_, anyhow::Error>(String::new()) })
//!         .await?;
//!     println!("Status: {}", envelope.status());
//!     Ok(())
//! }
//! ```
//!
//! ### File Persistence
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, FileStore, ResponseCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = FileStore::open("/tmp/response-cache").await?;
//!     let cache = ResponseCache::builder(CacheConfig::from_env()?)
//!         .store(Arc::new(store))
//!         .build()?;
//!
//!     println!("{}", cache.statistics().await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheOptions, CachePriority, CacheStatistics, CacheStats,
    CacheStatus, CacheStream, CacheToken, ClearScope, EmissionFilter, FileStore, MemoryStore,
    Operation, Persistence, RequestDescriptor, RequestIdentity, ResponseCache, ResultEnvelope,
};
pub use error::{CacheError, Result};
