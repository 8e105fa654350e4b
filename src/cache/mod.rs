//! # Stale-While-Revalidate Response Cache
//!
//! This module decides, for every outgoing network call, whether to serve a
//! stored response, call the network, or both, and how to report what
//! happened.
//!
//! ## Features
//!
//! - **Cache Priorities**: Eight policies combining a network behaviour
//!   (default, offline, invalidate) with a freshness preference
//! - **Ordered Emissions**: A stale value can be emitted before the refresh
//!   completes, and every emission carries a [`CacheToken`]
//! - **Request Fingerprinting**: SHA-256 of the canonical request plus the
//!   response type
//! - **Pluggable Persistence**: In-memory LRU store and a file store with
//!   metadata encoded in file names
//! - **Serialisation Flags**: Optional compression and encryption transforms
//!   recorded per entry
//! - **Local Operations**: Invalidate an entry or clear by request, class or
//!   globally
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{
//!     CacheConfig, CacheOptions, CachePriority, CacheStatus, Operation, RequestDescriptor,
//!     ResponseCache,
//! };
//! use futures::StreamExt;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = ResponseCache::new(CacheConfig::default())?;
//! let request = RequestDescriptor::get("https://api.example.com/facts", "Facts");
//! let operation = Operation::cache(CacheOptions::new(CachePriority::StaleAcceptedFirst));
//!
//! let mut emissions = cache.call(&request, Some(operation), async {
//!     Ok::<_, anyhow::Error>(vec!["cats sleep 16 hours a day".to_string()])
//! })?;
//!
//! while let Some(envelope) = emissions.next().await {
//!     println!("{}: {:?}", envelope.token, envelope.value);
//!     assert_eq!(envelope.status(), CacheStatus::Network);
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod entry;
pub mod file_store;
pub mod fingerprint;
pub mod integration;
pub mod invalidation;
pub mod metadata;
pub mod operation;
pub mod orchestrator;
pub mod policy;
pub mod statistics;
pub mod store;
pub mod stream;
pub mod token;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{PayloadCodec, PayloadTransform};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{EntryHeader, SerialisationTag, StoredEntry};
pub use file_store::{FileStore, KeySerialiser};
pub use fingerprint::{Fingerprinter, RequestDescriptor, RequestHasher, RequestIdentity, Sha256Hasher};
pub use integration::{ResponseCache, ResponseCacheBuilder};
pub use invalidation::{ClearFilter, ClearTarget, InvalidationEvent, InvalidationReason};
pub use metadata::{CachedResponse, MetadataManager};
pub use operation::{
    CacheOptions, CachePredicate, ClearScope, HeaderConflictPolicy, LocalOperation, Operation,
    OperationResolver, PredicatePrecedence, RemoteOperation, MAX_TTL_SECONDS,
};
pub use orchestrator::CacheOrchestrator;
pub use policy::{Behaviour, CachePriority, CacheStatus, FreshnessPreference};
pub use statistics::{CacheStatistics, ClassStatistics, EntryStatistics};
pub use store::{MemoryStore, Persistence};
pub use stream::{CacheStream, EmissionFilter};
pub use token::{CacheToken, CallTiming, ResultEnvelope};
pub use types::CacheStats;
