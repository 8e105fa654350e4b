//! High-level entry point
//!
//! [`ResponseCache`] wires configuration, fingerprinting, operation
//! resolution, the orchestrator and a persistence backend together:
//! - `call` / `call_with_header` return the full emission stream
//! - `fetch` returns a single value through the emission filter
//! - `invalidate`, `clear` and `statistics` act on the store directly

use crate::cache::{
    clock::{Clock, SystemClock},
    codec::PayloadCodec,
    config::CacheConfig,
    fingerprint::{Fingerprinter, RequestDescriptor, RequestHasher, RequestIdentity},
    invalidation::ClearFilter,
    operation::{CachePredicate, ClearScope, Operation, OperationResolver},
    orchestrator::CacheOrchestrator,
    statistics::CacheStatistics,
    store::{MemoryStore, Persistence},
    stream::{CacheStream, EmissionFilter},
    token::ResultEnvelope,
    types::CacheStats,
};
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Response cache in front of a network call
///
/// Provides high-level caching operations over any [`Persistence`] backend
#[derive(Clone)]
pub struct ResponseCache {
    config: Arc<CacheConfig>,

    fingerprinter: Fingerprinter,

    resolver: OperationResolver,

    orchestrator: CacheOrchestrator,

    filter: EmissionFilter,

    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a cache backed by an in-memory store
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> ResponseCacheBuilder {
        ResponseCacheBuilder::new(config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fingerprint a request, falling back to an unhashed identity
    pub fn identify(&self, request: &RequestDescriptor) -> RequestIdentity {
        match self.fingerprinter.fingerprint(request) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Caching bypassed for {}: {}", request.url, e);
                RequestIdentity::unhashed(request.response_type.clone())
            }
        }
    }

    /// Run a call and return all of its emissions
    pub fn call<T, F>(
        &self,
        request: &RequestDescriptor,
        operation: Option<Operation>,
        fetch: F,
    ) -> Result<CacheStream<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.call_with_header(request, operation, None, fetch)
    }

    /// Run a call whose operation may also be declared in a header
    pub fn call_with_header<T, F>(
        &self,
        request: &RequestDescriptor,
        operation: Option<Operation>,
        header: Option<&str>,
        fetch: F,
    ) -> Result<CacheStream<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let operation = self.resolver.resolve(request, operation, header)?;
        let identity = self.identify(request);
        Ok(self.orchestrator.execute(identity, operation, fetch))
    }

    /// Run a call and return its final emission
    pub async fn fetch_envelope<T, F>(
        &self,
        request: &RequestDescriptor,
        operation: Option<Operation>,
        fetch: F,
    ) -> Result<ResultEnvelope<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let stream = self.call(request, operation, fetch)?;
        self.filter.first(stream).await
    }

    /// Run a call and return its value, or the error it ended with
    pub async fn fetch<T, F>(
        &self,
        request: &RequestDescriptor,
        operation: Option<Operation>,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let stream = self.call(request, operation, fetch)?;
        self.filter.value(stream).await
    }

    /// Invalidate the entry of a request
    pub async fn invalidate(&self, request: &RequestDescriptor) -> Result<bool> {
        let identity = self.identify(request);
        self.orchestrator.store().invalidate(&identity).await
    }

    /// Remove the entries selected by `scope` relative to `request`
    pub async fn clear(
        &self,
        request: &RequestDescriptor,
        scope: ClearScope,
        stale_only: bool,
    ) -> Result<usize> {
        let identity = self.identify(request);
        let filter = ClearFilter::for_identity(scope, &identity, stale_only, self.clock.now());
        self.orchestrator.store().clear(&filter).await
    }

    /// Remove every entry
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self
            .orchestrator
            .store()
            .clear(&ClearFilter::all(self.clock.now()))
            .await?;
        info!("Cleared {} entries from cache", removed);
        Ok(removed)
    }

    /// Per response type breakdown of the store
    pub async fn statistics(&self) -> Result<CacheStatistics> {
        let headers = self.orchestrator.store().list().await?;
        Ok(CacheStatistics::from_headers(headers, self.clock.now()))
    }

    /// Store counters
    pub async fn stats(&self) -> CacheStats {
        self.orchestrator.store().stats().await
    }
}

/// Builder for [`ResponseCache`]
pub struct ResponseCacheBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn Persistence>>,
    clock: Option<Arc<dyn Clock>>,
    codec: PayloadCodec,
    hasher: Option<Arc<dyn RequestHasher>>,
    predicate: Option<CachePredicate>,
}

impl ResponseCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            codec: PayloadCodec::new(),
            hasher: None,
            predicate: None,
        }
    }

    /// Use a persistence backend; defaults to a [`MemoryStore`]
    pub fn store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a time source; defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a codec with compression or encryption transforms
    pub fn codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Use a hashing function; defaults to SHA-256
    pub fn hasher(mut self, hasher: Arc<dyn RequestHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Decide operations for calls that do not declare one
    pub fn predicate(mut self, predicate: CachePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Build the cache
    pub fn build(self) -> Result<ResponseCache> {
        self.config.validate()?;
        info!("Initializing response cache with config: {:?}", self.config);

        let config = Arc::new(self.config);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(config.memory_max_entries)));
        let fingerprinter = self
            .hasher
            .map(Fingerprinter::new)
            .unwrap_or_default();

        let mut resolver = OperationResolver::new(config.header_conflict, config.predicate_precedence);
        if let Some(predicate) = self.predicate {
            resolver = resolver.with_predicate(predicate);
        }

        Ok(ResponseCache {
            filter: EmissionFilter::new(config.allow_non_final),
            orchestrator: CacheOrchestrator::new(store, self.codec, clock.clone(), config.clone()),
            fingerprinter,
            resolver,
            clock,
            config,
        })
    }
}
