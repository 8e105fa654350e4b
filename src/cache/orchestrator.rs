//! The cache decision engine
//!
//! [`CacheOrchestrator::execute`] turns an operation and a fetch into an
//! ordered stream of emissions:
//!
//! - local operations (invalidate, clear) emit a single DONE
//! - `DoNotCache` passes the fetch through and emits NOT_CACHED
//! - cache operations look the request up, decide on staleness, optionally
//!   emit the stale value first, then refresh from the network and persist
//!
//! The stream is built with [`futures::stream::unfold`] so nothing runs until
//! it is polled. The fetch future is owned by the stream state: dropping the
//! stream drops the fetch, and nothing is persisted for a cancelled call.

use crate::cache::{
    clock::Clock,
    codec::PayloadCodec,
    config::CacheConfig,
    entry::{EntryHeader, SerialisationTag, StoredEntry},
    fingerprint::RequestIdentity,
    invalidation::{ClearFilter, InvalidationEvent, InvalidationReason},
    metadata::{CachedResponse, MetadataManager},
    operation::{CacheOptions, ClearScope, LocalOperation, Operation, RemoteOperation},
    policy::{Behaviour, CacheStatus, FreshnessPreference},
    store::Persistence,
    stream::CacheStream,
    token::{CacheToken, CallTiming, ResultEnvelope},
};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use futures::stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Runs cached calls against a persistence backend
#[derive(Clone)]
pub struct CacheOrchestrator {
    store: Arc<dyn Persistence>,

    codec: PayloadCodec,

    metadata: MetadataManager,

    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("codec", &self.codec)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Per-call state shared by the steps of a cached call
struct Call {
    orchestrator: CacheOrchestrator,

    options: CacheOptions,

    /// Token every emission of the call derives from
    base: CacheToken,

    started: Instant,
}

/// Progress of a cached call between emissions
enum Step<T, F> {
    Lookup(F),
    Refresh {
        fetch: F,
        previous: Option<CachedResponse<T>>,
        disk_millis: u64,
    },
    Done,
}

fn elapsed_millis(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl CacheOrchestrator {
    pub fn new(
        store: Arc<dyn Persistence>,
        codec: PayloadCodec,
        clock: Arc<dyn Clock>,
        config: Arc<CacheConfig>,
    ) -> Self {
        Self {
            store,
            codec,
            metadata: MetadataManager::new(clock.clone(), config),
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Run `operation` for the request identified by `identity`.
    ///
    /// `fetch` is only polled if the operation needs the network.
    pub fn execute<T, F>(
        &self,
        identity: RequestIdentity,
        operation: Operation,
        fetch: F,
    ) -> CacheStream<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let orchestrator = self.clone();
        let request_date = self.clock.now();

        match operation.clone() {
            Operation::Local(local) => CacheStream::once(async move {
                orchestrator
                    .run_local(identity, operation, local, request_date)
                    .await
            }),
            Operation::Remote(RemoteOperation::DoNotCache) => CacheStream::once(async move {
                orchestrator
                    .pass_through(identity, operation, fetch, request_date)
                    .await
            }),
            Operation::Remote(RemoteOperation::Cache(_)) if !identity.is_valid() => {
                warn!("No fingerprint for {}, calling through uncached", identity);
                CacheStream::once(async move {
                    orchestrator
                        .pass_through(identity, operation, fetch, request_date)
                        .await
                })
            }
            Operation::Remote(RemoteOperation::Cache(options)) => {
                let call = Call {
                    orchestrator,
                    options,
                    base: CacheToken::new(identity, operation, CacheStatus::Empty, request_date),
                    started: Instant::now(),
                };

                CacheStream::new(stream::unfold(
                    (call, Step::Lookup(fetch)),
                    |(call, step)| async move {
                        match step {
                            Step::Lookup(fetch) => Some(call.lookup(fetch).await),
                            Step::Refresh {
                                fetch,
                                previous,
                                disk_millis,
                            } => {
                                let envelope = call.refresh(fetch, previous, disk_millis).await;
                                Some((envelope, (call, Step::Done)))
                            }
                            Step::Done => None,
                        }
                    },
                ))
            }
        }
    }

    async fn run_local<T>(
        &self,
        identity: RequestIdentity,
        operation: Operation,
        local: LocalOperation,
        request_date: DateTime<Utc>,
    ) -> ResultEnvelope<T> {
        let started = Instant::now();

        let outcome = match local {
            LocalOperation::Invalidate => self.store.invalidate(&identity).await.map(|changed| {
                info!("Invalidate {}: {}", identity, if changed { "done" } else { "nothing to do" });
            }),
            LocalOperation::Clear { scope, stale_only } => {
                let filter = ClearFilter::for_identity(scope, &identity, stale_only, self.clock.now());
                self.store.clear(&filter).await.map(|count| {
                    info!(
                        "Cleared {} entries ({}, stale only: {})",
                        count,
                        scope.as_str(),
                        stale_only
                    );
                })
            }
        };

        let token = CacheToken::new(identity, operation, CacheStatus::Done, request_date);
        let envelope =
            ResultEnvelope::new(None, token).with_timing(CallTiming::disk_only(elapsed_millis(started)));

        match outcome {
            Ok(()) => envelope,
            Err(e) => {
                error!("Local operation failed for {}: {}", envelope.token.identity, e);
                envelope.with_exception(e)
            }
        }
    }

    async fn pass_through<T, F>(
        &self,
        identity: RequestIdentity,
        operation: Operation,
        fetch: F,
        request_date: DateTime<Utc>,
    ) -> ResultEnvelope<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let result = fetch.await.map_err(CacheError::network);
        let timing = CallTiming::split(0, elapsed_millis(started));

        let token = CacheToken::new(identity, operation, CacheStatus::NotCached, request_date);
        match result {
            Ok(value) => ResultEnvelope::new(Some(value), token).with_timing(timing),
            Err(e) => {
                warn!("Uncached call failed for {}: {}", token.identity, e);
                ResultEnvelope::new(None, token)
                    .with_timing(timing)
                    .with_exception(e)
            }
        }
    }

    /// Read and decode the entry of a request; corrupt entries are purged
    async fn cached<T: DeserializeOwned>(
        &self,
        identity: &RequestIdentity,
    ) -> Option<CachedResponse<T>> {
        let entry = match self.store.get(identity).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e @ CacheError::CorruptEntry(_)) => {
                self.purge_corrupt(identity, &e).await;
                return None;
            }
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", identity, e);
                return None;
            }
        };

        match self.codec.deserialise::<T>(&entry.payload, entry.tag()) {
            Ok(value) => Some(CachedResponse {
                value,
                cache_date: entry.cache_date(),
                expiry_date: entry.expiry_date(),
                is_compressed: entry.tag().compressed,
                is_encrypted: entry.tag().encrypted,
            }),
            Err(e) => {
                self.purge_corrupt(identity, &e).await;
                None
            }
        }
    }

    /// Remove the unreadable entry of a request
    async fn purge_corrupt(
        &self,
        identity: &RequestIdentity,
        cause: &CacheError,
    ) -> InvalidationEvent {
        let now = self.clock.now();
        let filter = ClearFilter::for_identity(ClearScope::Request, identity, false, now);

        let keys = match self.store.clear(&filter).await {
            Ok(0) => Vec::new(),
            Ok(_) => vec![identity.request_hash.clone()],
            Err(e) => {
                warn!("Could not purge corrupt entry for {}: {}", identity, e);
                Vec::new()
            }
        };

        let event = InvalidationEvent::new(InvalidationReason::Corrupt, keys, now)
            .with_context(cause.to_string());
        warn!("Discarding entry for {}: {}", identity, event);
        event
    }

    /// Write the value of a persistable emission; failures downgrade it to NOT_CACHED
    async fn persist<T: Serialize>(&self, envelope: ResultEnvelope<T>) -> ResultEnvelope<T> {
        let token = &envelope.token;
        let (Some(value), Some(cache_date), Some(expiry_date)) =
            (&envelope.value, token.cache_date, token.expiry_date)
        else {
            return envelope;
        };

        let tag = SerialisationTag::new(token.is_compressed, token.is_encrypted);
        let payload = match self.codec.serialise(value, tag) {
            Ok(payload) => payload,
            Err(e) => return self.metadata.serialisation_failed(envelope, e),
        };

        let entry = StoredEntry {
            header: EntryHeader {
                request_hash: token.identity.request_hash.clone(),
                class_hash: token.identity.class_hash.clone(),
                response_type: token.identity.response_type.clone(),
                cache_date,
                expiry_date,
                tag,
            },
            payload,
        };

        match self.store.put(entry).await {
            Ok(()) => {
                debug!("Cached {}", envelope.token);
                envelope
            }
            Err(e) => self.metadata.serialisation_failed(envelope, e),
        }
    }
}

impl Call {
    fn cached_envelope<T>(
        &self,
        cached: CachedResponse<T>,
        status: CacheStatus,
        disk_millis: u64,
    ) -> ResultEnvelope<T> {
        let token = self
            .base
            .with_status(status)
            .with_dates(Some(cached.cache_date), Some(cached.expiry_date))
            .with_flags(cached.is_compressed, cached.is_encrypted);

        ResultEnvelope::new(Some(cached.value), token).with_timing(CallTiming::disk_only(disk_millis))
    }

    fn empty_envelope<T>(&self, disk_millis: u64) -> ResultEnvelope<T> {
        ResultEnvelope::new(None, self.base.with_status(CacheStatus::Empty))
            .with_timing(CallTiming::disk_only(disk_millis))
    }

    /// First step: consult the store and emit whatever it warrants
    async fn lookup<T, F>(self, fetch: F) -> (ResultEnvelope<T>, (Call, Step<T, F>))
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let orchestrator = &self.orchestrator;
        let identity = &self.base.identity;
        let priority = self.options.priority;
        let behaviour = priority.behaviour();
        let freshness = priority.freshness();

        debug!("Checking cache for {} ({})", identity, priority);

        if behaviour == Behaviour::Invalidate {
            if let Err(e) = orchestrator.store.invalidate(identity).await {
                warn!("Could not invalidate {}: {}", identity, e);
            }
        }

        let previous: Option<CachedResponse<T>> = orchestrator.cached(identity).await;
        let disk_millis = elapsed_millis(self.started);
        let now = orchestrator.clock.now();

        let is_stale = match &previous {
            Some(cached) => now >= cached.expiry_date || behaviour == Behaviour::Invalidate,
            None => true,
        };

        if behaviour == Behaviour::Offline {
            let envelope = match previous {
                Some(cached) if !is_stale => {
                    self.cached_envelope(cached, CacheStatus::Fresh, disk_millis)
                }
                Some(cached) if freshness != FreshnessPreference::FreshOnly => {
                    self.cached_envelope(cached, CacheStatus::Stale, disk_millis)
                }
                _ => self.empty_envelope(disk_millis),
            };
            debug!("Offline lookup for {}: {}", identity, envelope.status());
            return (envelope, (self, Step::Done));
        }

        match previous {
            Some(cached) if !is_stale => {
                debug!("Fresh cache hit for {}", identity);
                let envelope = self.cached_envelope(cached, CacheStatus::Fresh, disk_millis);
                (envelope, (self, Step::Done))
            }
            Some(cached) if freshness.emits_cached_stale() => {
                debug!("Stale cache hit for {}, emitting before refresh", identity);
                let envelope =
                    self.cached_envelope(cached.clone(), CacheStatus::Stale, disk_millis);
                let next = Step::Refresh {
                    fetch,
                    previous: Some(cached),
                    disk_millis,
                };
                (envelope, (self, next))
            }
            previous => {
                let envelope = self.refresh(fetch, previous, disk_millis).await;
                (envelope, (self, Step::Done))
            }
        }
    }

    /// Second step: fetch, compute the transition, persist
    async fn refresh<T, F>(
        &self,
        fetch: F,
        previous: Option<CachedResponse<T>>,
        disk_millis: u64,
    ) -> ResultEnvelope<T>
    where
        T: Serialize,
        F: Future<Output = anyhow::Result<T>>,
    {
        info!("Attempting to refresh {}", self.base.identity);

        let result = self.fetch_with_timeout(fetch).await;
        let timing = CallTiming::split(disk_millis, elapsed_millis(self.started));

        let envelope = self.orchestrator.metadata.network_response(
            &self.base,
            &self.options,
            result,
            previous,
            timing,
        );

        if envelope.status().is_persistable() {
            self.orchestrator.persist(envelope).await
        } else {
            envelope
        }
    }

    async fn fetch_with_timeout<T, F>(&self, fetch: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.options.request_timeout_seconds {
            Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), fetch).await {
                Ok(result) => result.map_err(CacheError::network),
                Err(_) => Err(CacheError::TimeoutError {
                    timeout_seconds: seconds,
                    context: self.base.identity.to_string(),
                }),
            },
            None => fetch.await.map_err(CacheError::network),
        }
    }
}
