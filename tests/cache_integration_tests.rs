//! Integration tests for the response cache
//!
//! These tests drive [`ResponseCache`] end to end with a manual clock:
//! - Fresh, stale and refreshed lookups
//! - Refresh failures and freshness preferences
//! - Offline and invalidating priorities
//! - Local operations and clear scoping
//! - Serialisation flags and cancellation

use chrono::{DateTime, Utc};
use futures::future::{ready, Ready};
use futures::StreamExt;
use ouroboros_cache::cache::{
    CacheConfig, CacheOptions, CachePriority, CacheStatus, CacheStream, ClearScope, ManualClock,
    MemoryStore, Operation, PayloadCodec, PayloadTransform, Persistence, RequestDescriptor,
    ResponseCache, ResultEnvelope,
};
use ouroboros_cache::CacheError;
use std::sync::Arc;

struct Harness {
    cache: ResponseCache,
    store: MemoryStore,
    clock: ManualClock,
}

fn harness() -> Harness {
    harness_with(CacheConfig::default(), PayloadCodec::new())
}

fn harness_with(config: CacheConfig, codec: PayloadCodec) -> Harness {
    let store = MemoryStore::default();
    let clock = ManualClock::at_millis(0);
    let cache = ResponseCache::builder(config)
        .store(Arc::new(store.clone()))
        .clock(Arc::new(clock.clone()))
        .codec(codec)
        .build()
        .unwrap();

    Harness {
        cache,
        store,
        clock,
    }
}

fn facts(page: u32) -> RequestDescriptor {
    RequestDescriptor::get(format!("https://api.example.com/facts?page={}", page), "Facts")
}

fn users() -> RequestDescriptor {
    RequestDescriptor::get("https://api.example.com/users", "Users")
}

/// One second TTL so that t=500 is fresh and t=1500 is stale
fn op(priority: CachePriority) -> Option<Operation> {
    Some(Operation::cache(CacheOptions::new(priority).ttl_seconds(1)))
}

fn ok<T>(value: T) -> Ready<anyhow::Result<T>> {
    ready(Ok(value))
}

fn fail<T>(message: &'static str) -> Ready<anyhow::Result<T>> {
    ready(Err(anyhow::anyhow!(message)))
}

async fn collect<T>(stream: CacheStream<T>) -> Vec<ResultEnvelope<T>> {
    stream.collect().await
}

fn dates<T>(envelope: &ResultEnvelope<T>) -> (i64, i64) {
    (
        envelope.token.cache_date.unwrap().timestamp_millis(),
        envelope.token.expiry_date.unwrap().timestamp_millis(),
    )
}

/// Cache "v1" for `request` at t=0
async fn seed(h: &Harness, request: &RequestDescriptor) {
    h.clock.set_millis(0);
    let value: String = h
        .cache
        .fetch(request, op(CachePriority::StaleAcceptedFirst), ok("v1".to_string()))
        .await
        .unwrap();
    assert_eq!(value, "v1");
}

#[tokio::test]
async fn test_fresh_hit_skips_network() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(500);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleAcceptedFirst), fail::<String>("unused"))
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 1);
    assert_eq!(emissions[0].status(), CacheStatus::Fresh);
    assert_eq!(emissions[0].value.as_deref(), Some("v1"));
    assert_eq!(dates(&emissions[0]), (0, 1000));
}

#[tokio::test]
async fn test_stale_first_then_refreshed() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleAcceptedFirst), ok("v2".to_string()))
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[0].status(), CacheStatus::Stale);
    assert_eq!(emissions[0].value.as_deref(), Some("v1"));
    assert_eq!(dates(&emissions[0]), (0, 1000));
    assert!(!emissions[0].is_final());

    assert_eq!(emissions[1].status(), CacheStatus::Refreshed);
    assert_eq!(emissions[1].value.as_deref(), Some("v2"));
    assert_eq!(dates(&emissions[1]), (1500, 2500));

    let identity = h.cache.identify(&facts(1));
    let stored = h.store.get(&identity).await.unwrap().unwrap();
    assert_eq!(stored.cache_date().timestamp_millis(), 1500);
}

#[tokio::test]
async fn test_stale_first_refresh_failure() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleAcceptedFirst), fail::<String>("offline"))
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[0].status(), CacheStatus::Stale);
    assert_eq!(emissions[1].status(), CacheStatus::CouldNotRefresh);
    assert_eq!(emissions[1].value.as_deref(), Some("v1"));
    assert_eq!(dates(&emissions[1]), (0, 1000));
    assert!(matches!(
        emissions[1].exception,
        Some(CacheError::NetworkFailure(_))
    ));
}

#[tokio::test]
async fn test_stale_last_emits_once() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleAcceptedLast), fail::<String>("offline"))
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 1);
    assert_eq!(emissions[0].status(), CacheStatus::CouldNotRefresh);
    assert_eq!(emissions[0].value.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_stale_not_accepted_failure_is_empty() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleNotAccepted), fail::<String>("offline"))
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 1);
    assert_eq!(emissions[0].status(), CacheStatus::Empty);
    assert_eq!(emissions[0].value, None);
    assert_eq!(emissions[0].token.cache_date, None);
    assert!(emissions[0].exception.is_some());

    let result = h
        .cache
        .fetch(&facts(1), op(CachePriority::StaleNotAccepted), fail::<String>("offline"))
        .await;
    assert!(matches!(result, Err(CacheError::EmptyResult(_))));
}

#[tokio::test]
async fn test_offline_priorities() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let stale = collect(
        h.cache
            .call(&facts(1), op(CachePriority::OfflineStaleAccepted), fail::<String>("unused"))
            .unwrap(),
    )
    .await;
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].status(), CacheStatus::Stale);
    assert_eq!(stale[0].value.as_deref(), Some("v1"));

    let value: String = h
        .cache
        .fetch(&facts(1), op(CachePriority::OfflineStaleAccepted), fail("unused"))
        .await
        .unwrap();
    assert_eq!(value, "v1");

    let rejected = collect(
        h.cache
            .call(&facts(1), op(CachePriority::OfflineStaleNotAccepted), fail::<String>("unused"))
            .unwrap(),
    )
    .await;
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].status(), CacheStatus::Empty);

    let missing = collect(
        h.cache
            .call(&facts(2), op(CachePriority::OfflineStaleAccepted), ok("unused".to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(missing[0].status(), CacheStatus::Empty);
    assert!(h.store.get(&h.cache.identify(&facts(2))).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_priority_emits_stale_first() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(500);
    let emissions = collect(
        h.cache
            .call(
                &facts(1),
                op(CachePriority::InvalidateStaleAcceptedFirst),
                ok("v2".to_string()),
            )
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[0].status(), CacheStatus::Stale);
    assert_eq!(emissions[1].status(), CacheStatus::Refreshed);
    assert_eq!(dates(&emissions[1]), (500, 1500));
}

#[derive(Clone, Copy, Debug)]
enum Seeded {
    Missing,
    Fresh,
    Stale,
}

#[tokio::test]
async fn test_priorities_stay_within_their_statuses() {
    for priority in CachePriority::ALL {
        for seeded in [Seeded::Missing, Seeded::Fresh, Seeded::Stale] {
            for succeeds in [true, false] {
                let h = harness();
                match seeded {
                    Seeded::Missing => {}
                    Seeded::Fresh => {
                        seed(&h, &facts(1)).await;
                        h.clock.set_millis(500);
                    }
                    Seeded::Stale => {
                        seed(&h, &facts(1)).await;
                        h.clock.set_millis(1500);
                    }
                }

                let stream = if succeeds {
                    h.cache.call(&facts(1), op(priority), ok("v2".to_string()))
                } else {
                    h.cache.call(&facts(1), op(priority), fail::<String>("offline"))
                }
                .unwrap();
                let emissions = collect(stream).await;

                let case = format!("{} {:?} succeeds={}", priority, seeded, succeeds);
                assert!(!emissions.is_empty(), "{}", case);
                assert!(emissions.len() <= 2, "{}", case);
                if emissions.len() == 2 {
                    assert_eq!(emissions[0].status(), CacheStatus::Stale, "{}", case);
                    assert!(emissions[1].is_final(), "{}", case);
                }

                for envelope in &emissions {
                    assert!(
                        priority.permits(envelope.status()),
                        "{} emitted {}",
                        case,
                        envelope.status()
                    );
                    assert_eq!(envelope.token.priority(), Some(priority), "{}", case);
                }
            }
        }
    }
}

#[tokio::test]
async fn test_local_operations_through_headers() {
    let h = harness();
    seed(&h, &facts(1)).await;

    let invalidated = collect(
        h.cache
            .call_with_header(&facts(1), None, Some("Invalidate"), ok(String::new()))
            .unwrap(),
    )
    .await;
    assert_eq!(invalidated.len(), 1);
    assert_eq!(invalidated[0].status(), CacheStatus::Done);
    assert_eq!(invalidated[0].value, None);

    let stored = h
        .store
        .get(&h.cache.identify(&facts(1)))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.header.is_invalidated());

    let cleared = collect(
        h.cache
            .call_with_header(&facts(1), None, Some("Clear:ALL:false"), ok(String::new()))
            .unwrap(),
    )
    .await;
    assert_eq!(cleared[0].status(), CacheStatus::Done);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let h = harness();
    seed(&h, &facts(1)).await;

    assert!(h.cache.invalidate(&facts(1)).await.unwrap());
    assert!(!h.cache.invalidate(&facts(1)).await.unwrap());
    assert!(!h.cache.invalidate(&facts(2)).await.unwrap());

    // Invalidated entries are stale but still served on failure
    h.clock.set_millis(100);
    let emissions = collect(
        h.cache
            .call(&facts(1), op(CachePriority::StaleAcceptedLast), fail::<String>("offline"))
            .unwrap(),
    )
    .await;
    assert_eq!(emissions[0].status(), CacheStatus::CouldNotRefresh);
    assert_eq!(emissions[0].value.as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_clear_scopes() {
    let h = harness();
    seed(&h, &facts(1)).await;
    seed(&h, &facts(2)).await;
    seed(&h, &facts(3)).await;
    seed(&h, &users()).await;

    assert_eq!(h.cache.clear(&facts(1), ClearScope::Request, false).await.unwrap(), 1);
    assert_eq!(h.store.len().await, 3);

    assert_eq!(h.cache.clear(&facts(2), ClearScope::Class, false).await.unwrap(), 2);
    assert_eq!(h.store.len().await, 1);

    let stats = h.cache.statistics().await.unwrap();
    assert!(stats.class("Facts").is_none());
    assert_eq!(stats.class("Users").unwrap().fresh, 1);

    assert_eq!(h.cache.clear(&facts(1), ClearScope::All, false).await.unwrap(), 1);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_clear_stale_only() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1200);
    h.cache
        .fetch(&facts(2), op(CachePriority::StaleAcceptedFirst), ok("v1".to_string()))
        .await
        .unwrap();

    h.clock.set_millis(1500);
    assert_eq!(h.cache.clear(&facts(1), ClearScope::Class, true).await.unwrap(), 1);

    assert!(h.store.get(&h.cache.identify(&facts(1))).await.unwrap().is_none());
    assert!(h.store.get(&h.cache.identify(&facts(2))).await.unwrap().is_some());
}

struct Reverse;

impl PayloadTransform for Reverse {
    fn name(&self) -> &str {
        "reverse"
    }

    fn apply(&self, mut data: Vec<u8>) -> ouroboros_cache::Result<Vec<u8>> {
        data.reverse();
        Ok(data)
    }

    fn revert(&self, data: Vec<u8>) -> ouroboros_cache::Result<Vec<u8>> {
        self.apply(data)
    }
}

#[tokio::test]
async fn test_compressed_entries_round_trip() {
    let config = CacheConfig::builder().compress(true).build();
    let h = harness_with(config, PayloadCodec::new().with_compressor(Arc::new(Reverse)));
    let facts_list = vec!["cats purr".to_string(), "cats nap".to_string()];

    let first = h
        .cache
        .fetch_envelope(&facts(1), op(CachePriority::StaleAcceptedFirst), ok(facts_list.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), CacheStatus::Network);
    assert!(first.token.is_compressed);
    assert!(!first.token.is_encrypted);

    let stored = h
        .store
        .get(&h.cache.identify(&facts(1)))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.tag().compressed);
    assert_ne!(stored.payload, serde_json::to_vec(&facts_list).unwrap());

    h.clock.set_millis(500);
    let second = h
        .cache
        .fetch_envelope(&facts(1), op(CachePriority::StaleAcceptedFirst), fail::<Vec<String>>("unused"))
        .await
        .unwrap();
    assert_eq!(second.status(), CacheStatus::Fresh);
    assert!(second.token.is_compressed);
    assert_eq!(second.value, Some(facts_list));
}

struct BrokenCompressor;

impl PayloadTransform for BrokenCompressor {
    fn name(&self) -> &str {
        "broken"
    }

    fn apply(&self, _data: Vec<u8>) -> ouroboros_cache::Result<Vec<u8>> {
        Err(CacheError::SerialisationFailure("dictionary unavailable".to_string()))
    }

    fn revert(&self, data: Vec<u8>) -> ouroboros_cache::Result<Vec<u8>> {
        Ok(data)
    }
}

#[tokio::test]
async fn test_unpersistable_value_is_not_cached() {
    let h = harness_with(
        CacheConfig::default(),
        PayloadCodec::new().with_compressor(Arc::new(BrokenCompressor)),
    );
    let operation = Some(Operation::cache(
        CacheOptions::new(CachePriority::StaleAcceptedFirst)
            .ttl_seconds(1)
            .compress(true),
    ));

    let emissions = collect(h.cache.call(&facts(1), operation, ok(7u32)).unwrap()).await;

    assert_eq!(emissions.len(), 1);
    assert_eq!(emissions[0].status(), CacheStatus::NotCached);
    assert_eq!(emissions[0].value, Some(7));
    assert!(matches!(
        emissions[0].exception,
        Some(CacheError::SerialisationFailure(_))
    ));
    assert!(emissions[0].token.cache_date.is_none());
    assert!(emissions[0].token.expiry_date.is_none());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_huge_header_ttl_saturates_expiry() {
    let h = harness();

    let emissions = collect(
        h.cache
            .call_with_header(
                &facts(1),
                None,
                Some("Cache:STALE_ACCEPTED_FIRST:10000000000000::::"),
                ok(1u32),
            )
            .unwrap(),
    )
    .await;

    assert_eq!(emissions.len(), 1);
    assert_eq!(emissions[0].status(), CacheStatus::Network);
    assert_eq!(emissions[0].token.expiry_date, Some(DateTime::<Utc>::MAX_UTC));

    let stored = h.store.get(&h.cache.identify(&facts(1))).await.unwrap().unwrap();
    assert_eq!(stored.expiry_date(), DateTime::<Utc>::MAX_UTC);

    h.clock.set_millis(1_000_000_000);
    let later = h
        .cache
        .fetch_envelope(&facts(1), op(CachePriority::StaleAcceptedFirst), fail::<u32>("unused"))
        .await
        .unwrap();
    assert_eq!(later.status(), CacheStatus::Fresh);

    let rejected = h.cache.call_with_header(
        &facts(1),
        None,
        Some("Cache:STALE_ACCEPTED_FIRST:99999999999999999::::"),
        ok(1u32),
    );
    assert!(matches!(rejected, Err(CacheError::OperationParse { .. })));
}

#[tokio::test]
async fn test_allow_non_final_takes_stale() {
    let config = CacheConfig::builder().allow_non_final(true).build();
    let h = harness_with(config, PayloadCodec::new());
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let envelope = h
        .cache
        .fetch_envelope(&facts(1), op(CachePriority::StaleAcceptedFirst), ok("v2".to_string()))
        .await
        .unwrap();

    assert_eq!(envelope.status(), CacheStatus::Stale);
    assert_eq!(envelope.value.as_deref(), Some("v1"));

    let identity = h.cache.identify(&facts(1));
    let stored = h.store.get(&identity).await.unwrap().unwrap();
    assert_eq!(stored.cache_date().timestamp_millis(), 0);
}

#[tokio::test]
async fn test_dropping_stream_cancels_refresh() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(1500);
    let mut stream = h
        .cache
        .call(&facts(1), op(CachePriority::StaleAcceptedFirst), ok("v2".to_string()))
        .unwrap();

    let first = stream.next().await.unwrap();
    assert_eq!(first.status(), CacheStatus::Stale);
    drop(stream);

    let identity = h.cache.identify(&facts(1));
    let stored = h.store.get(&identity).await.unwrap().unwrap();
    assert_eq!(stored.cache_date().timestamp_millis(), 0);
    assert_eq!(stored.expiry_date().timestamp_millis(), 1000);
}

#[tokio::test]
async fn test_streams_are_cold() {
    let h = harness();

    let stream = h
        .cache
        .call(&facts(1), op(CachePriority::StaleAcceptedFirst), ok("v1".to_string()))
        .unwrap();
    assert!(h.store.is_empty().await);

    let emissions = collect(stream).await;
    assert_eq!(emissions[0].status(), CacheStatus::Network);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_store_stats_track_lookups() {
    let h = harness();
    seed(&h, &facts(1)).await;

    h.clock.set_millis(500);
    h.cache
        .fetch(&facts(1), op(CachePriority::StaleAcceptedFirst), fail::<String>("unused"))
        .await
        .unwrap();

    let stats = h.cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}
