//! Stale-While-Revalidate Demo
//!
//! Caches a simulated API call in a file store, lets it expire, then shows the
//! stale value being emitted before the refreshed one.
//!
//! Usage:
//!   cargo run --example stale_while_revalidate
//!
//! Environment variables:
//!   CACHE_DIR - Directory of the file store (default: <tmp>/ouroboros-cache-demo)
//!   RUST_LOG  - Log filter (default: info)

use futures::StreamExt;
use ouroboros_cache::{
    CacheConfig, CacheOptions, CachePriority, ClearScope, FileStore, Operation, RequestDescriptor,
    ResponseCache,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Simulated network call returning a numbered fact
async fn fetch_fact(counter: Arc<AtomicU32>, fail: bool) -> anyhow::Result<String> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if fail {
        anyhow::bail!("connection refused");
    }
    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(format!("cat fact #{}", n))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Stale-While-Revalidate Demo ===");

    let dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("ouroboros-cache-demo"));
    let store = FileStore::open(&dir).await?;

    let cache = ResponseCache::builder(CacheConfig::from_env()?)
        .store(Arc::new(store))
        .build()?;

    let request = RequestDescriptor::get("https://catfact.example.com/fact", "CatFact");
    let counter = Arc::new(AtomicU32::new(0));
    cache.clear(&request, ClearScope::Class, false).await?;

    let operation = |priority| {
        Some(Operation::cache(
            CacheOptions::new(priority).ttl_seconds(1),
        ))
    };

    info!("\n--- First call (empty cache) ---");
    let fact: String = cache
        .fetch(
            &request,
            operation(CachePriority::StaleAcceptedFirst),
            fetch_fact(counter.clone(), false),
        )
        .await?;
    info!("Got: {}", fact);

    info!("\n--- Second call (fresh) ---");
    let envelope = cache
        .fetch_envelope(
            &request,
            operation(CachePriority::StaleAcceptedFirst),
            fetch_fact(counter.clone(), false),
        )
        .await?;
    info!("{} -> {:?}", envelope.token, envelope.value);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    info!("\n--- Third call (stale, refreshed) ---");
    let mut emissions = cache.call(
        &request,
        operation(CachePriority::StaleAcceptedFirst),
        fetch_fact(counter.clone(), false),
    )?;
    while let Some(envelope) = emissions.next().await {
        info!(
            "{} -> {:?} ({} ms)",
            envelope.token, envelope.value, envelope.timing.total_millis
        );
    }

    tokio::time::sleep(Duration::from_millis(1200)).await;

    info!("\n--- Fourth call (stale, network down) ---");
    let mut emissions = cache.call(
        &request,
        operation(CachePriority::StaleAcceptedLast),
        fetch_fact(counter.clone(), true),
    )?;
    while let Some(envelope) = emissions.next().await {
        info!("{} -> {:?}", envelope.token, envelope.value);
        if let Some(e) = &envelope.exception {
            info!("  cause: {}", e);
        }
    }

    info!("\n--- Offline call ---");
    let envelope = cache
        .fetch_envelope(
            &request,
            operation(CachePriority::OfflineStaleAccepted),
            fetch_fact(counter.clone(), true),
        )
        .await?;
    info!("{} -> {:?}", envelope.token, envelope.value);

    info!("\n--- Statistics ---\n{}", cache.statistics().await?);
    info!("Store counters: {}", cache.stats().await);

    Ok(())
}
