//! Result streams and the emission filter
//!
//! A cached call produces one or two emissions: an optional non-final STALE
//! value followed by a final one. [`EmissionFilter`] reduces such a stream to
//! a single envelope for callers that want one value.

use crate::cache::policy::CacheStatus;
use crate::cache::token::ResultEnvelope;
use crate::error::{CacheError, Result};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Ordered emissions of one call.
///
/// The stream is cold: nothing happens until it is polled, and dropping it
/// cancels any fetch still in flight.
pub struct CacheStream<T> {
    inner: BoxStream<'static, ResultEnvelope<T>>,
}

impl<T> CacheStream<T> {
    pub fn new(stream: impl Stream<Item = ResultEnvelope<T>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Stream of a single lazily computed emission
    pub fn once(
        future: impl std::future::Future<Output = ResultEnvelope<T>> + Send + 'static,
    ) -> Self
    where
        T: 'static,
    {
        Self::new(stream::once(future))
    }
}

impl<T> Stream for CacheStream<T> {
    type Item = ResultEnvelope<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Picks the single emission a value-oriented caller should see
#[derive(Debug, Clone, Copy, Default)]
pub struct EmissionFilter {
    /// Take the first emission even if it is not final
    pub allow_non_final: bool,
}

impl EmissionFilter {
    pub fn new(allow_non_final: bool) -> Self {
        Self { allow_non_final }
    }

    /// First final emission of the stream.
    ///
    /// Falls back to the last emission when the stream ends without a final
    /// one, as offline priorities end on STALE. Remaining emissions are
    /// cancelled once one is picked.
    pub async fn first<T>(&self, mut stream: CacheStream<T>) -> Result<ResultEnvelope<T>> {
        let mut last = None;

        while let Some(envelope) = stream.next().await {
            if self.allow_non_final || envelope.is_final() {
                return Ok(envelope);
            }
            debug!("Skipping non-final emission {}", envelope.token);
            last = Some(envelope);
        }

        last.ok_or_else(|| CacheError::EmptyResult("call produced no emission".to_string()))
    }

    /// Value of the first final emission, or the error it carries
    pub async fn value<T>(&self, stream: CacheStream<T>) -> Result<T> {
        self.first(stream).await?.into_value()
    }
}

impl<T> ResultEnvelope<T> {
    /// Extract the value, turning EMPTY and failed emissions into errors
    pub fn into_value(self) -> Result<T> {
        if let Some(value) = self.value {
            return Ok(value);
        }

        match (self.token.status, self.exception) {
            (CacheStatus::Empty, Some(cause)) => Err(CacheError::EmptyResult(format!(
                "{}: {}",
                self.token.identity, cause
            ))),
            (CacheStatus::Empty, None) => {
                Err(CacheError::EmptyResult(self.token.identity.to_string()))
            }
            (_, Some(error)) => Err(error),
            (status, None) => Err(CacheError::EmptyResult(format!(
                "{} ({})",
                self.token.identity, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::from_millis;
    use crate::cache::fingerprint::RequestIdentity;
    use crate::cache::operation::Operation;
    use crate::cache::token::CacheToken;

    fn envelope(status: CacheStatus, value: Option<&str>) -> ResultEnvelope<String> {
        let token = CacheToken::new(
            RequestIdentity::unhashed("Facts"),
            Operation::do_not_cache(),
            status,
            from_millis(0).unwrap(),
        );
        ResultEnvelope::new(value.map(str::to_string), token)
    }

    fn stream_of(envelopes: Vec<ResultEnvelope<String>>) -> CacheStream<String> {
        CacheStream::new(stream::iter(envelopes))
    }

    #[tokio::test]
    async fn test_filter_skips_non_final() {
        let stream = stream_of(vec![
            envelope(CacheStatus::Stale, Some("old")),
            envelope(CacheStatus::Refreshed, Some("new")),
        ]);

        let picked = EmissionFilter::default().first(stream).await.unwrap();
        assert_eq!(picked.status(), CacheStatus::Refreshed);
        assert_eq!(picked.value.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_filter_allow_non_final() {
        let stream = stream_of(vec![
            envelope(CacheStatus::Stale, Some("old")),
            envelope(CacheStatus::Refreshed, Some("new")),
        ]);

        let picked = EmissionFilter::new(true).first(stream).await.unwrap();
        assert_eq!(picked.status(), CacheStatus::Stale);
    }

    #[tokio::test]
    async fn test_filter_falls_back_to_last() {
        let stream = stream_of(vec![envelope(CacheStatus::Stale, Some("old"))]);

        let value = EmissionFilter::default().value(stream).await.unwrap();
        assert_eq!(value, "old");
    }

    #[tokio::test]
    async fn test_filter_on_empty_stream() {
        let result = EmissionFilter::default().first(stream_of(Vec::new())).await;
        assert!(matches!(result, Err(CacheError::EmptyResult(_))));
    }

    #[test]
    fn test_into_value() {
        assert_eq!(
            envelope(CacheStatus::Fresh, Some("x")).into_value().unwrap(),
            "x"
        );

        let empty = envelope(CacheStatus::Empty, None)
            .with_exception(CacheError::NetworkFailure("offline".to_string()));
        match empty.into_value() {
            Err(CacheError::EmptyResult(message)) => assert!(message.contains("offline")),
            other => panic!("unexpected {:?}", other),
        }

        let not_cached = envelope(CacheStatus::NotCached, None)
            .with_exception(CacheError::NetworkFailure("offline".to_string()));
        assert!(matches!(
            not_cached.into_value(),
            Err(CacheError::NetworkFailure(_))
        ));

        assert!(matches!(
            envelope(CacheStatus::Done, None).into_value(),
            Err(CacheError::EmptyResult(_))
        ));
    }
}
