//! Recording sink.
//!
//! Hands each normalized bounce to the store on its own. A failed write is
//! logged and counted, and the rest of the batch carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::model::Bounce;
use crate::store::BounceStore;

/// Process-wide recording counters.
#[derive(Debug, Default)]
pub struct SinkStats {
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl SinkStats {
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Outcome of recording one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub received: usize,
    pub recorded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct RecordingSink {
    store: Arc<dyn BounceStore>,
    stats: Arc<SinkStats>,
}

impl RecordingSink {
    pub fn new(store: Arc<dyn BounceStore>) -> Self {
        Self {
            store,
            stats: Arc::new(SinkStats::default()),
        }
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Record every bounce in order. Never fails.
    pub async fn record_all(&self, bounces: Vec<Bounce>) -> RecordSummary {
        let mut summary = RecordSummary {
            received: bounces.len(),
            ..Default::default()
        };

        for bounce in &bounces {
            match self.store.record(bounce).await {
                Ok(()) => {
                    summary.recorded += 1;
                    self.stats.recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    summary.failed += 1;
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        error = %e,
                        source = %bounce.source,
                        bounce_type = %bounce.bounce_type,
                        "bounce_record_failed"
                    );
                }
            }
        }

        if summary.received > 0 {
            info!(
                received = summary.received,
                recorded = summary.recorded,
                failed = summary.failed,
                "bounce_batch_recorded"
            );
        }

        summary
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::model::{BounceSource, BounceType};
    use crate::store::{BounceQuery, DeleteScope, InMemoryBounceStore, StoreError};

    /// Store that rejects writes for selected addresses.
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        pub reject: Vec<String>,
        pub written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BounceStore for FlakyStore {
        async fn record(&self, bounce: &Bounce) -> Result<(), StoreError> {
            if self.reject.contains(&bounce.email) {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.written.lock().unwrap().push(bounce.email.clone());
            Ok(())
        }

        async fn get_by_id(&self, _id: i64) -> Result<Bounce, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn query(&self, _query: &BounceQuery) -> Result<(Vec<Bounce>, usize), StoreError> {
            Ok((Vec::new(), 0))
        }

        async fn delete(&self, _scope: &DeleteScope) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn bounce(email: &str) -> Bounce {
        Bounce::for_email(email, BounceType::Hard, BounceSource::Sendgrid)
    }

    #[tokio::test]
    async fn test_records_every_bounce() {
        let store = Arc::new(InMemoryBounceStore::new());
        let sink = RecordingSink::new(store.clone());

        let summary = sink
            .record_all(vec![bounce("a@example.com"), bounce("b@example.com")])
            .await;

        assert_eq!(summary, RecordSummary { received: 2, recorded: 2, failed: 0 });
        assert_eq!(store.len().await, 2);
        assert_eq!(sink.stats().recorded(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_batch() {
        let store = Arc::new(FlakyStore {
            reject: vec!["b@example.com".to_string()],
            ..Default::default()
        });
        let sink = RecordingSink::new(store.clone());

        let summary = sink
            .record_all(vec![
                bounce("a@example.com"),
                bounce("b@example.com"),
                bounce("c@example.com"),
            ])
            .await;

        assert_eq!(summary, RecordSummary { received: 3, recorded: 2, failed: 1 });
        assert_eq!(
            store.written.lock().unwrap().as_slice(),
            ["a@example.com", "c@example.com"]
        );
        assert_eq!(sink.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_no_deduplication() {
        let store = Arc::new(InMemoryBounceStore::new());
        let sink = RecordingSink::new(store.clone());

        sink.record_all(vec![bounce("a@example.com")]).await;
        sink.record_all(vec![bounce("a@example.com")]).await;

        assert_eq!(store.len().await, 2);
    }
}
