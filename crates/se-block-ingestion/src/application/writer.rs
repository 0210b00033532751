//! # Persistence Writer
//!
//! Idempotent block writes with bounded retry. A write that exhausts its
//! attempts is reported, never propagated: the height stays missing and the
//! next run's gap calculation picks it up.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::algorithms::RetryPolicy;
use crate::domain::{DecodedBlock, WriteError};
use crate::ports::{BlockStore, PipelineMetrics};

/// Result of writing one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Persisted after `attempts` tries.
    Written {
        /// Attempts used, at least 1.
        attempts: u32,
    },
    /// Given up after `attempts` tries.
    Abandoned {
        /// Attempts used.
        attempts: u32,
        /// Error of the final attempt.
        error: WriteError,
    },
}

impl WriteOutcome {
    /// Whether the block reached the store.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Writes decoded blocks through a [`BlockStore`].
pub struct PersistenceWriter<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    metrics: Arc<dyn PipelineMetrics>,
}

impl<S: BlockStore + 'static> PersistenceWriter<S> {
    /// Create a writer over `store`.
    pub fn new(store: Arc<S>, policy: RetryPolicy, metrics: Arc<dyn PipelineMetrics>) -> Self {
        Self {
            store,
            policy,
            metrics,
        }
    }

    /// Upsert `block`, retrying with backoff until the policy's budget is spent.
    pub async fn write(&self, block: DecodedBlock) -> WriteOutcome {
        let block = Arc::new(block);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = {
                let store = Arc::clone(&self.store);
                let block = Arc::clone(&block);
                tokio::task::spawn_blocking(move || store.upsert(&block))
                    .await
                    .unwrap_or_else(|e| Err(WriteError::Io(format!("write task failed: {e}"))))
            };

            match result {
                Ok(()) => {
                    self.metrics.write_duration(started.elapsed());
                    debug!(
                        height = block.height,
                        chain_id = %block.chain_id,
                        attempt,
                        "[ingest] Block written"
                    );
                    return WriteOutcome::Written { attempts: attempt };
                }
                Err(e) if self.policy.allows_retry(attempt) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        height = block.height,
                        chain_id = %block.chain_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "[ingest] Write failed, retrying: {}",
                        e
                    );
                    self.metrics.write_retried();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    error!(
                        height = block.height,
                        chain_id = %block.chain_id,
                        attempt,
                        "[ingest] Write abandoned, height left for next run: {}",
                        e
                    );
                    self.metrics.write_abandoned();
                    return WriteOutcome::Abandoned {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::decode_block;
    use crate::domain::{AttributeEncoding, ChainId, RawBlock};
    use crate::ports::{InMemoryBlockStore, NoopMetrics};
    use crate::test_utils::block_results_payload;
    use std::time::Duration;

    fn chain() -> ChainId {
        ChainId::parse("secret-4").unwrap()
    }

    fn block(height: u64) -> DecodedBlock {
        let raw = RawBlock::new(height, block_results_payload(height));
        decode_block(&raw, &chain(), AttributeEncoding::Base64).unwrap()
    }

    fn writer(store: &InMemoryBlockStore, attempts: u32) -> PersistenceWriter<InMemoryBlockStore> {
        PersistenceWriter::new(
            Arc::new(store.clone()),
            RetryPolicy::immediate(attempts),
            Arc::new(NoopMetrics),
        )
    }

    #[tokio::test]
    async fn test_write_first_try() {
        let store = InMemoryBlockStore::new();
        let outcome = writer(&store, 3).write(block(4)).await;

        assert_eq!(outcome, WriteOutcome::Written { attempts: 1 });
        assert_eq!(store.get(&chain(), 4), Some(block(4)));
    }

    #[tokio::test]
    async fn test_write_recovers_after_transient_failures() {
        let store = InMemoryBlockStore::new();
        store.fail_writes(4, 2);

        let outcome = writer(&store, 3).write(block(4)).await;

        assert_eq!(outcome, WriteOutcome::Written { attempts: 3 });
        assert_eq!(store.heights(&chain()), vec![4]);
    }

    #[tokio::test]
    async fn test_write_abandons_after_budget() {
        let store = InMemoryBlockStore::new();
        store.break_height(4);

        let outcome = writer(&store, 3).write(block(4)).await;

        assert!(matches!(
            outcome,
            WriteOutcome::Abandoned { attempts: 3, error: WriteError::Io(_) }
        ));
        assert!(store.heights(&chain()).is_empty());
        assert_eq!(store.upsert_calls(), 3);
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let store = InMemoryBlockStore::new();
        let w = writer(&store, 1);

        assert!(w.write(block(5)).await.is_written());
        assert!(w.write(block(5)).await.is_written());
        assert_eq!(store.heights(&chain()), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_retries() {
        let store = InMemoryBlockStore::new();
        store.fail_writes(6, 2);
        let w = PersistenceWriter::new(
            Arc::new(store.clone()),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            Arc::new(NoopMetrics),
        );

        let started = tokio::time::Instant::now();
        assert_eq!(w.write(block(6)).await, WriteOutcome::Written { attempts: 3 });
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
