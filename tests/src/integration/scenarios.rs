//! # Backfill Scenarios
//!
//! End-to-end runs of the backfill pipeline against a RocksDB store:
//!
//! 1. **Empty store**: every height up to the tip is fetched and stored
//! 2. **Interior gaps**: only the missing heights are requested
//! 3. **Decode failure**: the bad height is skipped, the run still succeeds
//! 4. **Tip write failure**: the run succeeds and the next run retries the tip
//! 5. **Unanswered height**: the run succeeds and reports the height
//!
//! Plus the rerun properties: a second run over a complete store requests
//! nothing, and writing the same heights again leaves the store unchanged.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tempfile::TempDir;

    use se_block_ingestion::test_utils::block_results_payload;
    use se_block_ingestion::{
        decode_block, AttributeEncoding, BackfillApi, BackfillPipeline, BlockStore, ChainId,
        DecodedBlock, Height, HeightIndex, IngestError, IngestionConfig, PersistedHeights,
        RawBlock, ScriptedSource, WriteError,
    };
    use se_runtime::{RocksDbBlockStore, RocksDbConfig};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn chain() -> ChainId {
        ChainId::parse("secret-4").unwrap()
    }

    fn open_store(dir: &TempDir) -> Arc<RocksDbBlockStore> {
        Arc::new(RocksDbBlockStore::open(RocksDbConfig::for_testing(dir.path())).unwrap())
    }

    fn stored<S: HeightIndex>(store: &S) -> Vec<Height> {
        store.persisted_heights(&chain()).unwrap().iter().collect()
    }

    fn seed(store: &RocksDbBlockStore, heights: &[Height]) {
        for &height in heights {
            let raw = RawBlock::new(height, block_results_payload(height));
            let block = decode_block(&raw, &chain(), AttributeEncoding::Base64).unwrap();
            store.upsert(&block).unwrap();
        }
    }

    /// RocksDB store whose writes fail for chosen heights.
    struct FlakyStore {
        inner: Arc<RocksDbBlockStore>,
        failures: Mutex<HashMap<Height, u32>>,
    }

    impl FlakyStore {
        fn failing(inner: Arc<RocksDbBlockStore>, height: Height, times: u32) -> Self {
            Self {
                inner,
                failures: Mutex::new(HashMap::from([(height, times)])),
            }
        }
    }

    impl HeightIndex for FlakyStore {
        fn persisted_heights(&self, chain_id: &ChainId) -> Result<PersistedHeights, IngestError> {
            self.inner.persisted_heights(chain_id)
        }
    }

    impl BlockStore for FlakyStore {
        fn upsert(&self, block: &DecodedBlock) -> Result<(), WriteError> {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&block.height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(WriteError::Io("disk full".to_string()));
                }
            }
            drop(failures);
            self.inner.upsert(block)
        }
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[tokio::test]
    async fn test_empty_store_backfills_to_tip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = ScriptedSource::new(3);

        let pipeline =
            BackfillPipeline::new(source.clone(), store.clone(), &IngestionConfig::for_testing())
                .unwrap();
        let report = pipeline.run().await.unwrap();

        assert_eq!(stored(store.as_ref()), vec![1, 2, 3]);
        assert_eq!(source.requests_seen(), vec![1, 2, 3]);
        assert_eq!(report.written, 3);
        assert!(report.is_clean());
        assert_eq!(store.get(&chain(), 3).unwrap().map(|b| b.height), Some(3));
    }

    #[tokio::test]
    async fn test_interior_gaps_are_filled() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        seed(&store, &[1, 3]);
        assert_eq!(stored(store.as_ref()), vec![1, 3]);

        let source = ScriptedSource::new(4);
        let pipeline =
            BackfillPipeline::new(source.clone(), store.clone(), &IngestionConfig::for_testing())
                .unwrap();
        let report = pipeline.run().await.unwrap();

        assert_eq!(source.requests_seen(), vec![2, 4]);
        assert_eq!(report.requested, 2);
        assert_eq!(stored(store.as_ref()), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_decode_failure_skips_height() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = ScriptedSource::new(3).reject(2);

        let pipeline =
            BackfillPipeline::new(source, store.clone(), &IngestionConfig::for_testing()).unwrap();
        let report = pipeline.run().await.unwrap();

        assert_eq!(stored(store.as_ref()), vec![1, 3]);
        assert_eq!(report.decode_failures, 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_abandoned_tip_is_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let rocks = open_store(&dir);
        let config = IngestionConfig::for_testing();
        let flaky = Arc::new(FlakyStore::failing(
            rocks.clone(),
            3,
            config.write_retry.max_attempts,
        ));

        let pipeline = BackfillPipeline::new(ScriptedSource::new(3), flaky, &config).unwrap();
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.abandoned_heights, vec![3]);
        assert_eq!(stored(rocks.as_ref()), vec![1, 2]);

        let source = ScriptedSource::new(3);
        let rerun = BackfillPipeline::new(source.clone(), rocks.clone(), &config).unwrap();
        let report = rerun.run().await.unwrap();

        assert_eq!(source.requests_seen(), vec![3]);
        assert!(report.is_clean());
        assert_eq!(stored(rocks.as_ref()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unanswered_height_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        seed(&store, &[1]);
        let source = ScriptedSource::new(4).silence(2);

        let report =
            BackfillPipeline::new(source.clone(), store.clone(), &IngestionConfig::for_testing())
                .unwrap()
                .run()
                .await
                .unwrap();

        assert_eq!(source.requests_seen(), vec![2, 3, 4]);
        assert_eq!(report.written, 2);
        assert_eq!(report.unanswered_heights, vec![2]);
        assert!(!report.is_clean());
        assert_eq!(stored(store.as_ref()), vec![1, 3, 4]);

        let source = ScriptedSource::new(4);
        BackfillPipeline::new(source.clone(), store.clone(), &IngestionConfig::for_testing())
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(source.requests_seen(), vec![2]);
        assert_eq!(stored(store.as_ref()), vec![1, 2, 3, 4]);
    }

    // =========================================================================
    // RERUN PROPERTIES
    // =========================================================================

    #[tokio::test]
    async fn test_complete_store_requests_nothing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let config = IngestionConfig::for_testing();

        BackfillPipeline::new(ScriptedSource::new(5), store.clone(), &config)
            .unwrap()
            .run()
            .await
            .unwrap();

        let source = ScriptedSource::new(5);
        let report = BackfillPipeline::new(source.clone(), store.clone(), &config)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(report.already_complete);
        assert!(source.requests_seen().is_empty());
        assert_eq!(stored(store.as_ref()), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_redelivered_heights_leave_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = ScriptedSource::new(4)
            .duplicate(2)
            .with_reorder_window(3)
            .with_live_heights([3, 5]);

        let report = BackfillPipeline::new(source, store.clone(), &IngestionConfig::for_testing())
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(stored(store.as_ref()), vec![1, 2, 3, 4, 5]);
        assert_eq!(store.get(&chain(), 2).unwrap().map(|b| b.height), Some(2));
    }

    #[tokio::test]
    async fn test_feed_loss_is_fatal_and_keeps_progress() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let source = ScriptedSource::new(10).end_after(4);

        let result = BackfillPipeline::new(source, store.clone(), &IngestionConfig::for_testing())
            .unwrap()
            .run()
            .await;

        assert!(matches!(result, Err(IngestError::StreamEnded { target: 10 })));
        assert_eq!(stored(store.as_ref()), vec![1, 2, 3, 4]);
    }
}
