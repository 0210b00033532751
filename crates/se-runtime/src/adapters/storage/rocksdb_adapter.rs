//! # RocksDB Block Store
//!
//! Production implementation of the `BlockStore` and `HeightIndex` ports.
//!
//! ## Layout
//!
//! - Column family `block_results`
//! - Key: `br:{chain_id}:` followed by the height as 8 big-endian bytes, so a
//!   forward prefix scan yields one chain's heights in ascending order
//! - Value: the decoded block as JSON
//!
//! ## Configuration
//!
//! - Snappy compression
//! - Bloom filters (10 bits per key)
//! - LRU block cache
//! - fsync on write unless disabled

use std::path::PathBuf;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction,
    IteratorMode, Options, WriteOptions, DB,
};
use tracing::{debug, info};

use se_block_ingestion::{
    BlockStore, ChainId, DecodedBlock, Height, HeightIndex, IngestError, PersistedHeights,
    WriteError,
};

/// Column family holding decoded block results.
pub const CF_BLOCK_RESULTS: &str = "block_results";

/// All column families opened by the store.
pub const COLUMN_FAMILIES: &[&str] = &[CF_BLOCK_RESULTS];

const KEY_TAG: &str = "br";

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Database directory
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 32MB)
    pub write_buffer_size: usize,
    /// Maximum number of write buffers (default: 3)
    pub max_write_buffer_number: i32,
    /// Target file size for level-1 (default: 64MB)
    pub target_file_size_base: u64,
    /// fsync after each write (default: true)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/scrt-events"),
            block_cache_size: 128 * 1024 * 1024,
            write_buffer_size: 32 * 1024 * 1024,
            max_write_buffer_number: 3,
            target_file_size_base: 64 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Small buffers, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            target_file_size_base: 4 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// Block results store backed by RocksDB.
pub struct RocksDbBlockStore {
    db: DB,
    config: RocksDbConfig,
}

impl RocksDbBlockStore {
    /// Open or create the database.
    pub fn open(config: RocksDbConfig) -> Result<Self, IngestError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_base);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors).map_err(|e| {
            IngestError::Storage(format!(
                "Failed to open RocksDB at {}: {}",
                config.path.display(),
                e
            ))
        })?;

        info!(
            path = %config.path.display(),
            sync_writes = config.sync_writes,
            "[ingest] Opened block results store"
        );

        Ok(Self { db, config })
    }

    /// Stored block for `height`, if any.
    pub fn get(&self, chain_id: &ChainId, height: Height) -> Result<Option<DecodedBlock>, IngestError> {
        let cf = self.block_results().map_err(IngestError::Storage)?;
        let bytes = self
            .db
            .get_cf(cf, block_key(chain_id, height))
            .map_err(|e| IngestError::Storage(format!("RocksDB get failed: {}", e)))?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .map_err(|e| IngestError::Storage(format!("Corrupt record at {}: {}", height, e)))
            })
            .transpose()
    }

    fn block_results(&self) -> Result<&ColumnFamily, String> {
        self.db
            .cf_handle(CF_BLOCK_RESULTS)
            .ok_or_else(|| format!("missing column family `{}`", CF_BLOCK_RESULTS))
    }
}

impl HeightIndex for RocksDbBlockStore {
    fn persisted_heights(&self, chain_id: &ChainId) -> Result<PersistedHeights, IngestError> {
        let cf = self.block_results().map_err(IngestError::Storage)?;
        let prefix = chain_prefix(chain_id);
        let mut heights = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, _) =
                item.map_err(|e| IngestError::Storage(format!("RocksDB scan failed: {}", e)))?;
            if !key.starts_with(&prefix) {
                break;
            }
            match parse_height(&key[prefix.len()..]) {
                Some(height) => heights.push(height),
                None => debug!(key_len = key.len(), "[ingest] Skipping malformed index key"),
            }
        }

        Ok(heights.into_iter().collect())
    }
}

impl BlockStore for RocksDbBlockStore {
    fn upsert(&self, block: &DecodedBlock) -> Result<(), WriteError> {
        let cf = self.block_results().map_err(WriteError::Io)?;
        let value =
            serde_json::to_vec(block).map_err(|e| WriteError::Serialization(e.to_string()))?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);

        self.db
            .put_cf_opt(cf, block_key(&block.chain_id, block.height), value, &write_opts)
            .map_err(|e| WriteError::Io(format!("RocksDB put failed: {}", e)))
    }
}

fn chain_prefix(chain_id: &ChainId) -> Vec<u8> {
    format!("{}:{}:", KEY_TAG, chain_id).into_bytes()
}

fn block_key(chain_id: &ChainId, height: Height) -> Vec<u8> {
    let mut key = chain_prefix(chain_id);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn parse_height(suffix: &[u8]) -> Option<Height> {
    let bytes: [u8; 8] = suffix.try_into().ok()?;
    Some(Height::from_be_bytes(bytes))
}
