//! # Storage Adapters
//!
//! RocksDB backs both the block store and the persisted-height index.
//! Block results live in a single column family, keyed by chain and height.

pub mod rocksdb_adapter;

pub use rocksdb_adapter::{RocksDbBlockStore, RocksDbConfig, CF_BLOCK_RESULTS, COLUMN_FAMILIES};
