//! # Integration Tests
//!
//! Full backfill runs wiring the pipeline to the RocksDB store.

pub mod scenarios;
