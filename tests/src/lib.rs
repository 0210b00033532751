//! # scrt-events Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # End-to-end backfill runs against RocksDB
//! └── benches/           # Gap calculation benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p se-tests
//! cargo bench -p se-tests
//! ```

pub mod integration;
