//! # Algorithms Module
//!
//! Pure logic for gap planning, completion detection, decoding and retry.

pub mod completion;
pub mod decoder;
pub mod gap;
pub mod retry;

pub use completion::{CompletionDetector, CompletionState};
pub use decoder::{decode_block, BlockDecoder};
pub use gap::{compute_gaps, gap_ranges, scan_start, GapPlan, MissingHeights};
pub use retry::RetryPolicy;
