//! # Application Module
//!
//! The pipeline coordinator and the persistence writer it drives.

pub mod pipeline;
pub mod writer;

pub use pipeline::BackfillPipeline;
pub use writer::{PersistenceWriter, WriteOutcome};
