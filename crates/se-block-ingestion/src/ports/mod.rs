//! # Ports Module
//!
//! Inbound API of the backfill pipeline and the outbound dependencies it
//! drives (block source, height index, block store, metrics).

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
