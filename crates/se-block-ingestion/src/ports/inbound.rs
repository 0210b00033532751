//! # Inbound Ports
//!
//! What the backfill pipeline offers to its caller.

use async_trait::async_trait;

use crate::domain::{ChainId, IngestError, RunReport};

/// Backfill API - inbound port.
#[async_trait]
pub trait BackfillApi: Send + Sync {
    /// Reconcile the store with the source's tip and return once every
    /// height up to the tip has been settled.
    ///
    /// Fails fast when the source cannot be reached or the persisted
    /// heights cannot be read. Per-block decode and write failures do not
    /// fail the run; they show up in the report.
    async fn run(&self) -> Result<RunReport, IngestError>;

    /// Chain this pipeline ingests.
    fn chain_id(&self) -> &ChainId;
}
