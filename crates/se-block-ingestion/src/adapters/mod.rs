//! # Adapters Layer
//!
//! Block source implementations for real nodes.

mod tendermint_ws;

pub use tendermint_ws::TendermintWsSource;
