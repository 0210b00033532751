//! # Domain Value Objects
//!
//! Immutable value types shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use super::errors::ConfigError;
use super::invariants::{CHAIN_ID_SEPARATOR, MAX_CHAIN_ID_LEN};

/// Position of a block in the chain's total order.
pub type Height = u64;

/// Chain identifier scoping every height and record (e.g. `secret-4`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    /// Validate and wrap a chain identifier.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyChainId);
        }
        if trimmed.contains(CHAIN_ID_SEPARATOR) {
            return Err(ConfigError::ReservedCharacter(trimmed.to_string()));
        }
        if trimmed.len() > MAX_CHAIN_ID_LEN {
            return Err(ConfigError::ChainIdTooLong {
                max: MAX_CHAIN_ID_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChainId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

/// Snapshot of the heights already stored for one chain, read once per run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedHeights(BTreeSet<Height>);

impl PersistedHeights {
    /// Empty snapshot (fresh store).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `height` is stored.
    pub fn contains(&self, height: Height) -> bool {
        self.0.contains(&height)
    }

    /// Lowest stored height.
    pub fn lowest(&self) -> Option<Height> {
        self.0.first().copied()
    }

    /// Highest stored height.
    pub fn highest(&self) -> Option<Height> {
        self.0.last().copied()
    }

    /// Number of stored heights.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a fresh store.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of stored heights inside `range`.
    pub fn count_in(&self, range: RangeInclusive<Height>) -> u64 {
        self.0.range(range).count() as u64
    }

    /// Iterate stored heights in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Height> + '_ {
        self.0.iter().copied()
    }
}

impl AsRef<PersistedHeights> for PersistedHeights {
    fn as_ref(&self) -> &PersistedHeights {
        self
    }
}

impl FromIterator<Height> for PersistedHeights {
    fn from_iter<I: IntoIterator<Item = Height>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How event attribute keys and values are encoded by the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeEncoding {
    /// Base64 (Tendermint 0.34 and earlier).
    #[default]
    Base64,
    /// Plain UTF-8 strings (CometBFT 0.37+).
    Plain,
}

/// Summary of one backfill run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Chain the run reconciled.
    pub chain_id: ChainId,
    /// Tip captured at connection time.
    pub tip: Height,
    /// Heights requested from the source.
    pub requested: u64,
    /// Blocks at or below the tip that were written.
    pub written: u64,
    /// Live blocks above the tip that were written.
    pub written_above_tip: u64,
    /// Blocks dropped because they failed to decode.
    pub decode_failures: u64,
    /// Heights whose write was abandoned after exhausting retries.
    pub abandoned_heights: Vec<Height>,
    /// Requested heights the source never answered before it stopped.
    pub unanswered_heights: Vec<Height>,
    /// True when nothing was missing at start.
    pub already_complete: bool,
}

impl RunReport {
    /// Report for a run that found nothing to do.
    pub fn caught_up(chain_id: ChainId, tip: Height) -> Self {
        Self {
            chain_id,
            tip,
            requested: 0,
            written: 0,
            written_above_tip: 0,
            decode_failures: 0,
            abandoned_heights: Vec::new(),
            unanswered_heights: Vec::new(),
            already_complete: true,
        }
    }

    /// True when every requested height was persisted.
    pub fn is_clean(&self) -> bool {
        self.decode_failures == 0
            && self.abandoned_heights.is_empty()
            && self.unanswered_heights.is_empty()
    }
}
