//! # Domain Errors
//!
//! Error taxonomy for the backfill pipeline.
//!
//! | Error | Scope | Effect |
//! |-------|-------|--------|
//! | [`IngestError`] | run | Fatal, the run returns it to the caller |
//! | [`ConfigError`] | run | Fatal, raised before any stage starts |
//! | [`DecodeError`] | one block | Block dropped and logged |
//! | [`WriteError`] | one block | Retried with backoff, then left for the next run |

use thiserror::Error;

use super::value_objects::Height;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The block source could not be reached or did not report a tip.
    #[error("Failed to connect to block source {endpoint}: {reason}")]
    Connect {
        /// Endpoint that was dialed
        endpoint: String,
        /// Underlying failure
        reason: String,
    },

    /// Configuration rejected before the pipeline started.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The persisted-height index could not be read.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The source feed closed before the completion target was settled.
    #[error("Block source feed ended before height {target} was settled")]
    StreamEnded {
        /// Height the run was waiting for
        target: Height,
    },

    /// The run was interrupted before the completion target settled.
    #[error("Backfill interrupted before height {target} was settled")]
    Interrupted {
        /// Height the run was waiting for
        target: Height,
    },

    /// A pipeline stage panicked or was cancelled.
    #[error("Pipeline stage `{stage}` failed: {reason}")]
    StageFailed {
        /// Stage name
        stage: &'static str,
        /// Join failure description
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Chain identifier is empty.
    #[error("chain_id must not be empty")]
    EmptyChainId,

    /// Chain identifier contains the store's key separator.
    #[error("chain_id `{0}` must not contain ':'")]
    ReservedCharacter(String),

    /// Chain identifier is too long.
    #[error("chain_id exceeds {max} bytes")]
    ChainIdTooLong {
        /// Maximum accepted length
        max: usize,
    },

    /// A numeric setting must be positive.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending setting
        field: &'static str,
    },

    /// A setting has an invalid value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending setting
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("Failed to load config file {path}: {reason}")]
    Load {
        /// File path
        path: String,
        /// Underlying failure
        reason: String,
    },
}

/// Per-block decode failures. The block is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload does not have the block-results shape.
    #[error("malformed block results: {0}")]
    Malformed(String),

    /// Height inside the payload disagrees with the envelope height.
    #[error("height mismatch: requested {expected}, payload carries {found}")]
    HeightMismatch {
        /// Height the record was delivered for
        expected: Height,
        /// Height found in the payload
        found: Height,
    },

    /// The node answered the request with an error.
    #[error("source rejected request: {0}")]
    SourceRejected(String),

    /// An event attribute could not be decoded.
    #[error("event `{event}` attribute {part} is not valid base64 UTF-8: {reason}")]
    InvalidAttribute {
        /// Event type
        event: String,
        /// `key` or `value`
        part: &'static str,
        /// Decoder failure
        reason: String,
    },
}

/// Per-block write failures. Retried with backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    /// Storage engine failure.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Record could not be encoded for storage.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_names_endpoint() {
        let err = IngestError::Connect {
            endpoint: "ws://localhost:26657/websocket".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("ws://localhost:26657/websocket"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: IngestError = ConfigError::EmptyChainId.into();
        assert!(matches!(err, IngestError::Config(ConfigError::EmptyChainId)));
    }

    #[test]
    fn test_height_mismatch_message() {
        let err = DecodeError::HeightMismatch {
            expected: 5,
            found: 6,
        };
        assert!(err.to_string().contains("requested 5"));
    }

    #[test]
    fn test_stream_ended_message() {
        let err = IngestError::StreamEnded { target: 42 };
        assert!(err.to_string().contains("42"));
    }
}
