//! Error types for the projection pipeline.

use thiserror::Error;

/// Errors that can occur while projecting logs into the entity store.
///
/// The variants follow the failure taxonomy of the engine: some are absorbed
/// at the component that raises them (unroutable events, reverted calls),
/// some fail a single log, and some abort the whole block.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No route for '{signature}' emitted by {address}")]
    UnroutableEvent { address: String, signature: String },

    #[error("Call {method}() on {address} reverted at block {block_number}")]
    ExternalCallReverted {
        address: String,
        method: String,
        block_number: u64,
    },

    #[error("Invalid precision: exponent {exponent} outside 0..={max}")]
    InvalidPrecision { exponent: i64, max: i64 },

    #[error("Malformed event '{signature}': {reason}")]
    MalformedEvent { signature: String, reason: String },

    #[error("Entity {key} not found")]
    NotFound { key: String },

    #[error("Invariant violated in '{handler}': {reason}")]
    HandlerInvariantViolation { handler: String, reason: String },

    #[error("Reorg to block {common_ancestor} arrived while applying block {block_number}")]
    ReorgDuringApplication {
        block_number: u64,
        common_ancestor: u64,
    },

    #[error("Common ancestor of block {block_number} is not in the tracked window")]
    AncestorNotFound { block_number: u64 },

    #[error("Projector halted: {reason}")]
    Halted { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ProjectionError {
    /// Shorthand for an invariant violation raised by `handler`.
    pub fn invariant(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerInvariantViolation {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a malformed-input failure on `signature`.
    pub fn malformed(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            signature: signature.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error is a reorg notification rather than a failure.
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDuringApplication { .. })
    }

    /// Returns `true` if the error must abort the block being applied.
    ///
    /// Everything else only fails the log that raised it.
    pub fn is_block_fatal(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_)
                | Self::Storage(_)
                | Self::HandlerInvariantViolation { .. }
                | Self::Serialization(_)
                | Self::Halted { .. }
                | Self::Other(_)
        )
    }

    /// Returns `true` if the error latches the projector until an operator clears it.
    pub fn is_halting(&self) -> bool {
        matches!(self, Self::HandlerInvariantViolation { .. })
    }
}
