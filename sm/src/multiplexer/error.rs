//! Multiplexer error types

use thiserror::Error;

use crate::scanner::ScannerError;

/// Errors returned by multiplexer operations
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Cannot register a missing scanner")]
    NilScanner,

    #[error("Scanner of coin type {coin_type} already exists")]
    DuplicateCoinType { coin_type: String },

    #[error("Unknown coin type: {coin_type}")]
    UnknownCoinType { coin_type: String },

    #[error(transparent)]
    Scanner(#[from] ScannerError),

    #[error("Multiplexer already started")]
    AlreadyStarted,

    #[error("Multiplexer already stopped")]
    AlreadyStopped,

    #[error("Forwarding tasks panicked for: {}", coin_types.join(", "))]
    ForwarderPanicked { coin_types: Vec<String> },
}
