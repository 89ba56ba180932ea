//! Scanner capability consumed by the multiplexer
//!
//! A scanner watches addresses for one coin type and emits a [`DepositNote`]
//! whenever one of them receives funds. How it finds deposits is its own
//! business; the multiplexer only registers addresses and drains its stream.

mod feed;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::deposit::DepositNote;

pub use feed::{DepositFeed, FeedScanner};

/// Errors raised by a scanner's own operations
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("Invalid {coin_type} address: '{address}'")]
    InvalidAddress { address: String, coin_type: String },

    #[error("Address {address} is already watched")]
    AddressExists { address: String },

    #[error("Scanner handles {expected}, got {actual}")]
    CoinTypeMismatch { expected: String, actual: String },

    #[error("Deposit stream of {coin_type} scanner is closed")]
    StreamClosed { coin_type: String },

    #[error("Scanner backend error: {0}")]
    Backend(String),
}

/// A producer of deposit notes for one coin type
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Start watching an address for deposits
    async fn add_scan_address(&self, address: &str, coin_type: &str) -> Result<(), ScannerError>;

    /// Hand over the receiving end of the deposit stream
    ///
    /// The stream can be taken once; later calls return None. The scanner
    /// ends the stream by dropping its sending side.
    fn deposit_stream(&self) -> Option<mpsc::Receiver<DepositNote>>;
}
