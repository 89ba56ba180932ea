//! FeedScanner - in-memory scanner driven by a [`DepositFeed`]
//!
//! Used by the replay command to push recorded deposits through the
//! multiplexer, and by tests that need precise control over what a scanner
//! emits and when its stream ends.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Scanner, ScannerError};
use crate::deposit::{AckReceiver, Deposit, DepositNote};

type Watched = Arc<Mutex<HashSet<String>>>;

fn lock(watched: &Watched) -> MutexGuard<'_, HashSet<String>> {
    watched.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scanner for one coin type whose deposits are pushed in by hand
pub struct FeedScanner {
    coin_type: String,
    watched: Watched,
    stream: Mutex<Option<mpsc::Receiver<DepositNote>>>,
}

impl FeedScanner {
    /// Create a scanner and the feed that drives it
    ///
    /// `buffer` bounds how many notes the feed can queue before `push` waits.
    /// Zero is raised to one.
    pub fn new(coin_type: impl Into<String>, buffer: usize) -> (Self, DepositFeed) {
        let coin_type = coin_type.into();
        debug!(%coin_type, buffer, "FeedScanner::new: called");
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let watched: Watched = Arc::new(Mutex::new(HashSet::new()));

        let scanner = Self {
            coin_type: coin_type.clone(),
            watched: watched.clone(),
            stream: Mutex::new(Some(rx)),
        };
        let feed = DepositFeed { coin_type, watched, tx };
        (scanner, feed)
    }

    /// Coin type this scanner handles
    pub fn coin_type(&self) -> &str {
        &self.coin_type
    }

    /// Watched addresses, sorted
    pub fn watched_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = lock(&self.watched).iter().cloned().collect();
        addresses.sort();
        addresses
    }
}

#[async_trait]
impl Scanner for FeedScanner {
    async fn add_scan_address(&self, address: &str, coin_type: &str) -> Result<(), ScannerError> {
        debug!(%address, %coin_type, "FeedScanner::add_scan_address: called");
        if coin_type != self.coin_type {
            return Err(ScannerError::CoinTypeMismatch {
                expected: self.coin_type.clone(),
                actual: coin_type.to_string(),
            });
        }
        if address.trim().is_empty() {
            return Err(ScannerError::InvalidAddress {
                address: address.to_string(),
                coin_type: coin_type.to_string(),
            });
        }

        if !lock(&self.watched).insert(address.to_string()) {
            debug!(%address, "FeedScanner::add_scan_address: already watched");
            return Err(ScannerError::AddressExists {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    fn deposit_stream(&self) -> Option<mpsc::Receiver<DepositNote>> {
        debug!(coin_type = %self.coin_type, "FeedScanner::deposit_stream: called");
        self.stream.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Sending side of a [`FeedScanner`]
///
/// Dropping the feed ends the scanner's deposit stream.
pub struct DepositFeed {
    coin_type: String,
    watched: Watched,
    tx: mpsc::Sender<DepositNote>,
}

impl DepositFeed {
    /// Emit a deposit if its address is watched
    ///
    /// Returns the ack receiver for the emitted note, or None when the
    /// address is not watched and the deposit was filtered out.
    pub async fn push(&self, deposit: Deposit) -> Result<Option<AckReceiver>, ScannerError> {
        debug!(id = %deposit.id(), coin_type = %self.coin_type, "DepositFeed::push: called");
        if deposit.coin_type != self.coin_type {
            return Err(ScannerError::CoinTypeMismatch {
                expected: self.coin_type.clone(),
                actual: deposit.coin_type,
            });
        }
        if !lock(&self.watched).contains(&deposit.address) {
            debug!(address = %deposit.address, "DepositFeed::push: address not watched, skipping");
            return Ok(None);
        }

        let (note, ack) = DepositNote::new(deposit);
        self.tx.send(note).await.map_err(|_| ScannerError::StreamClosed {
            coin_type: self.coin_type.clone(),
        })?;
        Ok(Some(ack))
    }

    /// End the deposit stream
    pub fn close(self) {
        debug!(coin_type = %self.coin_type, "DepositFeed::close: called");
    }
}
