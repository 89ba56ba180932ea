//! Deposit values carried from scanners to the consumer
//!
//! A [`DepositNote`] wraps a [`Deposit`] together with an optional
//! acknowledgement channel. The consumer acks the note once it has processed
//! the deposit, which lets the originating scanner mark it as handled.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// Result reported back to the scanner once a deposit was processed
pub type AckResult = Result<(), String>;

/// Receiving side of a deposit acknowledgement
pub type AckReceiver = oneshot::Receiver<AckResult>;

/// A deposit observed by a scanner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Deposit {
    /// Coin type of the scanner that saw the deposit
    pub coin_type: String,

    /// Watched address that received the funds
    pub address: String,

    /// Amount in the coin's smallest unit
    pub value: u64,

    /// Block height the deposit was found at
    #[serde(default)]
    pub height: u64,

    /// Transaction hash
    pub tx: String,

    /// Output index within the transaction
    #[serde(default)]
    pub n: u32,
}

impl Deposit {
    /// Unique identifier of the deposit: `tx:n`
    pub fn id(&self) -> String {
        format!("{}:{}", self.tx, self.n)
    }
}

impl fmt::Display for Deposit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({} @ {})",
            self.coin_type,
            self.id(),
            self.address,
            self.value,
            self.height
        )
    }
}

/// A deposit in flight, optionally carrying an acknowledgement channel
#[derive(Debug)]
pub struct DepositNote {
    /// The deposit itself
    pub deposit: Deposit,

    ack: Option<oneshot::Sender<AckResult>>,
}

impl DepositNote {
    /// Create a note and the receiver its producer waits on for the ack
    pub fn new(deposit: Deposit) -> (Self, AckReceiver) {
        debug!(id = %deposit.id(), "DepositNote::new: called");
        let (tx, rx) = oneshot::channel();
        (Self { deposit, ack: Some(tx) }, rx)
    }

    /// Create a note nobody waits on
    pub fn unacked(deposit: Deposit) -> Self {
        Self { deposit, ack: None }
    }

    /// Whether the producer is waiting for an acknowledgement
    pub fn expects_ack(&self) -> bool {
        self.ack.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Report the processing result back to the producer
    ///
    /// Returns false if nobody was listening.
    pub fn ack(self, result: AckResult) -> bool {
        debug!(id = %self.deposit.id(), ok = result.is_ok(), "DepositNote::ack: called");
        match self.ack {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Take the deposit out, dropping any pending acknowledgement
    pub fn into_deposit(self) -> Deposit {
        self.deposit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> Deposit {
        Deposit {
            coin_type: "btc".to_string(),
            address: "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string(),
            value: 150_000,
            height: 840_000,
            tx: "a1b2c3".to_string(),
            n: 1,
        }
    }

    #[test]
    fn test_deposit_id() {
        assert_eq!(deposit().id(), "a1b2c3:1");
    }

    #[test]
    fn test_deposit_serialized_keys() {
        let json = serde_json::to_value(deposit()).unwrap();
        assert_eq!(json["coin-type"], "btc");
        assert_eq!(json["n"], 1);
    }

    #[test]
    fn test_deposit_defaults_height_and_index() {
        let parsed: Deposit =
            serde_json::from_str(r#"{"coin-type":"eth","address":"0xabc","value":7,"tx":"0xdead"}"#).unwrap();
        assert_eq!(parsed.height, 0);
        assert_eq!(parsed.n, 0);
        assert_eq!(parsed.id(), "0xdead:0");
    }

    #[tokio::test]
    async fn test_ack_reaches_producer() {
        let (note, rx) = DepositNote::new(deposit());
        assert!(note.expects_ack());
        assert!(note.ack(Err("rejected".to_string())));
        assert_eq!(rx.await.unwrap(), Err("rejected".to_string()));
    }

    #[test]
    fn test_ack_without_listener() {
        let (note, rx) = DepositNote::new(deposit());
        drop(rx);
        assert!(!note.expects_ack());
        assert!(!note.ack(Ok(())));

        let note = DepositNote::unacked(deposit());
        assert!(!note.expects_ack());
        assert!(!note.ack(Ok(())));
    }
}
