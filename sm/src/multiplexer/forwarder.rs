//! Forwarding task: drains one scanner's stream into the shared output

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::signal::SignalListener;
use crate::deposit::DepositNote;

/// Why a forwarding task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardOutcome {
    /// The scanner ended its stream
    Drained,
    /// Shutdown was requested
    Cancelled,
    /// The consumer dropped the output receiver
    ConsumerGone,
    /// The scanner's stream had already been taken
    NoStream,
}

/// One forwarding task's inputs
pub(crate) struct Forwarder {
    coin_type: String,
    deposits: Option<mpsc::Receiver<DepositNote>>,
    out: mpsc::Sender<DepositNote>,
    cancel: SignalListener,
    forwarded: Arc<AtomicU64>,
}

impl Forwarder {
    pub(crate) fn new(
        coin_type: String,
        deposits: Option<mpsc::Receiver<DepositNote>>,
        out: mpsc::Sender<DepositNote>,
        cancel: SignalListener,
        forwarded: Arc<AtomicU64>,
    ) -> Self {
        Self {
            coin_type,
            deposits,
            out,
            cancel,
            forwarded,
        }
    }

    /// Forward notes until the stream ends, shutdown fires or the consumer leaves
    ///
    /// Notes from this scanner reach the output in the order the scanner sent
    /// them. A note caught mid-send by shutdown is dropped along with its ack.
    pub(crate) async fn run(mut self) -> ForwardOutcome {
        debug!(coin_type = %self.coin_type, "Forwarder::run: called");
        let Some(mut deposits) = self.deposits.take() else {
            warn!(coin_type = %self.coin_type, "Scanner has no deposit stream to forward");
            return ForwardOutcome::NoStream;
        };

        let outcome = loop {
            let note = tokio::select! {
                biased;
                _ = self.cancel.fired() => break ForwardOutcome::Cancelled,
                note = deposits.recv() => note,
            };
            let Some(note) = note else {
                break ForwardOutcome::Drained;
            };

            tokio::select! {
                biased;
                _ = self.cancel.fired() => {
                    debug!(coin_type = %self.coin_type, "Forwarder::run: dropping in-flight note on shutdown");
                    break ForwardOutcome::Cancelled;
                }
                sent = self.out.send(note) => {
                    if sent.is_err() {
                        break ForwardOutcome::ConsumerGone;
                    }
                }
            }
            self.forwarded.fetch_add(1, Ordering::Relaxed);
        };

        let forwarded = self.forwarded.load(Ordering::Relaxed);
        match outcome {
            ForwardOutcome::ConsumerGone => {
                warn!(coin_type = %self.coin_type, forwarded, "Output receiver dropped, forwarding stopped")
            }
            _ => info!(coin_type = %self.coin_type, forwarded, ?outcome, "Scan task exited"),
        }
        outcome
    }
}
