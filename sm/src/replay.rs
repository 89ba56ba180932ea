//! Replay recorded deposits through the multiplexer
//!
//! Each input is a JSON-lines file of [`Deposit`] records for one coin type.
//! Every input gets its own [`FeedScanner`] watching all addresses in the
//! file, so the whole set flows through the real fan-in path.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use eyre::{Context, Result, eyre};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::deposit::Deposit;
use crate::multiplexer::{Multiplexer, MultiplexerStats};
use crate::scanner::{DepositFeed, FeedScanner};

/// One `COIN=PATH` replay input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayInput {
    pub coin_type: String,
    pub path: PathBuf,
}

impl FromStr for ReplayInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "ReplayInput::from_str: called");
        match s.split_once('=') {
            Some((coin_type, path)) if !coin_type.trim().is_empty() && !path.trim().is_empty() => Ok(Self {
                coin_type: coin_type.trim().to_string(),
                path: PathBuf::from(path.trim()),
            }),
            _ => Err(format!("Invalid input '{}'. Use: COIN=PATH", s)),
        }
    }
}

/// Outcome of a replay run
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    /// Multiplexer stats after forwarding stopped
    pub stats: MultiplexerStats,
    /// Deposits the handler accepted
    pub accepted: u64,
    /// Deposits the handler rejected
    pub rejected: u64,
}

/// Read a JSON-lines deposit file, skipping blank lines
pub fn load_deposits(path: &Path) -> Result<Vec<Deposit>> {
    debug!(path = %path.display(), "load_deposits: called");
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Deposit>(line)
                .context(format!("Invalid deposit at {}:{}", path.display(), idx + 1))
        })
        .collect()
}

/// A prepared replay: scanners registered, addresses watched, feeds loaded
pub struct Replay {
    mux: Arc<Multiplexer>,
    feeds: Vec<(DepositFeed, Vec<Deposit>)>,
}

impl Replay {
    /// Load every input and register one feed scanner per coin type
    pub async fn prepare(config: &Config, inputs: &[ReplayInput]) -> Result<Self> {
        debug!(input_count = inputs.len(), "Replay::prepare: called");
        if inputs.is_empty() {
            return Err(eyre!("No replay inputs given"));
        }

        let mux = Arc::new(Multiplexer::new(config.multiplexer.clone()));
        let mut feeds = Vec::with_capacity(inputs.len());

        for input in inputs {
            let deposits = load_deposits(&input.path)?;
            if let Some(foreign) = deposits.iter().find(|d| d.coin_type != input.coin_type) {
                return Err(eyre!(
                    "Deposit {} in {} has coin type {}, expected {}",
                    foreign.id(),
                    input.path.display(),
                    foreign.coin_type,
                    input.coin_type
                ));
            }

            let (scanner, feed) = FeedScanner::new(input.coin_type.clone(), config.feed.buffer);
            let scanner = Arc::new(scanner);
            mux.register_scanner(scanner.clone(), scanner.coin_type())
                .wrap_err(format!("Failed to register scanner for {}", scanner.coin_type()))?;

            let addresses: BTreeSet<&str> = deposits.iter().map(|d| d.address.as_str()).collect();
            for address in addresses {
                mux.add_scan_address(address, &input.coin_type).await?;
            }

            info!(coin_type = %input.coin_type, deposits = deposits.len(), "Loaded replay input");
            feeds.push((feed, deposits));
        }

        Ok(Self { mux, feeds })
    }

    /// Shared handle to the multiplexer, for requesting shutdown
    pub fn multiplexer(&self) -> Arc<Multiplexer> {
        self.mux.clone()
    }

    /// Push every deposit through the multiplexer
    ///
    /// `on_deposit` sees each aggregated deposit; its result is acked back to
    /// the feed. Returns after the output stream has ended.
    pub async fn run<F>(self, mut on_deposit: F) -> Result<ReplaySummary>
    where
        F: FnMut(&Deposit) -> Result<()>,
    {
        debug!("Replay::run: called");
        let mut output = self
            .mux
            .take_output()
            .ok_or_else(|| eyre!("Multiplexer output already taken"))?;

        let runner = {
            let mux = self.mux.clone();
            tokio::spawn(async move { mux.start().await })
        };

        let feeders: Vec<_> = self
            .feeds
            .into_iter()
            .map(|(feed, deposits)| {
                tokio::spawn(async move {
                    for deposit in deposits {
                        let id = deposit.id();
                        if let Err(e) = feed.push(deposit).await {
                            warn!(%id, error = %e, "Replay feed stopped early");
                            break;
                        }
                    }
                    feed.close();
                })
            })
            .collect();

        let mut accepted = 0;
        let mut rejected = 0;
        while let Some(note) = output.recv().await {
            match on_deposit(&note.deposit) {
                Ok(()) => {
                    accepted += 1;
                    note.ack(Ok(()));
                }
                Err(e) => {
                    rejected += 1;
                    note.ack(Err(e.to_string()));
                }
            }
        }

        for feeder in feeders {
            feeder.await.context("Replay feeder failed")?;
        }
        runner.await.context("Multiplexer task failed")??;

        let stats = self.mux.stats();
        info!(accepted, rejected, total_forwarded = stats.total_forwarded, "Replay complete");
        Ok(ReplaySummary {
            stats,
            accepted,
            rejected,
        })
    }
}
