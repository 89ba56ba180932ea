//! Multiplexer lifecycle state and forwarding counters

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle of a multiplexer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxState {
    /// Accepting registrations, not yet forwarding
    #[default]
    Idle,
    /// Forwarding tasks are running
    Running,
    /// All forwarding tasks ended, or shutdown happened before start
    Stopped,
}

impl fmt::Display for MuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MuxState::Idle => "idle",
            MuxState::Running => "running",
            MuxState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a multiplexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexerStats {
    /// Lifecycle state
    pub state: MuxState,
    /// Number of registered scanners
    pub scanners: usize,
    /// Registered coin types, sorted
    pub coin_types: Vec<String>,
    /// Notes forwarded per coin type since start
    pub forwarded: BTreeMap<String, u64>,
    /// Notes forwarded across all coin types
    pub total_forwarded: u64,
}

/// Per coin type forwarded-note counters shared with forwarding tasks
#[derive(Debug, Default)]
pub(crate) struct ForwardCounters {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
}

impl ForwardCounters {
    /// Counter for a coin type, created on first use
    pub(crate) fn counter(&self, coin_type: &str) -> Arc<AtomicU64> {
        debug!(%coin_type, "ForwardCounters::counter: called");
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(coin_type.to_string())
            .or_default()
            .clone()
    }

    /// Current value of every counter
    pub(crate) fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(coin_type, count)| (coin_type.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }
}
