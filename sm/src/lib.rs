//! scanmux - fan-in multiplexer for per-coin deposit scanners
//!
//! Each coin type has its own scanner producing a stream of deposit notes.
//! The [`Multiplexer`] registers those scanners, forwards every stream into a
//! single bounded output channel, and coordinates shutdown.
//!
//! # Modules
//!
//! - [`multiplexer`] - Registry, forwarding tasks, shutdown and completion signals
//! - [`scanner`] - Scanner trait and the in-memory feed scanner
//! - [`deposit`] - Deposit values and acknowledgements
//! - [`replay`] - Replaying recorded deposits through the multiplexer
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod deposit;
pub mod multiplexer;
pub mod replay;
pub mod scanner;

// Re-export commonly used types
pub use config::{Config, FeedConfig};
pub use deposit::{AckReceiver, AckResult, Deposit, DepositNote};
pub use multiplexer::{Multiplexer, MultiplexerConfig, MultiplexerStats, MuxError, MuxState};
pub use replay::{Replay, ReplayInput, ReplaySummary};
pub use scanner::{DepositFeed, FeedScanner, Scanner, ScannerError};
