//! Fan-in multiplexer for scanner deposit streams
//!
//! The Multiplexer owns three pieces:
//! - **Registry:** coin type to scanner map under one reader/writer lock
//! - **Forwarding tasks:** one per scanner, draining its stream into a bounded output channel
//! - **Signals:** one-shot shutdown and completion signals

mod config;
mod core;
mod error;
mod forwarder;
mod registry;
mod signal;
mod stats;

pub use config::MultiplexerConfig;
pub use core::Multiplexer;
pub use error::MuxError;
pub use stats::{MultiplexerStats, MuxState};
