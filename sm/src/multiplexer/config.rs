//! Multiplexer configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    /// Capacity of the aggregated output channel
    ///
    /// Caps how far a fast scanner can run ahead of the consumer before its
    /// forwarding task blocks.
    #[serde(rename = "output-buffer", default = "default_output_buffer")]
    pub output_buffer: usize,
}

fn default_output_buffer() -> usize {
    debug!("default_output_buffer: called");
    1000
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        debug!("MultiplexerConfig::default: called");
        Self {
            output_buffer: default_output_buffer(),
        }
    }
}

impl MultiplexerConfig {
    /// Output buffer, never zero
    pub fn output_buffer(&self) -> usize {
        self.output_buffer.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MultiplexerConfig::default();
        assert_eq!(config.output_buffer, 1000);
    }

    #[test]
    fn test_zero_buffer_clamped() {
        let config = MultiplexerConfig { output_buffer: 0 };
        assert_eq!(config.output_buffer(), 1);
    }

    #[test]
    fn test_missing_key_uses_default() {
        let config: MultiplexerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.output_buffer, 1000);

        let config: MultiplexerConfig = serde_yaml::from_str("output-buffer: 16").unwrap();
        assert_eq!(config.output_buffer, 16);
    }
}
