//! Configuration for the relay engine.

use std::time::Duration;

use crate::error::ConfigError;
use crate::types::Token;

/// Configuration for the relay engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on the size of a released batch.
    pub max_batch_size: usize,

    /// Upper bound on the time a query waits before a partial batch is
    /// flushed.
    pub max_wait: Duration,

    /// Degree of parallel dispatch (number of backend channels).
    pub num_channels: usize,

    /// Capacity of every bounded inter-stage queue.
    pub queue_depth: usize,

    /// Terminator appended to single-token completions, for load
    /// generators that expect one. `None` reports the bare token.
    pub eos_token: Option<Token>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait: Duration::from_millis(100),
            num_channels: 1,
            queue_depth: 64,
            eos_token: None,
        }
    }
}

impl EngineConfig {
    /// Config optimized for low time-to-first-token: no batching delay.
    pub fn low_latency() -> Self {
        Self {
            max_batch_size: 1,
            max_wait: Duration::from_millis(1),
            num_channels: 1,
            queue_depth: 16,
            eos_token: None,
        }
    }

    /// Config optimized for throughput: large batches, wide dispatch.
    pub fn high_throughput() -> Self {
        Self {
            max_batch_size: 32,
            max_wait: Duration::from_millis(200),
            num_channels: 4,
            queue_depth: 256,
            eos_token: None,
        }
    }

    /// Create config from `TOKENRELAY_*` environment variables, starting
    /// from the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TOKENRELAY_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.max_batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("TOKENRELAY_MAX_WAIT_MS") {
            if let Ok(n) = val.parse() {
                config.max_wait = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("TOKENRELAY_NUM_CHANNELS") {
            if let Ok(n) = val.parse() {
                config.num_channels = n;
            }
        }

        if let Ok(val) = std::env::var("TOKENRELAY_QUEUE_DEPTH") {
            if let Ok(n) = val.parse() {
                config.queue_depth = n;
            }
        }

        if let Ok(val) = std::env::var("TOKENRELAY_EOS_TOKEN") {
            if let Ok(n) = val.parse() {
                config.eos_token = Some(n);
            }
        }

        config
    }

    /// Validate threshold values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_wait.is_zero() {
            return Err(ConfigError::ZeroMaxWait);
        }
        if self.num_channels == 0 {
            return Err(ConfigError::ZeroChannels);
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.num_channels, 1);
        assert!(config.eos_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_low_latency_config() {
        let config = EngineConfig::low_latency();
        assert_eq!(config.max_batch_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_high_throughput_config() {
        let config = EngineConfig::high_throughput();
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.num_channels, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = EngineConfig::default();
        config.max_batch_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

        let mut config = EngineConfig::default();
        config.max_wait = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxWait));

        let mut config = EngineConfig::default();
        config.num_channels = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroChannels));

        let mut config = EngineConfig::default();
        config.queue_depth = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueDepth));
    }
}
