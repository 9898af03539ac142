//! Device configuration using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `IMGU_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! IMGU_POOL__CAPACITY=6
//! IMGU_STREAM__PIPE_MODE=capture
//! IMGU_STREAM__DRAIN_TIMEOUT_MS=500
//! IMGU_QUEUES__DUMMY_SIZES__OUT=3110400
//! ```
//!
//! # Example
//!
//! ```no_run
//! use imgu::config::ImguConfig;
//!
//! let config = ImguConfig::load_from("imgu.toml")?;
//! println!("pool capacity: {}", config.pool.capacity);
//! # Ok::<(), imgu::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use imgu_core::hal::ParamBlock;
use imgu_core::limits::{default_dummy_sizes, MAX_BUFFER_BYTES, MAX_QUEUE_DEPTH, POOL_SIZE};
use imgu_core::{CssQueue, PerQueue, PipeMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "IMGU_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values parsed but are out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level device configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImguConfig {
    /// Parameter pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Hardware queue and filler buffer settings
    #[serde(default)]
    pub queues: QueueConfig,
    /// Streaming lifecycle settings
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Parameter pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Slots per parameter pool; also the aging window in frames
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,
    /// Bytes of the accelerator parameter block
    #[serde(default = "default_acc_size")]
    pub acc_size: usize,
    /// Bytes of the vmem0 parameter block
    #[serde(default = "default_vmem0_size")]
    pub vmem0_size: usize,
    /// Bytes of the dmem0 parameter block
    #[serde(default = "default_dmem0_size")]
    pub dmem0_size: usize,
}

/// Hardware queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Buffers accepted per hardware queue; also the filler count per queue
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Filler preallocation per queue, in bytes
    #[serde(default)]
    pub dummy_sizes: DummySizes,
}

/// Filler buffer preallocation sizes.
///
/// The input and parameter queues never receive fillers and have no entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummySizes {
    /// Output queue filler size in bytes
    pub out: usize,
    /// Viewfinder queue filler size in bytes
    pub vf: usize,
    /// 3A statistics queue filler size in bytes
    pub stat_3a: usize,
    /// DVS statistics queue filler size in bytes
    pub stat_dvs: usize,
}

/// Streaming lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pipeline mode (video or capture)
    #[serde(default)]
    pub pipe_mode: PipeMode,
    /// How long suspend waits for the hardware queues to drain
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_pool_capacity() -> usize {
    POOL_SIZE
}

fn default_acc_size() -> usize {
    4096
}

fn default_vmem0_size() -> usize {
    1024
}

fn default_dmem0_size() -> usize {
    512
}

fn default_max_depth() -> usize {
    MAX_QUEUE_DEPTH
}

fn default_drain_timeout() -> u64 {
    1000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
            acc_size: default_acc_size(),
            vmem0_size: default_vmem0_size(),
            dmem0_size: default_dmem0_size(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            dummy_sizes: DummySizes::default(),
        }
    }
}

impl Default for DummySizes {
    fn default() -> Self {
        let sizes = default_dummy_sizes();
        Self {
            out: sizes[CssQueue::Out],
            vf: sizes[CssQueue::Vf],
            stat_3a: sizes[CssQueue::Stat3a],
            stat_dvs: sizes[CssQueue::StatDvs],
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pipe_mode: PipeMode::default(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl DummySizes {
    /// Sizes as a per-queue table, zero for queues without fillers.
    #[must_use]
    pub fn to_table(&self) -> PerQueue<usize> {
        PerQueue::from_fn(|queue| match queue {
            CssQueue::In | CssQueue::Params => 0,
            CssQueue::Out => self.out,
            CssQueue::Vf => self.vf,
            CssQueue::Stat3a => self.stat_3a,
            CssQueue::StatDvs => self.stat_dvs,
        })
    }
}

impl PoolConfig {
    /// Configured size of one parameter block.
    #[must_use]
    pub fn block_size(&self, block: ParamBlock) -> usize {
        match block {
            ParamBlock::Acc => self.acc_size,
            ParamBlock::Vmem0 => self.vmem0_size,
            ParamBlock::Dmem0 => self.dmem0_size,
        }
    }

    /// All block sizes in block order.
    #[must_use]
    pub fn block_sizes(&self) -> [usize; ParamBlock::COUNT] {
        ParamBlock::ALL.map(|block| self.block_size(block))
    }
}

impl StreamConfig {
    /// How long suspend waits for the hardware queues to drain.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ImguConfig {
    /// Load defaults overridden by `IMGU_` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    /// Load defaults, then the TOML file at `path`, then the environment.
    ///
    /// A missing file is not an error; its layer is simply empty.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults plus environment layer, for callers adding their own providers.
    #[must_use]
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Pool capacity is non-zero
    /// - Queue depth is within `1..=MAX_QUEUE_DEPTH`
    /// - Drain timeout is non-zero
    /// - No block or filler size exceeds `MAX_BUFFER_BYTES`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Invalid pool capacity 0. Must be at least 1".into(),
            ));
        }

        if self.queues.max_depth == 0 || self.queues.max_depth > MAX_QUEUE_DEPTH {
            return Err(ConfigError::ValidationError(format!(
                "Invalid max_depth {}. Must be 1-{MAX_QUEUE_DEPTH}",
                self.queues.max_depth
            )));
        }

        if self.stream.drain_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Invalid drain_timeout_ms 0. Must be positive".into(),
            ));
        }

        for block in ParamBlock::ALL {
            let size = self.pool.block_size(block);
            if size > MAX_BUFFER_BYTES {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} block size {size}. Must not exceed {MAX_BUFFER_BYTES}",
                    block.name()
                )));
            }
        }

        for (queue, size) in self.queues.dummy_sizes.to_table().iter() {
            if *size > MAX_BUFFER_BYTES {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid dummy size {size} for {queue} queue. Must not exceed {MAX_BUFFER_BYTES}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ImguConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.capacity, 4);
        assert_eq!(config.queues.max_depth, 4);
        assert_eq!(config.stream.drain_timeout(), Duration::from_millis(1000));
        assert_eq!(config.queues.dummy_sizes.stat_3a, 125_664);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = ImguConfig::default();
        config.pool.capacity = 0;

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid pool capacity"));
    }

    #[test]
    fn test_depth_beyond_hardware_rejected() {
        let mut config = ImguConfig::default();
        config.queues.max_depth = MAX_QUEUE_DEPTH + 1;

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid max_depth"));
    }

    #[test]
    fn test_zero_drain_timeout_rejected() {
        let mut config = ImguConfig::default();
        config.stream.drain_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pool]
capacity = 6
acc_size = 128

[stream]
pipe_mode = "capture"
"#
        )
        .unwrap();

        let config = ImguConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pool.capacity, 6);
        assert_eq!(config.pool.acc_size, 128);
        assert_eq!(config.pool.vmem0_size, default_vmem0_size());
        assert_eq!(config.stream.pipe_mode, PipeMode::Capture);
        assert_eq!(config.queues, QueueConfig::default());
    }

    #[test]
    fn test_invalid_file_value_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queues]\nmax_depth = 9").unwrap();

        let err = ImguConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("imgu.toml", "[stream]\ndrain_timeout_ms = 250")?;
            jail.set_env("IMGU_STREAM__DRAIN_TIMEOUT_MS", "750");
            jail.set_env("IMGU_QUEUES__DUMMY_SIZES__VF", "64");

            let config = ImguConfig::load_from("imgu.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.stream.drain_timeout_ms, 750);
            assert_eq!(config.queues.dummy_sizes.vf, 64);
            Ok(())
        });
    }
}
