//! TOML configuration for a pipeline.
//!
//! ```toml
//! buffers = [10000, 4096, 4096]
//!
//! [lock]
//! max_attempts      = 100000
//! retry_interval_us = 10
//!
//! [producer]
//! mode     = "fixed"   # "none", "fixed" or "jitter"
//! delay_us = 500
//!
//! [consumer]
//! mode      = "jitter"
//! delay_us  = 1000     # base delay
//! spread_us = 9000     # extra delay drawn from 0..=spread_us
//! ```

use crate::error::{PipelineError, Result};
use crate::lock::{LockPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
use crate::pipeline::PipelineBuilder;
use crate::rate::Pacing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Capacity used when a config names no buffers
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each buffer, first to last
    #[serde(default = "PipelineConfig::default_buffers")]
    pub buffers: Vec<usize>,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub producer: PacingConfig,

    /// Applied to both the read and the write side of every worker
    #[serde(default)]
    pub worker: PacingConfig,

    #[serde(default)]
    pub consumer: PacingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub max_attempts: u32,
    pub retry_interval_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    #[default]
    None,
    Fixed,
    Jitter,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default)]
    pub mode: PacingMode,
    #[serde(default)]
    pub delay_us: u64,
    #[serde(default)]
    pub spread_us: u64,
}

impl PacingConfig {
    pub fn to_pacing(&self) -> Pacing {
        match self.mode {
            PacingMode::None => Pacing::None,
            PacingMode::Fixed => Pacing::fixed_micros(self.delay_us),
            PacingMode::Jitter => Pacing::jitter_micros(self.delay_us, self.spread_us),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval_us: DEFAULT_RETRY_INTERVAL.as_micros() as u64,
        }
    }
}

impl LockConfig {
    pub fn to_policy(&self) -> Result<LockPolicy> {
        LockPolicy::new(
            self.max_attempts,
            Duration::from_micros(self.retry_interval_us),
        )
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffers: Self::default_buffers(),
            lock: LockConfig::default(),
            producer: PacingConfig::default(),
            worker: PacingConfig::default(),
            consumer: PacingConfig::default(),
        }
    }
}

impl PipelineConfig {
    fn default_buffers() -> Vec<usize> {
        vec![DEFAULT_CAPACITY]
    }

    /// Read and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    /// Turn the config into a builder. Capacities and pacing are checked
    /// again when the builder is built.
    pub fn into_builder(self) -> Result<PipelineBuilder> {
        let policy = self.lock.to_policy()?;
        let worker = self.worker.to_pacing();

        let builder = self.buffers.iter().fold(
            PipelineBuilder::new()
                .lock_policy(policy)
                .producer_pacing(self.producer.to_pacing())
                .worker_pacing(worker, worker)
                .consumer_pacing(self.consumer.to_pacing()),
            |builder, &capacity| builder.add_buffer(capacity),
        );
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.buffers, vec![10_000]);
        assert_eq!(config.lock.to_policy().unwrap(), LockPolicy::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = PipelineConfig::from_toml(
            r#"
            buffers = [4, 8, 16]

            [lock]
            max_attempts = 500
            retry_interval_us = 20

            [producer]
            mode = "fixed"
            delay_us = 100

            [consumer]
            mode = "jitter"
            delay_us = 1000
            spread_us = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.buffers, vec![4, 8, 16]);
        assert_eq!(config.producer.to_pacing(), Pacing::fixed_micros(100));
        assert_eq!(config.worker.to_pacing(), Pacing::None);
        assert_eq!(config.consumer.to_pacing(), Pacing::jitter_micros(1000, 2000));

        let pipeline = config.into_builder().unwrap().build().unwrap();
        assert_eq!(pipeline.buffer_count(), 3);
        assert_eq!(pipeline.buffer(2).unwrap().capacity(), 16);
        assert_eq!(pipeline.buffer(0).unwrap().lock_policy().max_attempts(), 500);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = PipelineConfig::from_toml("[producer]\nmode = \"bursty\"\n");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = PipelineConfig::from_toml("[lock]\nmax_attempts = 0\nretry_interval_us = 1\n")
            .unwrap();
        assert!(matches!(
            config.into_builder(),
            Err(PipelineError::InvalidLockPolicy(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffers = [32]").unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.buffers, vec![32]);
    }

    #[test]
    fn test_missing_file() {
        let result = PipelineConfig::load("/nonexistent/ring-pipeline.toml");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.consumer = PacingConfig {
            mode: PacingMode::Fixed,
            delay_us: 250,
            spread_us: 0,
        };
        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }
}
