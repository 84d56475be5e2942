//! Configuration loading and defaults.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Runtime configuration for RidgeDB.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Buffer pool size (number of page frames). Default 256.
    pub buffer_pool_size: usize,

    /// Directory for relation and index files. Default ".".
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_pool_size: 256,
            data_dir: ".".to_string(),
        }
    }
}

impl Config {
    /// Load config from a TOML file. Empty file returns default config.
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let c: Config = toml::from_str(&s)?;
        c.validate()?;
        Ok(c)
    }

    /// Use default config. Convenience for tests and minimal setups.
    pub fn default_config() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_pool_size < 8 {
            anyhow::bail!("buffer_pool_size must be at least 8 frames");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.buffer_pool_size, 256);
    }

    #[test]
    fn tiny_pool_rejected() {
        let c = Config {
            buffer_pool_size: 1,
            ..Config::default()
        };
        assert!(c.validate().is_err());
    }
}
