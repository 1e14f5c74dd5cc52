//! Ledger configuration.
//!
//! Values come from an optional TOML file, then environment overrides:
//!
//! ```toml
//! mining_reward = 2.0
//! difficulty = { kind = "leading_zero_chars", level = 4 }
//! ```

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::blockchain::chain::MAX_MINING_REWARD;
use crate::blockchain::{Amount, Difficulty};

/// Overrides the difficulty level, keeping the configured predicate kind
pub const ENV_DIFFICULTY: &str = "POW_LEDGER_DIFFICULTY";

/// Overrides the mining reward, in coins
pub const ENV_MINING_REWARD: &str = "POW_LEDGER_REWARD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub difficulty: Difficulty,

    /// Coins minted to the miner with every block, genesis included
    #[serde(default = "default_mining_reward")]
    pub mining_reward: f64,
}

fn default_mining_reward() -> f64 {
    2.0
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::default(),
            mining_reward: default_mining_reward(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file and applies environment overrides on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        debug!("Loaded ledger config from {}", path.as_ref().display());

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup, e.g. the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DIFFICULTY) {
            let level: u32 = value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                key: ENV_DIFFICULTY.to_string(),
                value: value.clone(),
            })?;

            self.difficulty = match self.difficulty {
                Difficulty::LeadingZeroChars(_) => Difficulty::LeadingZeroChars(level),
                Difficulty::LeadingZeroBits(_) => Difficulty::LeadingZeroBits(level),
            };
        }

        if let Some(value) = lookup(ENV_MINING_REWARD) {
            self.mining_reward = value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                key: ENV_MINING_REWARD.to_string(),
                value: value.clone(),
            })?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mining_reward.is_finite() || self.mining_reward < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "mining_reward must be a non-negative number, got {}",
                self.mining_reward
            )));
        }

        if self.mining_reward_amount() > MAX_MINING_REWARD {
            return Err(ConfigError::Invalid(format!(
                "mining_reward must not exceed {}, got {}",
                MAX_MINING_REWARD, self.mining_reward
            )));
        }

        // A SHA-256 hex digest has 64 characters, or 256 bits
        let max_level = match self.difficulty {
            Difficulty::LeadingZeroChars(_) => 64,
            Difficulty::LeadingZeroBits(_) => 256,
        };
        if self.difficulty.level() > max_level {
            return Err(ConfigError::Invalid(format!(
                "difficulty level {} exceeds maximum of {}",
                self.difficulty.level(),
                max_level
            )));
        }

        Ok(())
    }

    pub fn mining_reward_amount(&self) -> Amount {
        Amount::from_coins(self.mining_reward)
    }
}
