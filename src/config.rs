//! Deployment configuration for one booth (one motion).

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

use crate::address::Address;
use crate::merkle::{DEFAULT_DEPTH, MAX_DEPTH};

/// Configuration loading and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Underlying filesystem failure.
    #[error("config I/O error: {0}")]
    Io(String),
    /// JSON decoding failure.
    #[error("config decode error: {0}")]
    Decode(String),
    /// Semantically invalid configuration.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

/// Immutable addresses and parameters fixed when a booth is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoothConfig {
    /// Address of the booth itself; spender on the voice-credit ledger,
    /// holder of the tally reserve and operator on the cards.
    pub booth: Address,
    /// Leaf index of this motion in every card's tree.
    pub motion_id: u64,
    /// Depth of the card trees.
    #[serde(default = "default_depth")]
    pub tree_depth: usize,
    /// Pool collecting YES charges and tallies.
    pub yes_box: Address,
    /// Pool collecting NO charges and tallies.
    pub no_box: Address,
    /// Address whose signature may sweep the booth's balances.
    pub consolidator: Address,
    /// Voice-credit ledger the booth settles against.
    pub voice_credits: Address,
    /// Tally-token ledger.
    pub votes: Address,
    /// Balance-card registry.
    pub cards: Address,
}

impl BoothConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_json_str(&contents)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| ConfigError::Decode(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the booth cannot operate under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "tree_depth {} outside 1..={MAX_DEPTH}",
                self.tree_depth
            )));
        }
        if self.tree_depth < MAX_DEPTH && self.motion_id >> self.tree_depth != 0 {
            return Err(ConfigError::Invalid(format!(
                "motion_id {} does not fit a depth-{} tree",
                self.motion_id, self.tree_depth
            )));
        }
        if self.yes_box == self.no_box {
            return Err(ConfigError::Invalid(
                "yes_box and no_box must differ".to_string(),
            ));
        }
        if self.yes_box == self.booth || self.no_box == self.booth {
            return Err(ConfigError::Invalid(
                "pools must not be the booth itself".to_string(),
            ));
        }
        Ok(())
    }
}
