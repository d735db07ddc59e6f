//! Node configuration
//!
//! JSON file with a `miner` section and an optional `policy` section that
//! overrides the economic constants.

use crate::core::{Address, EconomicPolicy, PolicyError};
use crate::mining::MinerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid payout address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Invalid policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
}

/// Miner section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Whether to publish mining tasks at all
    pub enabled: bool,
    /// Base58 payout addresses; one is picked at random per template
    pub addresses: Vec<String>,
}

impl MinerConfig {
    /// Parse every configured address
    pub fn payout_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.addresses
            .iter()
            .map(|address| {
                address
                    .parse::<Address>()
                    .map_err(|e| ConfigError::InvalidAddress {
                        address: address.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn settings(&self) -> Result<MinerSettings, ConfigError> {
        Ok(MinerSettings {
            enabled: self.enabled,
            addresses: self.payout_addresses()?,
        })
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub miner: MinerConfig,
    pub policy: EconomicPolicy,
}

impl NodeConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        let config: NodeConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        self.miner.payout_addresses()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::MIN_CONFIRMATIONS;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");

        let config = NodeConfig {
            miner: MinerConfig {
                enabled: true,
                addresses: vec![Address::from_key_hash([3; 20]).to_string()],
            },
            ..NodeConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.miner.settings().unwrap().addresses,
            vec![Address::from_key_hash([3; 20])]
        );
    }

    #[test]
    fn test_policy_section_is_optional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");
        fs::write(&path, r#"{ "miner": { "enabled": true } }"#).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert!(loaded.miner.enabled);
        assert!(loaded.miner.addresses.is_empty());
        assert_eq!(loaded.policy, EconomicPolicy::default());

        fs::write(&path, r#"{ "policy": { "min_confirmations": 5 } }"#).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.policy.min_confirmations, 5);
        assert_ne!(loaded.policy.min_confirmations, MIN_CONFIRMATIONS);
        assert_eq!(loaded.policy.min_fee, EconomicPolicy::default().min_fee);
    }

    #[test]
    fn test_rejects_bad_addresses_and_policy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.json");

        fs::write(&path, r#"{ "miner": { "addresses": ["nope0"] } }"#).unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(ConfigError::InvalidAddress { .. })
        ));

        fs::write(
            &path,
            r#"{ "policy": { "reduce_reward_factor": { "numerator": 4, "denominator": 3 } } }"#,
        )
        .unwrap();
        assert!(matches!(
            NodeConfig::load(&path),
            Err(ConfigError::InvalidPolicy(PolicyError::FactorNotReducing(4, 3)))
        ));

        assert!(matches!(
            NodeConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::IoError(_))
        ));
    }
}
