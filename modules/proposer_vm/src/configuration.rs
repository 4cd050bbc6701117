use anyhow::Result;
use config::Config;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Proposer VM configuration (from TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProposerVmConfig {
    /// Unix seconds at which proposer metadata becomes mandatory
    pub activation_time: u64,
    pub minimum_p_chain_height: u64,
    pub reset_height_index: bool,
    #[serde(default = "defaults::check_indexed_frequency_ms")]
    pub check_indexed_frequency_ms: u64,
    pub database_path: String,
}

impl ProposerVmConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        Ok(full.try_deserialize()?)
    }

    pub fn activation_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.activation_time)
    }

    pub fn check_indexed_frequency(&self) -> Duration {
        Duration::from_millis(self.check_indexed_frequency_ms)
    }
}

impl Default for ProposerVmConfig {
    fn default() -> Self {
        Self {
            activation_time: 0,
            minimum_p_chain_height: 0,
            reset_height_index: false,
            check_indexed_frequency_ms: defaults::check_indexed_frequency_ms(),
            database_path: "fjall-proposervm".to_string(),
        }
    }
}

mod defaults {
    pub fn check_indexed_frequency_ms() -> u64 {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_embedded_defaults() {
        let config = ProposerVmConfig::try_load(&Config::default()).unwrap();
        assert_eq!(config.activation_time, 0);
        assert!(!config.reset_height_index);
        assert_eq!(config.check_indexed_frequency(), Duration::from_secs(10));
        assert_eq!(config.database_path, "fjall-proposervm");
    }

    #[test]
    fn host_values_override_defaults() {
        let host = Config::builder()
            .set_override("activation-time", 1_600_000_000_i64)
            .unwrap()
            .set_override("minimum-p-chain-height", 12_i64)
            .unwrap()
            .set_override("reset-height-index", true)
            .unwrap()
            .build()
            .unwrap();
        let config = ProposerVmConfig::try_load(&host).unwrap();
        assert_eq!(
            config.activation_time(),
            UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );
        assert_eq!(config.minimum_p_chain_height, 12);
        assert!(config.reset_height_index);
    }
}
