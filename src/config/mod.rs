use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{serde_amount, Amount, ChainId, TokenMeta};

/// 1 token at 18 decimals.
pub const WEI_PER_TOKEN: Amount = 1_000_000_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Deployment parameters of one ledger instance.
///
/// ```toml
/// name = "Bridge Token"
/// symbol = "BRT"
/// decimals = 18
/// initial_supply = "1000000000000000000000000"
/// chain_id = 1
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "serde_amount")]
    pub initial_supply: Amount,
    pub chain_id: ChainId,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            name: "Token".to_string(),
            symbol: "TKN".to_string(),
            decimals: 18,
            initial_supply: 1_000_000 * WEI_PER_TOKEN,
            chain_id: 1,
        }
    }
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Same parameters on another chain.
    pub fn on_chain(&self, chain_id: ChainId) -> Self {
        Self {
            chain_id,
            ..self.clone()
        }
    }

    pub fn token_meta(&self) -> TokenMeta {
        TokenMeta {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty"));
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty"));
        }
        if self.decimals > 38 {
            // 10^39 no longer fits an Amount
            return Err(ConfigError::Invalid("decimals must be at most 38"));
        }
        Ok(())
    }
}
