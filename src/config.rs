// 7.0 config.rs: what the account trades. tokens, markets, and where the keys live.
// 7.1 loaded from JSON. validation catches duplicate symbols and markets that
// reference tokens nobody configured.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::serde_pubkey;

fn default_precision() -> u32 {
    4
}

// One tradable token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    // Symbol used by markets and orders (e.g. "SOL")
    pub symbol: String,
    // Token mint
    #[serde(with = "serde_pubkey")]
    pub mint: Pubkey,
    // Mint decimals
    pub decimals: u8,
    // Digits shown when printing balances
    #[serde(default = "default_precision")]
    pub precision: u32,
    // Trading limits, human units. recorded, not enforced
    #[serde(default)]
    pub min_amount: Decimal,
    #[serde(default)]
    pub max_amount: Decimal,
}

// One market to trade on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    // Market symbol (e.g. "SOL/USDC")
    pub symbol: String,
    // Market account
    #[serde(with = "serde_pubkey")]
    pub address: Pubkey,
    // Base token symbol
    pub base: String,
    // Quote token symbol
    pub quote: String,
    // Protocol variant registered under this name
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub tokens: Vec<TokenConfig>,
    pub markets: Vec<MarketConfig>,
    // Solana CLI keypair files. payer falls back to owner
    #[serde(default)]
    pub owner_keypair: Option<PathBuf>,
    #[serde(default)]
    pub payer_keypair: Option<PathBuf>,
}

impl AccountConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut tokens = HashSet::new();
        for token in &self.tokens {
            if !tokens.insert(token.symbol.as_str()) {
                return Err(ConfigError::DuplicateSymbol(token.symbol.clone()));
            }
        }
        let mut markets = HashSet::new();
        for market in &self.markets {
            if !markets.insert(market.symbol.as_str()) {
                return Err(ConfigError::DuplicateSymbol(market.symbol.clone()));
            }
            for token in [&market.base, &market.quote] {
                if !tokens.contains(token.as_str()) {
                    return Err(ConfigError::UnknownToken {
                        market: market.symbol.clone(),
                        token: token.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.symbol == symbol)
    }

    /// (owner, payer). The payer is the owner when no payer file is set.
    pub fn load_keypairs(&self) -> Result<(Keypair, Keypair), ConfigError> {
        let owner_path = self
            .owner_keypair
            .as_ref()
            .ok_or(ConfigError::MissingKeypair("owner"))?;
        let owner = read_keypair(owner_path)?;
        let payer = read_keypair(self.payer_keypair.as_ref().unwrap_or(owner_path))?;
        Ok((owner, payer))
    }
}

fn read_keypair(path: &Path) -> Result<Keypair, ConfigError> {
    read_keypair_file(path).map_err(|e| ConfigError::Keypair {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid config: {0}")]
    Parse(String),

    #[error("Duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("Market {market} references unknown token {token}")]
    UnknownToken { market: String, token: String },

    #[error("No {0} keypair configured")]
    MissingKeypair(&'static str),

    #[error("Cannot read keypair {path:?}: {reason}")]
    Keypair { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_json() -> String {
        let sol = Pubkey::new_unique();
        let usdc = Pubkey::new_unique();
        let market = Pubkey::new_unique();
        format!(
            r#"{{
                "tokens": [
                    {{ "symbol": "SOL", "mint": "{sol}", "decimals": 9, "precision": 3, "max_amount": "25" }},
                    {{ "symbol": "USDC", "mint": "{usdc}", "decimals": 6 }}
                ],
                "markets": [
                    {{ "symbol": "SOL/USDC", "address": "{market}", "base": "SOL", "quote": "USDC", "protocol": "sim" }}
                ]
            }}"#
        )
    }

    #[test]
    fn parses_tokens_and_markets() {
        let config = AccountConfig::from_json_str(&sample_json()).unwrap();
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.markets[0].base, "SOL");
        let sol = config.token("SOL").unwrap();
        assert_eq!(sol.precision, 3);
        assert_eq!(sol.max_amount, dec!(25));
        assert_eq!(config.token("USDC").unwrap().precision, 4);
        assert!(config.owner_keypair.is_none());
    }

    #[test]
    fn rejects_duplicate_tokens() {
        let mut config = AccountConfig::from_json_str(&sample_json()).unwrap();
        let dup = config.tokens[0].clone();
        config.tokens.push(dup);
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSymbol("SOL".to_string()))
        );
    }

    #[test]
    fn rejects_market_with_unknown_token() {
        let mut config = AccountConfig::from_json_str(&sample_json()).unwrap();
        config.markets[0].quote = "USDT".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownToken { .. })
        ));
    }

    #[test]
    fn missing_owner_keypair() {
        let config = AccountConfig::default();
        assert!(matches!(
            config.load_keypairs(),
            Err(ConfigError::MissingKeypair("owner"))
        ));
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        assert!(matches!(
            AccountConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
