use crate::crypto::PublicKey;
use crate::error::ConfigError;
use hex::FromHex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tokens carry 9 decimals.
pub const TOKEN_DECIMALS: u32 = 9;
pub const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default)]
    pub params: ChainParams,
    #[serde(default)]
    pub node: NodeSettings,
}

/// Consensus-relevant constants. Every replica must run with identical values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Governance power under this is folded into free tokens.
    #[serde(default = "default_min_validator_power")]
    pub min_validator_power: i64,
    /// A data point must be at least this many seconds old to be proposed.
    #[serde(default = "default_min_data_age")]
    pub min_data_age_secs: u64,
    /// Reward per signed commit, in basis points of governance power.
    #[serde(default = "default_reward_rate")]
    pub reward_rate_bps: u32,
    /// Penalty per misbehavior, in basis points of governance power.
    #[serde(default = "default_penalty_rate")]
    pub penalty_rate_bps: u32,
}

fn default_chain_id() -> String {
    "oracle-ledger".to_string()
}

fn default_min_validator_power() -> i64 {
    10_000 * 10i64.pow(TOKEN_DECIMALS)
}

fn default_min_data_age() -> u64 {
    1
}

fn default_reward_rate() -> u32 {
    1 // 0.01% per signed block
}

fn default_penalty_rate() -> u32 {
    100 // 1% per evidence
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            min_validator_power: default_min_validator_power(),
            min_data_age_secs: default_min_data_age(),
            reward_rate_bps: default_reward_rate(),
            penalty_rate_bps: default_penalty_rate(),
        }
    }
}

impl ChainParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_validator_power < 0 {
            return Err(ConfigError::Invalid(
                "min_validator_power must not be negative".into(),
            ));
        }
        if self.reward_rate_bps as i128 > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid("reward_rate_bps above 10000".into()));
        }
        if self.penalty_rate_bps as i128 > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid("penalty_rate_bps above 10000".into()));
        }
        Ok(())
    }
}

/// Process-local settings; not part of replicated state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_feed_addr")]
    pub feed_listen_addr: String,
    #[serde(default = "default_http_addr")]
    pub http_listen_addr: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Observations older than this, relative to the newest one per feed, are pruned.
    #[serde(default = "default_retention")]
    pub observation_retention_secs: u64,
}

fn default_feed_addr() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_http_addr() -> String {
    "127.0.0.1:26680".to_string()
}

fn default_retention() -> u64 {
    3_600
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            feed_listen_addr: default_feed_addr(),
            http_listen_addr: default_http_addr(),
            data_dir: None,
            observation_retention_secs: default_retention(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            params: ChainParams::default(),
            node: NodeSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_json::from_str(json)?;
        cfg.params.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// Genesis validator as supplied over the driver surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub pub_key_hex: String,
    #[serde(default)]
    pub power: i64,
}

impl GenesisValidator {
    pub fn pubkey(&self) -> Result<PublicKey, String> {
        parse_pubkey(&self.pub_key_hex)
    }
}

pub fn parse_pubkey(hex_str: &str) -> Result<PublicKey, String> {
    <[u8; 32]>::from_hex(hex_str.trim())
        .map_err(|_| "invalid pubkey hex (expected 32 bytes)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_chain_constants() {
        let p = ChainParams::default();
        assert_eq!(p.min_validator_power, 10_000_000_000_000);
        assert_eq!(p.min_data_age_secs, 1);
        assert_eq!(p.reward_rate_bps, 1);
        assert_eq!(p.penalty_rate_bps, 100);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg = AppConfig::from_json(r#"{"chain_id":"test"}"#).expect("config");
        assert_eq!(cfg.chain_id, "test");
        assert_eq!(cfg.params, ChainParams::default());
        assert_eq!(cfg.node.feed_listen_addr, "0.0.0.0:8088");
        assert!(cfg.node.data_dir.is_none());
    }

    #[test]
    fn partial_params_override() {
        let cfg = AppConfig::from_json(r#"{"params":{"min_validator_power":5}}"#).expect("config");
        assert_eq!(cfg.params.min_validator_power, 5);
        assert_eq!(cfg.params.penalty_rate_bps, 100);
    }

    #[test]
    fn rejects_invalid_params() {
        assert!(matches!(
            AppConfig::from_json(r#"{"params":{"reward_rate_bps":10001}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{"params":{"min_validator_power":-1}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(AppConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"node":{"data_dir":"/tmp/x"}}"#).expect("write");
        let cfg = AppConfig::load(&path).expect("load");
        assert_eq!(cfg.node.data_dir.as_deref(), Some("/tmp/x"));
        assert!(matches!(
            AppConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn parses_genesis_pubkey() {
        let v = GenesisValidator {
            pub_key_hex: hex::encode([4u8; 32]),
            power: 10,
        };
        assert_eq!(v.pubkey().expect("key"), [4u8; 32]);
        assert!(parse_pubkey("abcd").is_err());
    }
}
