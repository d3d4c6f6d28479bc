//! Configuration for the CoinJoin mixing engine.
//!
//! Follows the host application's layered `Config` pattern: a top-level
//! struct composed of section structs, each independently documented and
//! each with `serde(default = ...)` so a partial TOML file still loads.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coinjoin: CoinJoinConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mixing options, enumerated 1:1 with the engine's configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinJoinConfig {
    /// Gate: when false all public entry points are no-ops.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Target amount of anonymized balance, in base units.
    #[serde(default = "default_amount")]
    pub amount: u64,

    /// Required mixing rounds per coin before it is considered anonymized.
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Extra rounds randomly probed during submit-denominate.
    #[serde(default = "default_random_rounds")]
    pub random_rounds: u32,

    /// Max concurrent sessions / coordinator connections.
    #[serde(default = "default_sessions")]
    pub sessions: usize,

    /// Allow more than one session concurrently; also allows unconfirmed
    /// denominated outputs to coexist with an in-flight session.
    #[serde(default = "default_false")]
    pub multi_session: bool,

    /// Per-denomination soft target in create-denoms planning.
    #[serde(default = "default_denoms_goal")]
    pub denoms_goal: usize,

    /// Per-denomination hard ceiling in create-denoms planning.
    #[serde(default = "default_denoms_hard_cap")]
    pub denoms_hard_cap: usize,
}

fn default_enabled() -> bool {
    false
}
fn default_amount() -> u64 {
    crate::constants::coinjoin::DENOM_1 * 1000
}
fn default_rounds() -> u32 {
    4
}
fn default_random_rounds() -> u32 {
    1
}
fn default_sessions() -> usize {
    4
}
fn default_denoms_goal() -> usize {
    10
}
fn default_denoms_hard_cap() -> usize {
    30
}
fn default_false() -> bool {
    false
}

impl Default for CoinJoinConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            amount: default_amount(),
            rounds: default_rounds(),
            random_rounds: default_random_rounds(),
            sessions: default_sessions(),
            multi_session: default_false(),
            denoms_goal: default_denoms_goal(),
            denoms_hard_cap: default_denoms_hard_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coinjoin: CoinJoinConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("failed to serialize config: {e}")))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let config = Config::default();
            config.save_to_file(path)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coinjoin.toml");
        config.save_to_file(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.coinjoin.rounds, config.coinjoin.rounds);
        assert_eq!(loaded.coinjoin.denoms_goal, config.coinjoin.denoms_goal);
    }

    #[test]
    fn partial_toml_still_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[coinjoin]\nenabled = true\n").unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        assert!(loaded.coinjoin.enabled);
        assert_eq!(loaded.coinjoin.rounds, default_rounds());
    }
}
