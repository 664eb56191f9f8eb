use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use hashhedge_sdk::{FeePolicy, KeyRing, Network, StaticFeed};

use crate::error::AppError;

pub const CONFIG_FILE: &str = "hashhedge.json";
pub const HOUSE_SECRET_VAR: &str = "HOUSE_KEY_SECRET";
pub const ORACLE_SECRET_VAR: &str = "ORACLE_KEY_SECRET";

// ============================================================================
// Operator config
// ============================================================================

/// Operator settings, persisted as JSON next to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OracleConfig {
    pub network: Network,
    /// Falls back to the network's default server when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub electrum_url: Option<String>,
    pub database_path: PathBuf,
    /// sat/vB
    pub fee_rate: u64,
    pub dust_limit: u64,
    pub threshold: f64,
    /// Reported by the placeholder difficulty feed.
    pub difficulty: f64,
    pub hashprice_sats: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let fees = FeePolicy::default();
        let feed = StaticFeed::default();
        Self {
            network: Network::Testnet,
            electrum_url: None,
            database_path: PathBuf::from("hashhedge.db"),
            fee_rate: fees.fee_rate,
            dust_limit: fees.dust_limit,
            threshold: 0.05,
            difficulty: feed.difficulty,
            hashprice_sats: feed.hashprice_sats,
        }
    }
}

impl OracleConfig {
    /// Read the config at `path`, or the defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.fee_rate == 0 {
            return Err(AppError::Config("feeRate must be at least 1 sat/vB".into()));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(AppError::Config(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        if !self.difficulty.is_finite() || !self.hashprice_sats.is_finite() {
            return Err(AppError::Config(format!(
                "difficulty and hashpriceSats must be finite, got {} and {}",
                self.difficulty, self.hashprice_sats
            )));
        }
        Ok(())
    }

    pub fn electrum_url(&self) -> &str {
        self.electrum_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_electrum_url())
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::new(self.fee_rate, self.dust_limit)
    }

    pub fn feed(&self) -> StaticFeed {
        StaticFeed::new(self.difficulty, self.hashprice_sats)
    }
}

// ============================================================================
// Key secrets
// ============================================================================

/// House and oracle secrets as read from the environment. Wiped on drop.
pub struct Secrets {
    house: Zeroizing<String>,
    oracle: Zeroizing<String>,
}

impl Secrets {
    pub fn new(house: String, oracle: String) -> Self {
        Self {
            house: Zeroizing::new(house),
            oracle: Zeroizing::new(oracle),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let read = |var: &'static str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(AppError::MissingSecret(var))
        };
        Ok(Self::new(read(HOUSE_SECRET_VAR)?, read(ORACLE_SECRET_VAR)?))
    }

    pub fn key_ring(&self) -> Result<KeyRing, AppError> {
        Ok(KeyRing::from_secret_hex(&self.house, &self.oracle)?)
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secrets(..)")
    }
}
