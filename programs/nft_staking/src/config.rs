//! Service configuration loader.
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8080"
//!
//! [ledger]
//! journal_path = "data/journal.bin"
//!
//! [[pools]]
//! id = "genesis"
//! reward_rate = 10
//! capacity = 500
//! accrual = { policy = "stepped", step_seconds = 3600 }
//! eligibility = { kind = "nft_allowlist", mints = ["..."] }
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anchor_lang::prelude::Pubkey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;
use crate::registry::PoolRegistry;
use crate::state::{AccrualPolicy, EarlyExit, Eligibility, Pool, PoolId, PoolParams};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid server setting: {0}")]
    InvalidServer(String),

    #[error("Invalid pool '{pool}': {reason}")]
    InvalidPool { pool: String, reason: String },

    #[error("Duplicate pool id '{0}'")]
    DuplicatePool(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::InvalidServer(format!("bind_addr '{}': {}", self.bind_addr, e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Journal file; positions live in memory only when unset.
    pub journal_path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub reward_rate: u64,
    #[serde(default)]
    pub min_lock_seconds: i64,
    pub capacity: Option<u64>,
    pub early_exit_penalty_bps: Option<u16>,
    pub emission_cap: Option<u64>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub accrual: AccrualConfig,
    #[serde(default)]
    pub eligibility: EligibilityConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AccrualConfig {
    #[default]
    Linear,
    Stepped { step_seconds: i64 },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityConfig {
    #[default]
    AnyNft,
    NftAllowlist { mints: Vec<String> },
    Token { mint: String, min_amount: u64 },
}

impl PoolConfig {
    pub fn to_params(&self) -> ConfigResult<PoolParams> {
        let invalid = |reason: String| ConfigError::InvalidPool {
            pool: self.id.clone(),
            reason,
        };

        let id = PoolId::new(self.id.as_str()).map_err(|e| invalid(e.to_string()))?;
        let parse_mint = |value: &str| {
            Pubkey::from_str(value).map_err(|e| invalid(format!("mint '{}': {}", value, e)))
        };

        let eligibility = match &self.eligibility {
            EligibilityConfig::AnyNft => Eligibility::AnyNft,
            EligibilityConfig::NftAllowlist { mints } => Eligibility::NftAllowlist(
                mints
                    .iter()
                    .map(|mint| parse_mint(mint.as_str()))
                    .collect::<ConfigResult<_>>()?,
            ),
            EligibilityConfig::Token { mint, min_amount } => Eligibility::Token {
                mint: parse_mint(mint.as_str())?,
                min_amount: *min_amount,
            },
        };

        let accrual = match self.accrual {
            AccrualConfig::Linear => AccrualPolicy::Linear,
            AccrualConfig::Stepped { step_seconds } => AccrualPolicy::Stepped { step_seconds },
        };

        Ok(PoolParams {
            name: if self.name.is_empty() { id.to_string() } else { self.name.clone() },
            id,
            eligibility,
            reward_rate: self.reward_rate,
            accrual,
            min_lock_seconds: self.min_lock_seconds,
            capacity: self.capacity,
            early_exit: self
                .early_exit_penalty_bps
                .map(|penalty_bps| EarlyExit { penalty_bps }),
            emission_cap: self.emission_cap,
        })
    }
}

impl ServiceConfig {
    /// Loads a TOML config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects bad server settings, duplicate pool ids and pool terms the
    /// registry would refuse.
    pub fn validate(&self) -> ConfigResult<()> {
        self.server.socket_addr()?;
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidServer(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::InvalidServer(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.id.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.id.clone()));
            }
            Pool::new(pool.to_params()?, 0).map_err(|e| ConfigError::InvalidPool {
                pool: pool.id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Registers every configured pool, pausing those marked paused.
    pub fn register_pools(&self, registry: &PoolRegistry, now: i64) -> ConfigResult<()> {
        for pool in &self.pools {
            let registered = registry
                .register(pool.to_params()?, now)
                .map_err(|e| ConfigError::InvalidPool {
                    pool: pool.id.clone(),
                    reason: e.to_string(),
                })?;
            if pool.paused {
                registry
                    .set_paused(&registered.id, true, now)
                    .map_err(|e| ConfigError::InvalidPool {
                        pool: pool.id.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}
