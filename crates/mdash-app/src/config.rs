//! Application configuration.

use crate::error::{AppError, AppResult};
use mdash_api::ApiClientConfig;
use mdash_core::{AccountId, ChainId, MaintenanceMarginRate, StatusFilter};
use mdash_position::DEFAULT_MARKET;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding `api.api_key`.
pub const API_KEY_ENV: &str = "MDASH_API_KEY";

/// Lending API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `x-api-key`. Usually supplied through `MDASH_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout (ms). Default: 10,000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://ng-api.lavarave.wtf/api/sdk/v1.0".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Network the positions live on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Informational; the core never talks to the node directly.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Symbol of the chain's gas token, used as the default quote symbol.
    #[serde(default = "default_gas_symbol")]
    pub gas_symbol: String,
}

fn default_network_name() -> String {
    "Berachain".to_string()
}

fn default_chain_id() -> u64 {
    ChainId::BERACHAIN.value()
}

fn default_gas_symbol() -> String {
    "BNB".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            chain_id: default_chain_id(),
            rpc_url: None,
            gas_symbol: default_gas_symbol(),
        }
    }
}

/// Polling cadence for the two sync loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Position refresh interval (ms). Default: 10,000.
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,
    /// Market offer refresh interval (ms). Default: 5,000.
    #[serde(default = "default_offer_interval_ms")]
    pub offer_interval_ms: u64,
    /// Portfolio summary log interval (s). Default: 60.
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

fn default_position_interval_ms() -> u64 {
    10_000
}

fn default_offer_interval_ms() -> u64 {
    5_000
}

fn default_summary_interval_secs() -> u64 {
    60
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: default_position_interval_ms(),
            offer_interval_ms: default_offer_interval_ms(),
            summary_interval_secs: default_summary_interval_secs(),
        }
    }
}

/// Derivation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: Decimal,
}

fn default_maintenance_margin_rate() -> Decimal {
    MaintenanceMarginRate::DEFAULT.inner()
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: default_maintenance_margin_rate(),
        }
    }
}

/// Account tracked at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Connected on startup when set.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub status: StatusFilter,
}

/// Market selection defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsConfig {
    #[serde(default = "default_market")]
    pub default_market: String,
    /// Symbols marked favorite on startup.
    #[serde(default)]
    pub favorites: Vec<String>,
}

fn default_market() -> String {
    DEFAULT_MARKET.to_string()
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            default_market: default_market(),
            favorites: Vec::new(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
}

impl AppConfig {
    /// Load from a specific file, apply env overrides and validate.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment.
    pub fn parse(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.api.api_key = key;
            }
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "api.base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.api.timeout_ms == 0 {
            return Err(AppError::Config("api.timeout_ms must be positive".into()));
        }
        if self.sync.position_interval_ms == 0 || self.sync.offer_interval_ms == 0 {
            return Err(AppError::Config("sync intervals must be positive".into()));
        }
        if self.network.gas_symbol.trim().is_empty() {
            return Err(AppError::Config("network.gas_symbol must not be empty".into()));
        }
        self.maintenance_margin_rate()?;
        self.account_id()?;
        Ok(())
    }

    pub fn maintenance_margin_rate(&self) -> AppResult<MaintenanceMarginRate> {
        MaintenanceMarginRate::new(self.risk.maintenance_margin_rate).ok_or_else(|| {
            AppError::Config(format!(
                "risk.maintenance_margin_rate must be in [0, 1), got {}",
                self.risk.maintenance_margin_rate
            ))
        })
    }

    /// The startup account, if configured.
    pub fn account_id(&self) -> AppResult<Option<AccountId>> {
        self.account
            .address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(AccountId::parse)
            .transpose()
            .map_err(AppError::from)
    }

    pub fn chain(&self) -> ChainId {
        ChainId::new(self.network.chain_id)
    }

    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            timeout: Duration::from_millis(self.api.timeout_ms),
            ..ApiClientConfig::new(&self.api.base_url, &self.api.api_key)
        }
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.sync.position_interval_ms)
    }

    pub fn offer_interval(&self) -> Duration {
        Duration::from_millis(self.sync.offer_interval_ms)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.sync.summary_interval_secs.max(1))
    }
}
