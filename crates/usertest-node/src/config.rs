use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use usertest_ledger::{Cents, HoldPolicy, TrustThresholds};
use usertest_market::MarketParams;
use usertest_payments::StripeConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub auth: AuthSettings,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub stripe: StripeConfig,
    pub settlement: SettlementConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser-facing origin used for checkout and onboarding return URLs.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret shared with the identity provider. A random one is
    /// generated at startup when empty.
    pub jwt_secret: String,
    pub token_expiry_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expiry_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub platform_fee_percent: u8,
    pub hold_days: HoldPolicy,
    pub trust: TrustThresholds,
    pub min_payout_cents: i64,
    pub min_checkout_cents: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let market = MarketParams::default();
        Self {
            platform_fee_percent: market.platform_fee_percent,
            hold_days: HoldPolicy::default(),
            trust: market.trust,
            min_payout_cents: market.min_payout.as_i64(),
            min_checkout_cents: market.min_checkout.as_i64(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Seconds between background settlement sweeps. 0 disables the sweep;
    /// balances are still settled on every read.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub allow_cancel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
    pub file_output: Option<PathBuf>,
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            module_filters: HashMap::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        // Env overrides are applied by the caller so main controls precedence.
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("API_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("API_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = env::var("PUBLIC_URL") {
            if !url.is_empty() {
                self.server.public_url = url;
            }
        }

        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.storage.database_url = Some(url);
                self.storage.backend = StorageBackend::Postgres;
            }
        }

        if let Ok(key) = env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = key;
        }
        if let Ok(secret) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = secret;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(fee) = env::var("PLATFORM_FEE_PERCENT") {
            if let Ok(fee) = fee.parse() {
                self.ledger.platform_fee_percent = fee;
            }
        }
        if let Ok(secs) = env::var("SETTLEMENT_SWEEP_SECS") {
            if let Ok(secs) = secs.parse() {
                self.settlement.sweep_interval_secs = secs;
            }
        }
        if let Ok(allow) = env::var("DEBUG_ALLOW_CANCEL") {
            self.debug.allow_cancel = matches!(allow.as_str(), "1" | "true" | "yes");
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.platform_fee_percent > 100 {
            bail!(
                "ledger.platform_fee_percent must be at most 100, got {}",
                self.ledger.platform_fee_percent
            );
        }
        if self.storage.backend == StorageBackend::Postgres
            && self.storage.database_url.as_deref().map_or(true, str::is_empty)
        {
            bail!("storage.database_url is required for the postgres backend");
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            bail!("logging.format must be pretty, compact or json");
        }
        Ok(())
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        self.ledger.hold_days
    }

    pub fn market_params(&self) -> MarketParams {
        MarketParams {
            platform_fee_percent: self.ledger.platform_fee_percent,
            min_payout: Cents::new(self.ledger.min_payout_cents),
            min_checkout: Cents::new(self.ledger.min_checkout_cents),
            trust: self.ledger.trust,
            currency: self.stripe.currency.clone(),
            connect_country: self.stripe.connect_country.clone(),
            allow_debug_cancel: self.debug.allow_cancel,
            ..MarketParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        env::set_var("API_HOST", "0.0.0.0");
        env::set_var("API_PORT", "9090");
        env::set_var("DATABASE_URL", "postgres://ledger@localhost/usertest");
        env::set_var("PLATFORM_FEE_PERCENT", "15");
        env::set_var("SETTLEMENT_SWEEP_SECS", "60");
        env::set_var("DEBUG_ALLOW_CANCEL", "true");
        env::set_var("LOG_FORMAT", "json");

        let mut config = NodeConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(
            config.storage.database_url.as_deref(),
            Some("postgres://ledger@localhost/usertest")
        );
        assert_eq!(config.ledger.platform_fee_percent, 15);
        assert_eq!(config.settlement.sweep_interval_secs, 60);
        assert!(config.debug.allow_cancel);
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());

        env::remove_var("API_HOST");
        env::remove_var("API_PORT");
        env::remove_var("DATABASE_URL");
        env::remove_var("PLATFORM_FEE_PERCENT");
        env::remove_var("SETTLEMENT_SWEEP_SECS");
        env::remove_var("DEBUG_ALLOW_CANCEL");
        env::remove_var("LOG_FORMAT");
    }

    #[test]
    fn test_market_params_follow_ledger_section() {
        let mut config = NodeConfig::default();
        config.ledger.platform_fee_percent = 10;
        config.ledger.min_payout_cents = 250;
        config.debug.allow_cancel = true;

        let params = config.market_params();
        assert_eq!(params.platform_fee_percent, 10);
        assert_eq!(params.min_payout, Cents::new(250));
        assert!(params.allow_debug_cancel);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_postgres_without_url() {
        let mut config = NodeConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.ledger.platform_fee_percent = 120;
        assert!(config.validate().is_err());
    }
}
