//! Configuration for settlement engine

use crate::payout::PayoutPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger data directory
    pub ledger_data_dir: PathBuf,

    /// Token pricing and limits
    pub economics: EconomicsConfig,

    /// Creator payout rate policy
    pub payout: PayoutPolicy,

    /// Payment notification verification
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "token-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger_data_dir: PathBuf::from("./data/token-ledger"),
            economics: EconomicsConfig::default(),
            payout: PayoutPolicy::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Token economics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicsConfig {
    /// Tokens bought per US dollar
    pub tokens_per_dollar: u32,

    /// Smallest cashout accepted
    pub min_cashout_tokens: i64,

    /// Transaction listing page size when none is given
    pub default_page_size: usize,

    /// Currency sent to the payment processor
    pub currency: String,
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            tokens_per_dollar: 10,
            min_cashout_tokens: 10,
            default_page_size: 50,
            currency: "usd".to_string(),
        }
    }
}

/// Webhook verification configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared HMAC secret
    pub signing_secret: String,

    /// Maximum notification age in seconds
    pub tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            tolerance_secs: 300,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("signing_secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::SettlementError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("TOKEN_LEDGER_DATA_DIR") {
            config.ledger_data_dir = PathBuf::from(dir);
        }

        if let Ok(secret) = std::env::var("TOKEN_WEBHOOK_SECRET") {
            config.webhook.signing_secret = secret;
        }

        if let Ok(tolerance) = std::env::var("TOKEN_WEBHOOK_TOLERANCE_SECS") {
            config.webhook.tolerance_secs = tolerance.parse().map_err(|e| {
                crate::SettlementError::Config(format!("Invalid webhook tolerance: {}", e))
            })?;
        }

        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let fail = |msg: &str| Err(crate::SettlementError::Config(msg.to_string()));

        if self.economics.tokens_per_dollar == 0 {
            return fail("tokens_per_dollar must be positive");
        }
        if self.economics.min_cashout_tokens <= 0 {
            return fail("min_cashout_tokens must be positive");
        }
        if self.economics.default_page_size == 0 {
            return fail("default_page_size must be positive");
        }
        if self.webhook.signing_secret.is_empty() {
            return fail("webhook signing_secret is required");
        }
        self.payout.validate()
    }

    /// Ledger configuration for this engine's data directory
    pub fn ledger_config(&self) -> token_ledger::Config {
        token_ledger::Config {
            data_dir: self.ledger_data_dir.clone(),
            ..Default::default()
        }
    }
}
