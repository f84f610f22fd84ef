//! Environment-derived service configuration
//!
//! Built once at process start and read-only thereafter. A provider whose
//! required credentials are absent is marked disabled rather than failing
//! startup; the manager then simply leaves it out of the registry.

use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::payments::types::{Currency, PaymentMethod, ProviderName};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub payments: Vec<PaymentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Fee model applied by a provider on each transaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeModel {
    /// Percentage of the transaction amount
    Percentage(Decimal),
    /// Flat fee regardless of amount
    Fixed(Decimal),
}

/// Static capabilities and limits for one provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub supported_methods: Vec<PaymentMethod>,
    pub supported_currencies: Vec<Currency>,
    pub minimum_amount: Decimal,
    pub maximum_amount: Decimal,
    pub fee: FeeModel,
}

/// Per-provider enablement, mode, credentials and settings
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub provider: ProviderName,
    pub enabled: bool,
    pub test_mode: bool,
    /// Opaque credential map; keys are provider-specific
    pub credentials: HashMap<String, String>,
    pub settings: ProviderSettings,
    /// Vendor API timeout in seconds
    pub timeout_secs: u64,
    /// Maximum transport-level retries for vendor calls
    pub max_retries: u32,
}

impl PaymentConfig {
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let payments = vec![payfast_config_from_env(), yoco_config_from_env()];

        let config = Config {
            server,
            database,
            payments,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        for payment in &self.payments {
            if payment.settings.minimum_amount > payment.settings.maximum_amount {
                return Err(anyhow!(
                    "{}: minimum amount exceeds maximum amount",
                    payment.provider
                ));
            }
        }

        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| bool::from_str(&v.to_ascii_lowercase()).ok())
        .unwrap_or(default)
}

fn env_parsed<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Build the PayFast entry. Requires PAYFAST_MERCHANT_ID and
/// PAYFAST_MERCHANT_KEY; PAYFAST_PASSPHRASE is optional.
pub fn payfast_config_from_env() -> PaymentConfig {
    let mut credentials = HashMap::new();
    let mut complete = true;

    for (env_name, key) in [
        ("PAYFAST_MERCHANT_ID", "merchant_id"),
        ("PAYFAST_MERCHANT_KEY", "merchant_key"),
    ] {
        match env::var(env_name) {
            Ok(value) if !value.trim().is_empty() => {
                credentials.insert(key.to_string(), value);
            }
            _ => {
                warn!("{} not set, PayFast disabled", env_name);
                complete = false;
            }
        }
    }
    if let Ok(passphrase) = env::var("PAYFAST_PASSPHRASE") {
        if !passphrase.trim().is_empty() {
            credentials.insert("passphrase".to_string(), passphrase);
        }
    }

    PaymentConfig {
        provider: ProviderName::PayFast,
        enabled: complete && env_flag("PAYFAST_ENABLED", true),
        test_mode: env_flag("PAYFAST_TEST_MODE", true),
        credentials,
        settings: ProviderSettings {
            supported_methods: vec![
                PaymentMethod::Card,
                PaymentMethod::Eft,
                PaymentMethod::InstantEft,
            ],
            supported_currencies: vec![Currency::Zar],
            minimum_amount: env_parsed("PAYFAST_MINIMUM_AMOUNT", Decimal::new(500, 2)),
            maximum_amount: env_parsed("PAYFAST_MAXIMUM_AMOUNT", Decimal::new(100_000_000, 2)),
            fee: FeeModel::Percentage(Decimal::new(35, 1)),
        },
        timeout_secs: env_parsed("PAYFAST_TIMEOUT_SECS", 30),
        max_retries: env_parsed("PAYFAST_MAX_RETRIES", 3),
    }
}

/// Build the Yoco entry. Requires YOCO_SECRET_KEY; YOCO_WEBHOOK_SECRET is
/// needed for webhook verification and create-time webhook registration.
pub fn yoco_config_from_env() -> PaymentConfig {
    let mut credentials = HashMap::new();
    let mut complete = true;

    match env::var("YOCO_SECRET_KEY") {
        Ok(value) if !value.trim().is_empty() => {
            credentials.insert("secret_key".to_string(), value);
        }
        _ => {
            warn!("YOCO_SECRET_KEY not set, Yoco disabled");
            complete = false;
        }
    }
    if let Ok(webhook_secret) = env::var("YOCO_WEBHOOK_SECRET") {
        if !webhook_secret.trim().is_empty() {
            credentials.insert("webhook_secret".to_string(), webhook_secret);
        }
    }

    PaymentConfig {
        provider: ProviderName::Yoco,
        enabled: complete && env_flag("YOCO_ENABLED", true),
        test_mode: env_flag("YOCO_TEST_MODE", true),
        credentials,
        settings: ProviderSettings {
            supported_methods: vec![PaymentMethod::Card, PaymentMethod::QrCode],
            supported_currencies: vec![Currency::Zar],
            minimum_amount: env_parsed("YOCO_MINIMUM_AMOUNT", Decimal::new(200, 2)),
            maximum_amount: env_parsed("YOCO_MAXIMUM_AMOUNT", Decimal::new(50_000_000, 2)),
            fee: FeeModel::Percentage(Decimal::new(295, 2)),
        },
        timeout_secs: env_parsed("YOCO_TIMEOUT_SECS", 30),
        max_retries: env_parsed("YOCO_MAX_RETRIES", 3),
    }
}
