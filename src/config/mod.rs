use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Attempts made when SQLite reports the database busy or locked.
    #[serde(default = "default_transaction_retries")]
    pub transaction_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_duration_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Platform fee in basis points (300 = 3%).
    #[serde(default = "default_platform_fee_bps")]
    pub platform_fee_bps: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// How long a booking may sit in `payment_in_progress` before the
    /// sweeper releases it.
    pub payment_hold_minutes: i64,
    pub sweep_interval_secs: u64,
}

fn default_transaction_retries() -> u32 {
    5
}

fn default_platform_fee_bps() -> u32 {
    300
}

fn default_currency() -> String {
    "usd".to_string()
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            enabled: false,
            platform_fee_bps: default_platform_fee_bps(),
            currency: default_currency(),
        }
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            payment_hold_minutes: 15,
            sweep_interval_secs: 60,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.max_connections", 10)?
            .set_default("database.transaction_retries", 5)?
            .set_default("auth.token_duration_hours", 24)?
            .set_default("stripe.enabled", false)?
            .set_default("stripe.platform_fee_bps", 300)?
            .set_default("stripe.currency", "usd")?
            .set_default("payments.payment_hold_minutes", 15)?
            .set_default("payments.sweep_interval_secs", 60)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with COURTSIDE__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("COURTSIDE").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://courtside.db?mode=rwc".to_string(),
                max_connections: 10,
                transaction_retries: default_transaction_retries(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_duration_hours: 24,
            },
            stripe: StripeConfig::default(),
            payments: PaymentsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.stripe.platform_fee_bps, 300);
        assert_eq!(settings.payments.payment_hold_minutes, 15);
        assert!(!settings.stripe.enabled);
        assert_eq!(settings.database.transaction_retries, 5);
    }
}
