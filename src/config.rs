//! Process configuration, read from the environment once at start-up.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
    /// Storefront page the sync return redirects the shopper to.
    pub checkout_result_url: String,
    /// Deadline for answering a gateway callback.
    pub callback_timeout: Duration,
    pub sweep_interval: Duration,
    pub pending_payment_timeout: chrono::Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let or_default = |key: &'static str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = or_default("HOST", "0.0.0.0");
        let port: u16 = parse(&get, "PORT", 8080)?;
        let local_base = format!("http://localhost:{port}");

        let expire_minutes: i64 = parse(&get, "GATEWAY_EXPIRE_MINUTES", 15)?;
        let callback_ms: u64 = parse(&get, "CALLBACK_TIMEOUT_MS", 5000)?;
        let sweep_secs: u64 = parse(&get, "SWEEP_INTERVAL_SECS", 60)?;
        let pending_minutes: i64 = parse(&get, "PENDING_PAYMENT_TIMEOUT_MINUTES", 30)?;
        for (key, value) in [
            ("GATEWAY_EXPIRE_MINUTES", expire_minutes),
            ("PENDING_PAYMENT_TIMEOUT_MINUTES", pending_minutes),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            gateway: GatewayConfig {
                pay_url: required("GATEWAY_PAY_URL")?,
                merchant_code: required("GATEWAY_MERCHANT_CODE")?,
                secret: required("GATEWAY_SECRET")?,
                return_url: or_default("GATEWAY_RETURN_URL", &format!("{local_base}/payments/return")),
                notify_url: or_default("GATEWAY_NOTIFY_URL", &format!("{local_base}/payments/notify")),
                expire_minutes,
            },
            checkout_result_url: or_default("CHECKOUT_RESULT_URL", "/checkout/result"),
            callback_timeout: Duration::from_millis(callback_ms),
            sweep_interval: Duration::from_secs(sweep_secs),
            pending_payment_timeout: chrono::Duration::minutes(pending_minutes),
            host,
            port,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&'static str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
