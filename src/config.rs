//! Environment configuration, loaded after `dotenvy` has read `.env`.

use std::env;
use thiserror::Error;

pub const DEFAULT_SHORTCODE: &str = "174379";
pub const SANDBOX_API_URL: &str = "https://sandbox.safaricom.co.ke";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub api_url: String,
    pub callback_url: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub nats_url: Option<String>,
    pub reservation_timeout_minutes: i64,
    /// Shared secret for `/internal` routes; unset disables them.
    pub internal_token: Option<String>,
    pub mpesa: MpesaConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_url = required("APP_URL")?;
        let mpesa = MpesaConfig {
            consumer_key: required("MPESA_CONSUMER_KEY")?.trim().to_string(),
            consumer_secret: required("MPESA_CONSUMER_SECRET")?.trim().to_string(),
            passkey: required("MPESA_PASSKEY")?,
            shortcode: optional("MPESA_SHORTCODE").unwrap_or_else(|| DEFAULT_SHORTCODE.to_string()),
            api_url: optional("MPESA_API_URL").unwrap_or_else(|| SANDBOX_API_URL.to_string()),
            callback_url: callback_url(&app_url),
        };
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parsed("PORT", 8083)?,
            nats_url: optional("NATS_URL"),
            reservation_timeout_minutes: parsed("RESERVATION_TIMEOUT_MINUTES", 45)?,
            internal_token: optional("INTERNAL_API_TOKEN"),
            mpesa,
        })
    }
}

pub fn callback_url(app_url: &str) -> String {
    format!("{}/mpesa/callback/", app_url.trim_end_matches('/'))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
