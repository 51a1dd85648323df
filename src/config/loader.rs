//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;
use tracing::{debug, info};

use super::types::{AppConfig, TelegramConfig};
use crate::common::errors::{Result, TraderError};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP__)
/// 2. Plain secret variables (BINANCE_API_KEY, TELEGRAM_TOKEN, ...) for unset keys
/// 3. Configuration file (TOML format)
/// 4. Default values
///
/// The result is validated before it is returned.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            info!("Loading configuration from {}", path);
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            debug!("Configuration file {} not found, using environment only", path);
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("trading.symbols")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| TraderError::ConfigInvalid(e.to_string()))?;

    let mut app: AppConfig = config
        .try_deserialize()
        .map_err(|e| TraderError::ConfigInvalid(e.to_string()))?;

    apply_secret_env(&mut app, |key| std::env::var(key).ok());
    app.validate()?;
    Ok(app)
}

/// Parse and validate configuration from a TOML string
pub fn load_from_str(toml: &str) -> Result<AppConfig> {
    let app: AppConfig = Config::builder()
        .add_source(File::from_str(toml, config::FileFormat::Toml))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| TraderError::ConfigInvalid(e.to_string()))?;
    app.validate()?;
    Ok(app)
}

/// Fill credentials from conventional variable names when the config leaves them unset
fn apply_secret_env(app: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if app.exchange.api_key.is_none() {
        app.exchange.api_key = lookup("BINANCE_API_KEY");
    }
    if app.exchange.api_secret.is_none() {
        app.exchange.api_secret = lookup("BINANCE_API_SECRET");
    }

    match app.telegram.as_mut() {
        Some(telegram) => {
            if telegram.token.is_empty() {
                telegram.token = lookup("TELEGRAM_TOKEN").unwrap_or_default();
            }
            if telegram.chat_id.is_empty() {
                telegram.chat_id = lookup("TELEGRAM_CHAT_ID").unwrap_or_default();
            }
        }
        None => {
            if let (Some(token), Some(chat_id)) =
                (lookup("TELEGRAM_TOKEN"), lookup("TELEGRAM_CHAT_ID"))
            {
                app.telegram = Some(TelegramConfig {
                    enabled: true,
                    token,
                    chat_id,
                    api_url: "https://api.telegram.org".to_string(),
                    poll_timeout_secs: 30,
                });
            }
        }
    }
}
