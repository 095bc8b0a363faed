//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Configuration is loaded with the
//! `CLIPDECK_` prefix; nested values use double underscores as
//! separators (e.g. `CLIPDECK_DATABASE__URL`).
//!
//! # Example
//!
//! ```no_run
//! use clipdeck_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod payment;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Payment provider configuration (API key, webhook secret)
    #[serde(default)]
    pub payment: PaymentConfig,
}

impl AppConfig {
    /// Loads configuration from the environment (and a `.env` file when
    /// present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("CLIPDECK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validates every configuration section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.payment.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn valid_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/clipdeck".to_string(),
                ..DatabaseConfig::default()
            },
            payment: PaymentConfig {
                api_key: SecretString::new("pk_live_abc".to_string()),
                webhook_secret: SecretString::new("whsec_xyz".to_string()),
            },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_database_url_fails_validation() {
        let mut config = valid_config();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }
}
