//! Payment provider configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Payment provider configuration.
///
/// Secrets are wrapped so they never appear in debug output or logs.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Provider API key
    pub api_key: SecretString,

    /// Webhook signing secret, verified at the transport boundary
    pub webhook_secret: SecretString,
}

impl PaymentConfig {
    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT_API_KEY"));
        }
        if self.webhook_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT_WEBHOOK_SECRET"));
        }
        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::new(String::new()),
            webhook_secret: SecretString::new(String::new()),
        }
    }
}
