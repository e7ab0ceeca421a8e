use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} must not be blank")]
    Blank(&'static str),
}

/// Credentials and endpoints for the PayPal REST API.
///
/// Loaded once at startup. A process with incomplete PayPal configuration
/// refuses to boot rather than deferring the failure to the first billing
/// request.
#[derive(Clone, Debug)]
pub struct PayPalSettings {
    pub client_id: String,
    pub client_secret: String,
    /// `https://api-m.sandbox.paypal.com` or `https://api-m.paypal.com`.
    pub api_base: String,
    /// Webhook id assigned by PayPal for this listener. Signature
    /// verification fails closed without it.
    pub webhook_id: String,
    pub brand_name: String,
}

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub paypal: PayPalSettings,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

fn required(name: &'static str) -> Result<String, ConfigurationError> {
    let value = env::var(name).map_err(|_| ConfigurationError::Missing(name))?;
    if value.trim().is_empty() {
        return Err(ConfigurationError::Blank(name));
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenv::dotenv().ok();

        let paypal = PayPalSettings {
            client_id: required("PAYPAL_CLIENT_ID")?,
            client_secret: required("PAYPAL_CLIENT_SECRET")?,
            api_base: env::var("PAYPAL_API_BASE")
                .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            webhook_id: required("PAYPAL_WEBHOOK_ID")?,
            brand_name: env::var("APP_BRAND_NAME").unwrap_or_else(|_| "Taxfolio".to_string()),
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            paypal,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "taxfolio".to_string()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "taxfolio-app".to_string()),
        })
    }
}
