//! Application configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - sqlite connection string
//! - `SUPABASE_URL`, `SUPABASE_KEY`, `SUPABASE_JWT_SECRET` - identity provider
//! - `RAZORPAY_KEY_ID`, `RAZORPAY_KEY_SECRET` - payment gateway
//! - `SHIPROCKET_EMAIL`, `SHIPROCKET_PASSWORD` - shipping provider
//!
//! ## Optional
//! - `HOST` (default `0.0.0.0`), `PORT` (default `3000`)
//! - `ADMIN_EMAILS` - comma separated allow-list for the admin console
//! - `PAYMENT_CURRENCY` (default `INR`)
//! - `SHIPROCKET_PICKUP_LOCATION` (default `Primary`)
//! - `SMTP_HOST`, `SMTP_PORT` (587), `SMTP_USERNAME`, `SMTP_PASSWORD`,
//!   `ADMIN_NOTIFICATION_EMAIL` - admin order emails, disabled unless all are set
//! - `STALE_ORDER_MINUTES` (default 30)
//! - `OUTBOX_MAX_ATTEMPTS` (default 5), `OUTBOX_INTERVAL_SECS` (default 30)
//! - `UPLOAD_DIR` (default `./uploads`), `FILE_SIZE_LIMIT` (default 5 MiB)

use std::net::IpAddr;
use std::str::FromStr;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    /// Emails allowed into `/admin`. Compared case-insensitively.
    pub admin_emails: Vec<String>,
    pub identity: IdentityConfig,
    pub razorpay: RazorpayConfig,
    pub shiprocket: ShiprocketConfig,
    pub smtp: Option<SmtpConfig>,
    pub checkout: CheckoutConfig,
    pub outbox: OutboxConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub url: String,
    pub api_key: SecretString,
    pub jwt_secret: SecretString,
}

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: SecretString,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct ShiprocketConfig {
    pub email: String,
    pub password: SecretString,
    pub pickup_location: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub admin_email: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Unpaid orders older than this are removed on the owner's next checkout.
    pub stale_order_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub max_attempts: i32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: String,
    pub file_size_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            host: parsed_or("HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: parsed_or("PORT", 3000)?,
            admin_emails: optional("ADMIN_EMAILS")
                .map(|value| parse_email_list(&value))
                .unwrap_or_default(),
            identity: IdentityConfig {
                url: required("SUPABASE_URL")?,
                api_key: SecretString::from(required("SUPABASE_KEY")?),
                jwt_secret: SecretString::from(required("SUPABASE_JWT_SECRET")?),
            },
            razorpay: RazorpayConfig {
                key_id: required("RAZORPAY_KEY_ID")?,
                key_secret: SecretString::from(required("RAZORPAY_KEY_SECRET")?),
                currency: optional("PAYMENT_CURRENCY").unwrap_or_else(|| "INR".to_owned()),
            },
            shiprocket: ShiprocketConfig {
                email: required("SHIPROCKET_EMAIL")?,
                password: SecretString::from(required("SHIPROCKET_PASSWORD")?),
                pickup_location: optional("SHIPROCKET_PICKUP_LOCATION")
                    .unwrap_or_else(|| "Primary".to_owned()),
            },
            smtp: smtp_from_env()?,
            checkout: CheckoutConfig {
                stale_order_minutes: parsed_or("STALE_ORDER_MINUTES", 30)?,
            },
            outbox: OutboxConfig {
                max_attempts: parsed_or("OUTBOX_MAX_ATTEMPTS", 5)?,
                interval_secs: parsed_or("OUTBOX_INTERVAL_SECS", 30)?,
            },
            uploads: UploadConfig {
                dir: optional("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_owned()),
                file_size_limit: parsed_or("FILE_SIZE_LIMIT", 5 * 1024 * 1024)?,
            },
        })
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email.trim()))
    }
}

fn smtp_from_env() -> Result<Option<SmtpConfig>, ConfigError> {
    let (Some(host), Some(username), Some(password), Some(admin_email)) = (
        optional("SMTP_HOST"),
        optional("SMTP_USERNAME"),
        optional("SMTP_PASSWORD"),
        optional("ADMIN_NOTIFICATION_EMAIL"),
    ) else {
        return Ok(None);
    };

    Ok(Some(SmtpConfig {
        host,
        port: parsed_or("SMTP_PORT", 587)?,
        username,
        password: SecretString::from(password),
        admin_email,
    }))
}

pub fn parse_email_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_owned()))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(value) => value
            .parse()
            .map_err(|err: T::Err| ConfigError::InvalidEnvVar(key.to_owned(), err.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_list_is_trimmed_and_lowercased() {
        assert_eq!(
            parse_email_list(" Owner@Shop.in, ,ops@shop.in "),
            vec!["owner@shop.in".to_owned(), "ops@shop.in".to_owned()]
        );
    }
}
