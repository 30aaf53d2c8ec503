//! S3 Credentials Module
//!
//! Chooses where the client's credentials come from:
//!
//! - both `access_key` and `secret_key` configured: static credentials
//! - neither configured: the SDK default provider chain (environment,
//!   profile, web identity, instance metadata)
//! - only one configured: a configuration error
//!
//! # Example
//!
//! ```
//! use ctlog_s3::config::S3Config;
//! use ctlog_s3::s3::CredentialsProvider;
//!
//! let mut config = S3Config::new("us-east-1", "tiles");
//! config.access_key = Some("AKID".into());
//! config.secret_key = Some("SECRET".into());
//!
//! let creds = CredentialsProvider::from_config(&config).unwrap().unwrap();
//! assert_eq!(creds.access_key_id(), "AKID");
//! ```

use crate::config::S3Config;
use aws_credential_types::Credentials;
use thiserror::Error;

/// Provider name reported by credentials built from configuration
const CONFIG_PROVIDER_NAME: &str = "ctlog-s3-config";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Factory for the credentials the client is built with
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Static credentials from `S3Config`, or `None` to defer to the default chain
    pub fn from_config(config: &S3Config) -> Result<Option<Credentials>, CredentialsError> {
        match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(Some(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                CONFIG_PROVIDER_NAME,
            ))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(CredentialsError::MissingCredentials(
                "access_key is set but secret_key is not".into(),
            )),
            (None, Some(_)) => Err(CredentialsError::MissingCredentials(
                "secret_key is set but access_key is not".into(),
            )),
        }
    }
}
