//! API credentials and credential providers.

use secrecy::{ExposeSecret, SecretString};

use crate::error::BinanceError;

/// Default environment variable holding the API key.
pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
/// Default environment variable holding the API secret.
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

/// An API key/secret pair.
///
/// The key is a public identifier sent in the `X-MBX-APIKEY` header. The
/// secret is held in a [`SecretString`], so `Debug` output redacts it; it is
/// only read inside the signing path.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Public API key identifier.
    pub api_key: String,
    api_secret: SecretString,
}

impl Credentials {
    /// Create a credential pair from a key and secret.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// The secret bytes for signing. Keep the exposure local to the signer.
    pub fn expose_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }
}

/// Source of the credentials used for signed requests.
///
/// The seam for callers that load key material from somewhere other than
/// plain configuration, such as a secrets manager.
pub trait CredentialsProvider: Send + Sync {
    /// The credentials to sign with.
    fn get_credentials(&self) -> &Credentials;
}

/// Provider over a fixed key/secret pair.
#[derive(Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    /// Create a provider from a key and secret.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(api_key, api_secret),
        }
    }
}

impl From<Credentials> for StaticCredentials {
    fn from(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialsProvider for StaticCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Provider loaded from the process environment.
///
/// Reads [`API_KEY_ENV`] and [`API_SECRET_ENV`] by default; a missing
/// variable surfaces as [`BinanceError::Config`].
#[derive(Debug)]
pub struct EnvCredentials {
    credentials: Credentials,
}

impl EnvCredentials {
    /// Load credentials from the default environment variables.
    pub fn from_env() -> Result<Self, BinanceError> {
        Self::from_env_vars(API_KEY_ENV, API_SECRET_ENV)
    }

    /// Load credentials from custom environment variable names.
    pub fn from_env_vars(key_var: &str, secret_var: &str) -> Result<Self, BinanceError> {
        let read = |var: &str| {
            std::env::var(var)
                .map_err(|_| BinanceError::Config(format!("environment variable {var} not set")))
        };
        Ok(Self {
            credentials: Credentials::new(read(key_var)?, read(secret_var)?),
        })
    }
}

impl CredentialsProvider for EnvCredentials {
    fn get_credentials(&self) -> &Credentials {
        &self.credentials
    }
}
