//! Authentication module for the Binance API.
//!
//! This module provides:
//! - Credential management with secure secret storage
//! - Canonical query-string construction for signed requests
//! - HMAC-SHA256 signature generation

mod credentials;
mod signature;

pub use credentials::{
    API_KEY_ENV, API_SECRET_ENV, Credentials, CredentialsProvider, EnvCredentials,
    StaticCredentials,
};
pub use signature::{ParamValue, Params, canonical_query_string, sign};
