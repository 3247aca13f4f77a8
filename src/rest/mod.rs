//! Binance REST API client.
//!
//! This module provides:
//! - [`RestClient`] - the HTTP request executor with public, key-only, and
//!   signed authentication modes
//! - [`endpoints`] - base URL and endpoint path constants

mod client;
pub mod endpoints;

pub use client::{API_KEY_HEADER, AuthMode, RestClient, RestClientBuilder};
