//! # Binance Client
//!
//! An async Rust client for the Binance REST and WebSocket stream APIs.
//!
//! ## Features
//!
//! - Signed, key-only, and public REST requests with HMAC-SHA256
//!   authentication over a canonical query string
//! - Private user data streams with autonomous listen-key renewal
//! - Public multiplexed market data streams with runtime
//!   subscribe/unsubscribe
//! - Spot, USDⓈ-M futures, and coin-M futures product lines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use binance_api_client::stream::StreamCallbacks;
//! use binance_api_client::stream::market::MarketStreamSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let callbacks = StreamCallbacks::new(|event| println!("{event}"));
//!     let session = MarketStreamSession::spot(vec!["btcusdt@trade".into()], callbacks);
//!     session.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod rest;
pub mod stream;

// Re-export commonly used types at crate root
pub use error::BinanceError;
pub use rest::RestClient;
pub use stream::StreamCallbacks;

/// Result type alias using BinanceError
pub type Result<T> = std::result::Result<T, BinanceError>;
