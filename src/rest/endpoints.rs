//! Binance REST and WebSocket endpoint constants.

use crate::error::BinanceError;

/// Base URL for the Binance Spot REST API.
pub const SPOT_API_URL: &str = "https://api.binance.com";
/// Base URL for the Binance USDⓈ-M futures REST API.
pub const USDM_FUTURES_API_URL: &str = "https://fapi.binance.com";
/// Base URL for the Binance coin-M futures REST API.
pub const COINM_FUTURES_API_URL: &str = "https://dapi.binance.com";

/// Base URL for the Binance Spot WebSocket streams.
pub const SPOT_WS_URL: &str = "wss://stream.binance.com:9443";
/// Base URL for the Binance USDⓈ-M futures WebSocket streams.
pub const USDM_FUTURES_WS_URL: &str = "wss://fstream.binance.com";
/// Base URL for the Binance coin-M futures WebSocket streams.
pub const COINM_FUTURES_WS_URL: &str = "wss://dstream.binance.com";

/// Listen-key (user data stream) endpoints, fixed per product line.
pub mod user_data {
    /// Spot user data stream.
    pub const SPOT: &str = "/api/v3/userDataStream";
    /// USDⓈ-M futures user data stream.
    pub const USDM_FUTURES: &str = "/fapi/v1/listenKey";
    /// Coin-M futures user data stream.
    pub const COINM_FUTURES: &str = "/dapi/v1/listenKey";
}

/// Resolve the listen-key endpoint path for a REST base URL.
///
/// Only the three fixed product-line base URLs have a listen-key endpoint;
/// anything else is a configuration error and fails loudly rather than
/// producing a broken request.
pub fn listen_key_path(base_url: &str) -> Result<&'static str, BinanceError> {
    match base_url.trim_end_matches('/') {
        SPOT_API_URL => Ok(user_data::SPOT),
        USDM_FUTURES_API_URL => Ok(user_data::USDM_FUTURES),
        COINM_FUTURES_API_URL => Ok(user_data::COINM_FUTURES),
        other => Err(BinanceError::Config(format!(
            "no listen-key endpoint known for base URL {other}"
        ))),
    }
}
