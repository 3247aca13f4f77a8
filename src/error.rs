//! Error types for the Binance client library.

use thiserror::Error;

/// The main error type for all Binance client operations.
#[derive(Error, Debug)]
pub enum BinanceError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The API returned a non-success HTTP status
    #[error("Request failed with status {status}: {body}")]
    Request {
        /// HTTP status code of the response
        status: u16,
        /// Raw response body, usually a JSON error payload
        body: String,
    },

    /// Client configuration error (e.g. a base URL with no known listen-key endpoint)
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WebSocket communication error (with message)
    #[error("WebSocket error: {0}")]
    WebSocketMsg(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid response from the API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Operation attempted on a session that is not connected
    #[error("Session is closed")]
    SessionClosed,

    /// Missing required credentials
    #[error("Missing credentials: API secret required for signed endpoints")]
    MissingCredentials,
}

impl BinanceError {
    /// The HTTP status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            BinanceError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        let error = BinanceError::Request {
            status: 401,
            body: r#"{"code":-2014,"msg":"API-key format invalid."}"#.to_string(),
        };
        assert!(error.to_string().contains("401"));
        assert_eq!(error.status(), Some(401));
    }

    #[test]
    fn test_config_error_has_no_status() {
        let error = BinanceError::Config("unknown base URL".to_string());
        assert_eq!(error.status(), None);
    }
}
