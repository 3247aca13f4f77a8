//! Binance REST API client implementation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;

use crate::auth::{CredentialsProvider, Params, canonical_query_string, sign};
use crate::error::BinanceError;
use crate::rest::endpoints::SPOT_API_URL;

/// Header carrying the API key for key-authenticated and signed requests.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Authentication mode for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No authentication; params sent as-is.
    Public,
    /// `X-MBX-APIKEY` header attached; params unsigned.
    KeyOnly,
    /// `X-MBX-APIKEY` header plus `timestamp` and `signature` query params.
    Signed,
}

/// The Binance REST API client.
///
/// Issues public, key-authenticated, and signed requests against a configured
/// base URL. The client performs no retries: retry policy belongs to the
/// caller (for the listen-key lifecycle, to the renewal loop).
///
/// A client built with only an API key (no secret) is capability-restricted:
/// [`AuthMode::Signed`] requests fail with
/// [`BinanceError::MissingCredentials`], so a secret never needs to exist for
/// key-only use cases such as user data streams.
///
/// # Example
///
/// ```rust,no_run
/// use binance_api_client::rest::{AuthMode, RestClient};
/// use binance_api_client::auth::{Params, StaticCredentials};
/// use reqwest::Method;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let credentials = Arc::new(StaticCredentials::new("api_key", "api_secret"));
///     let client = RestClient::builder().credentials(credentials).build();
///
///     let params = Params::new().insert("symbol", "BTCUSDT");
///     let account = client
///         .request(Method::GET, "/api/v3/account", params, None, AuthMode::Signed)
///         .await?;
///     println!("{account}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RestClient {
    http: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl RestClient {
    /// Create a new client with default settings (spot base URL, public only).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::new()
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a request against the configured base URL.
    ///
    /// The query string sent on the wire is exactly the canonical string
    /// produced from `params` (plus `timestamp` and `signature` for
    /// [`AuthMode::Signed`]), so what is signed is what is sent. A JSON body,
    /// if present, is sent with a JSON content type.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Params,
        body: Option<&serde_json::Value>,
        auth: AuthMode,
    ) -> Result<serde_json::Value, BinanceError> {
        let query = match auth {
            AuthMode::Public | AuthMode::KeyOnly => canonical_query_string(&params),
            AuthMode::Signed => {
                let provider = self
                    .credentials
                    .as_ref()
                    .ok_or(BinanceError::MissingCredentials)?;
                let credentials = provider.get_credentials();

                let mut params = params;
                params.push("timestamp", epoch_millis());
                let canonical = canonical_query_string(&params);
                let signature = sign(credentials, &canonical);
                format!("{canonical}&signature={signature}")
            }
        };

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.http.request(method, &url);

        if matches!(auth, AuthMode::KeyOnly | AuthMode::Signed) {
            request = request.header(API_KEY_HEADER, self.require_api_key()?);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// The API key used for key-authenticated requests.
    ///
    /// An explicitly configured key takes precedence over the one inside the
    /// signing credentials.
    fn require_api_key(&self) -> Result<&str, BinanceError> {
        if let Some(key) = &self.api_key {
            return Ok(key);
        }
        if let Some(provider) = &self.credentials {
            return Ok(&provider.get_credentials().api_key);
        }
        Err(BinanceError::MissingCredentials)
    }

    /// Parse a response: non-2xx statuses surface as [`BinanceError::Request`].
    async fn parse_response(response: reqwest::Response) -> Result<serde_json::Value, BinanceError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BinanceError::Request {
                status: status.as_u16(),
                body,
            });
        }

        // Some endpoints (listen-key renewal on futures) return an empty body.
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            BinanceError::InvalidResponse(format!("Failed to parse response: {e}. Body: {body}"))
        })
    }
}

impl Default for RestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

/// Current time in milliseconds since UNIX epoch.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builder for [`RestClient`].
pub struct RestClientBuilder {
    base_url: String,
    api_key: Option<String>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    user_agent: Option<String>,
}

impl RestClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: SPOT_API_URL.to_string(),
            api_key: None,
            credentials: None,
            user_agent: None,
        }
    }

    /// Set the base URL (useful for testing with a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set an API key for key-authenticated requests without configuring a
    /// secret. Signed requests remain unavailable on the resulting client.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the credentials provider for signed requests.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> RestClient {
        let mut headers = HeaderMap::new();
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("binance-api-client/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("binance-api-client"));
        headers.insert(USER_AGENT, header_value);

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let http = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        RestClient {
            http,
            base_url: self.base_url,
            api_key: self.api_key,
            credentials: self.credentials,
        }
    }
}

impl Default for RestClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
