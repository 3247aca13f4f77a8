//! Public multiplexed market data stream session.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::BinanceError;
use crate::rest::endpoints::{COINM_FUTURES_WS_URL, SPOT_WS_URL, USDM_FUTURES_WS_URL};
use crate::stream::{StreamCallbacks, WsSink, run_read_loop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Connected,
    Closed,
}

/// Control-plane envelope for stream subscription management.
///
/// `LIST_SUBSCRIPTIONS` carries no `params` field.
#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    id: u64,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a [String]>,
}

/// Build the multiplexed stream socket URL for a set of stream names.
///
/// Stream names are lower-cased and joined with `/`.
pub fn market_stream_url(ws_base_url: &str, streams: &[String]) -> String {
    let streams = streams
        .iter()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/stream?streams={}", ws_base_url.trim_end_matches('/'), streams)
}

/// A persistent socket over a static multiplexed stream path.
///
/// The feed set is chosen at construction time and adjusted at runtime with
/// [`subscribe`](Self::subscribe) / [`unsubscribe`](Self::unsubscribe)
/// control frames. Those are fire-and-forget: the server's acknowledgement
/// arrives on the shared message callback, correlated by `id`. No credential
/// lifecycle, no timers, no automatic reconnection.
///
/// # Example
///
/// ```rust,no_run
/// use binance_api_client::stream::StreamCallbacks;
/// use binance_api_client::stream::market::MarketStreamSession;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let callbacks = StreamCallbacks::new(|event| println!("{event}"));
///     let session = MarketStreamSession::spot(vec!["btcusdt@trade".into()], callbacks);
///     session.start().await?;
///     session.subscribe(vec!["ethusdt@depth".into()], None).await?;
///     // ... listen until done ...
///     session.stop().await;
///     Ok(())
/// }
/// ```
pub struct MarketStreamSession {
    url: String,
    callbacks: Arc<StreamCallbacks>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    state: Arc<Mutex<SessionState>>,
}

impl MarketStreamSession {
    /// Session on the spot market data streams.
    pub fn spot(streams: Vec<String>, callbacks: StreamCallbacks) -> Self {
        Self::custom(SPOT_WS_URL, streams, callbacks)
    }

    /// Session on the USDⓈ-M futures market data streams.
    pub fn usdm_futures(streams: Vec<String>, callbacks: StreamCallbacks) -> Self {
        Self::custom(USDM_FUTURES_WS_URL, streams, callbacks)
    }

    /// Session on the coin-M futures market data streams.
    pub fn coinm_futures(streams: Vec<String>, callbacks: StreamCallbacks) -> Self {
        Self::custom(COINM_FUTURES_WS_URL, streams, callbacks)
    }

    /// Session against an arbitrary WebSocket base URL.
    pub fn custom(
        ws_base_url: impl AsRef<str>,
        streams: Vec<String>,
        callbacks: StreamCallbacks,
    ) -> Self {
        Self {
            url: market_stream_url(ws_base_url.as_ref(), &streams),
            callbacks: Arc::new(callbacks),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Created)),
        }
    }

    /// Connect the socket and spawn the read loop.
    pub async fn start(&self) -> Result<(), BinanceError> {
        if *lock(&self.state) != SessionState::Created {
            return Err(BinanceError::SessionClosed);
        }

        let (ws_stream, _) = connect_async(&self.url).await.map_err(|e| {
            BinanceError::WebSocketMsg(format!("failed to connect to {}: {}", self.url, e))
        })?;

        let (sink, receiver) = ws_stream.split();
        *self.sink.lock().await = Some(sink);

        // stop() may have raced the connect; the Closed flag wins and the
        // fresh socket is released instead of leaked.
        let cancelled = {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                true
            } else {
                *state = SessionState::Connected;
                false
            }
        };
        if cancelled {
            let mut guard = self.sink.lock().await;
            if let Some(mut sink) = guard.take() {
                let _ = sink.send(WsMessage::Close(None)).await;
            }
            return Err(BinanceError::SessionClosed);
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(run_read_loop(
            receiver,
            Arc::clone(&self.sink),
            Arc::clone(&self.callbacks),
            move || {
                *lock(&state) = SessionState::Closed;
            },
        ));

        tracing::debug!(url = self.url, "market data stream connected");
        self.callbacks.connected();
        Ok(())
    }

    /// Subscribe to additional streams.
    ///
    /// Returns the request id used, either the caller's or a fresh random
    /// positive integer.
    pub async fn subscribe(
        &self,
        streams: Vec<String>,
        id: Option<u64>,
    ) -> Result<u64, BinanceError> {
        self.send_request("SUBSCRIBE", Some(streams), id).await
    }

    /// Unsubscribe from streams.
    pub async fn unsubscribe(
        &self,
        streams: Vec<String>,
        id: Option<u64>,
    ) -> Result<u64, BinanceError> {
        self.send_request("UNSUBSCRIBE", Some(streams), id).await
    }

    /// Request the list of active subscriptions.
    pub async fn list_subscriptions(&self, id: Option<u64>) -> Result<u64, BinanceError> {
        self.send_request("LIST_SUBSCRIPTIONS", None, id).await
    }

    /// Close the socket. Idempotent.
    pub async fn stop(&self) {
        *lock(&self.state) = SessionState::Closed;
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        *lock(&self.state) == SessionState::Connected
    }

    async fn send_request(
        &self,
        method: &'static str,
        params: Option<Vec<String>>,
        id: Option<u64>,
    ) -> Result<u64, BinanceError> {
        let id = id.unwrap_or_else(random_request_id);
        let request = StreamRequest {
            id,
            method,
            params: params.as_deref(),
        };
        let json = serde_json::to_string(&request)?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(BinanceError::SessionClosed)?;
        sink.send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| BinanceError::WebSocketMsg(format!("failed to send request: {e}")))?;
        Ok(id)
    }
}

impl std::fmt::Debug for MarketStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStreamSession")
            .field("url", &self.url)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

/// Fresh random positive request id; collisions are accepted, matching the
/// loose request/response correlation of the protocol.
fn random_request_id() -> u64 {
    rand::rng().random_range(1..=1_000_000)
}

/// Lock a mutex, recovering the guard if a callback panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
