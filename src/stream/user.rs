//! Private user data stream session.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::BinanceError;
use crate::rest::endpoints::{
    COINM_FUTURES_API_URL, COINM_FUTURES_WS_URL, SPOT_API_URL, SPOT_WS_URL, USDM_FUTURES_API_URL,
    USDM_FUTURES_WS_URL, user_data,
};
use crate::rest::RestClient;
use crate::stream::listen_key::{ListenKeyEndpoint, ListenKeyLifecycle, RestListenKeyEndpoint};
use crate::stream::{StreamCallbacks, WsSink, run_read_loop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Connecting,
    Connected,
    Closed,
}

/// Build the user stream socket URL for a listen key.
pub fn user_stream_url(ws_base_url: &str, listen_key: &str) -> String {
    format!("{}/ws/{}", ws_base_url.trim_end_matches('/'), listen_key)
}

/// A persistent socket bound to a listen key.
///
/// `start()` mints the key through [`ListenKeyLifecycle`], opens the socket at
/// `<wsBaseUrl>/ws/<listenKey>`, and spawns a read loop that answers protocol
/// pings, forwards JSON frames to the message callback, and tears down the
/// renewal task when the socket closes. There is no automatic reconnection:
/// a dropped socket ends the session.
///
/// # Example
///
/// ```rust,no_run
/// use binance_api_client::stream::StreamCallbacks;
/// use binance_api_client::stream::user::UserDataStreamSession;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let callbacks = StreamCallbacks::new(|event| println!("{event}"))
///         .on_close(|| println!("user stream closed"));
///     let session = UserDataStreamSession::spot("api_key", callbacks);
///     session.start().await?;
///     // ... listen until done ...
///     session.stop().await;
///     Ok(())
/// }
/// ```
pub struct UserDataStreamSession<E: ListenKeyEndpoint = RestListenKeyEndpoint> {
    ws_base_url: String,
    lifecycle: Arc<ListenKeyLifecycle<E>>,
    callbacks: Arc<StreamCallbacks>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    state: Arc<Mutex<SessionState>>,
}

impl UserDataStreamSession<RestListenKeyEndpoint> {
    /// Session for the spot user data stream.
    pub fn spot(api_key: impl Into<String>, callbacks: StreamCallbacks) -> Self {
        Self::for_product(api_key, SPOT_API_URL, SPOT_WS_URL, user_data::SPOT, callbacks)
    }

    /// Session for the USDⓈ-M futures user data stream.
    pub fn usdm_futures(api_key: impl Into<String>, callbacks: StreamCallbacks) -> Self {
        Self::for_product(
            api_key,
            USDM_FUTURES_API_URL,
            USDM_FUTURES_WS_URL,
            user_data::USDM_FUTURES,
            callbacks,
        )
    }

    /// Session for the coin-M futures user data stream.
    pub fn coinm_futures(api_key: impl Into<String>, callbacks: StreamCallbacks) -> Self {
        Self::for_product(
            api_key,
            COINM_FUTURES_API_URL,
            COINM_FUTURES_WS_URL,
            user_data::COINM_FUTURES,
            callbacks,
        )
    }

    /// Session against arbitrary base URLs.
    ///
    /// The listen-key endpoint is a pure function of the REST base URL;
    /// unmapped base URLs fail here with [`BinanceError::Config`].
    pub fn custom(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        ws_url: impl Into<String>,
        callbacks: StreamCallbacks,
    ) -> Result<Self, BinanceError> {
        let client = RestClient::builder()
            .base_url(api_url)
            .api_key(api_key)
            .build();
        let endpoint = RestListenKeyEndpoint::for_base_url(client)?;
        Ok(Self::with_endpoint(endpoint, ws_url, callbacks))
    }

    fn for_product(
        api_key: impl Into<String>,
        api_url: &str,
        ws_url: &str,
        path: &'static str,
        callbacks: StreamCallbacks,
    ) -> Self {
        // Key-only client: no secret ever exists for user stream sessions.
        let client = RestClient::builder()
            .base_url(api_url)
            .api_key(api_key)
            .build();
        let endpoint = RestListenKeyEndpoint::with_path(client, path);
        Self::with_endpoint(endpoint, ws_url, callbacks)
    }
}

impl<E: ListenKeyEndpoint> UserDataStreamSession<E> {
    /// Session over a custom listen-key endpoint (test seam).
    pub fn with_endpoint(
        endpoint: E,
        ws_base_url: impl Into<String>,
        callbacks: StreamCallbacks,
    ) -> Self {
        let callbacks = Arc::new(callbacks);
        let lifecycle = {
            let callbacks = Arc::clone(&callbacks);
            ListenKeyLifecycle::new(endpoint).on_degraded(move |err| callbacks.error(err))
        };
        Self {
            ws_base_url: ws_base_url.into(),
            lifecycle: Arc::new(lifecycle),
            callbacks,
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Created)),
        }
    }

    /// Mint a listen key, arm its renewal, and connect the socket.
    ///
    /// On any failure no socket is left open and no renewal task is left
    /// armed. The connect callback fires only after the socket is up and the
    /// read loop is running.
    pub async fn start(&self) -> Result<(), BinanceError> {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Created {
                return Err(BinanceError::SessionClosed);
            }
            *state = SessionState::Connecting;
        }

        let key = match self.lifecycle.start().await {
            Ok(key) => key,
            Err(err) => {
                *lock(&self.state) = SessionState::Closed;
                return Err(err);
            }
        };

        // Defensive: a creation call that outlived the TTL yields a key that
        // is dead on arrival.
        if key.is_expired() {
            self.teardown();
            return Err(BinanceError::InvalidResponse(
                "listen key expired before the socket could be opened".to_string(),
            ));
        }

        let url = user_stream_url(&self.ws_base_url, key.value());
        let ws_stream = match connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                self.teardown();
                return Err(BinanceError::WebSocketMsg(format!(
                    "failed to connect to {url}: {e}"
                )));
            }
        };

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
            self.lifecycle.stop();
            let mut guard = self.sink.lock().await;
            if let Some(mut sink) = guard.take() {
                let _ = sink.send(WsMessage::Close(None)).await;
            }
            return Err(BinanceError::SessionClosed);
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let state = Arc::clone(&self.state);
        tokio::spawn(run_read_loop(
            receiver,
            Arc::clone(&self.sink),
            Arc::clone(&self.callbacks),
            move || {
                // Closing the socket without stopping renewal would leak a
                // task against a dead connection.
                lifecycle.stop();
                *lock(&state) = SessionState::Closed;
            },
        ));

        tracing::debug!(url, "user data stream connected");
        self.callbacks.connected();
        Ok(())
    }

    /// Close the socket and stop the listen-key lifecycle.
    ///
    /// Idempotent and safe to call from within a close callback or
    /// concurrently with an in-flight `start()`.
    pub async fn stop(&self) {
        *lock(&self.state) = SessionState::Closed;
        self.lifecycle.stop();

        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
    }

    /// Whether the session is currently connected.
    pub fn is_connected(&self) -> bool {
        *lock(&self.state) == SessionState::Connected
    }

    /// The current listen key's expiry status.
    pub fn is_listen_key_expired(&self) -> bool {
        self.lifecycle.is_expired()
    }

    fn teardown(&self) {
        self.lifecycle.stop();
        *lock(&self.state) = SessionState::Closed;
    }
}

impl<E: ListenKeyEndpoint> std::fmt::Debug for UserDataStreamSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataStreamSession")
            .field("ws_base_url", &self.ws_base_url)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a callback panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
