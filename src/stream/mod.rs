//! Binance WebSocket stream sessions.
//!
//! This module provides:
//! - [`listen_key`] - listen-key creation, renewal, and expiry tracking
//! - [`user`] - the private user data stream session
//! - [`market`] - the public multiplexed market data stream session
//!
//! Both session types deliver events through [`StreamCallbacks`]: inbound
//! JSON frames, transport errors, connection close, and connection
//! establishment. Callbacks are invoked from the task that owns the socket's
//! read loop (single producer per callback per session); bind them to a
//! channel or event loop as needed.

pub mod listen_key;
pub mod market;
pub mod user;

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BinanceError;

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
pub(crate) type WsReceiver = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

type MessageCallback = Box<dyn Fn(serde_json::Value) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(BinanceError) + Send + Sync>;
type UnitCallback = Box<dyn Fn() + Send + Sync>;

/// Caller-facing callback surface for a stream session.
///
/// `on_message` is required; the rest are optional.
///
/// # Example
///
/// ```rust
/// use binance_api_client::stream::StreamCallbacks;
///
/// let callbacks = StreamCallbacks::new(|event| println!("{event}"))
///     .on_error(|err| eprintln!("stream error: {err}"))
///     .on_close(|| println!("stream closed"));
/// ```
pub struct StreamCallbacks {
    on_message: MessageCallback,
    on_error: Option<ErrorCallback>,
    on_close: Option<UnitCallback>,
    on_connect: Option<UnitCallback>,
}

impl StreamCallbacks {
    /// Create a callback set with the required message callback.
    pub fn new(on_message: impl Fn(serde_json::Value) + Send + Sync + 'static) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_error: None,
            on_close: None,
            on_connect: None,
        }
    }

    /// Set the error callback, invoked on socket-level failures.
    pub fn on_error(mut self, f: impl Fn(BinanceError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Set the close callback, invoked when the socket closes.
    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    /// Set the connect callback, invoked once the socket is established and
    /// handlers are registered.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    pub(crate) fn message(&self, value: serde_json::Value) {
        (self.on_message)(value);
    }

    pub(crate) fn error(&self, err: BinanceError) {
        if let Some(f) = &self.on_error {
            f(err);
        }
    }

    pub(crate) fn closed(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }

    pub(crate) fn connected(&self) {
        if let Some(f) = &self.on_connect {
            f();
        }
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("has_on_error", &self.on_error.is_some())
            .field("has_on_close", &self.on_close.is_some())
            .field("has_on_connect", &self.on_connect.is_some())
            .finish()
    }
}

/// Drive a socket's read loop until the peer closes or a transport error
/// occurs.
///
/// Protocol ping frames are answered with pong frames carrying the identical
/// payload; text and binary frames are parsed as JSON and forwarded to the
/// message callback. On exit the teardown hook runs before the close
/// callback, so owned resources (the renewal task in particular) are released
/// before the caller observes the close.
pub(crate) async fn run_read_loop(
    mut receiver: WsReceiver,
    sink: Arc<Mutex<Option<WsSink>>>,
    callbacks: Arc<StreamCallbacks>,
    teardown: impl FnOnce(),
) {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(WsMessage::Ping(payload)) => {
                let mut guard = sink.lock().await;
                if let Some(sink) = guard.as_mut() {
                    if let Err(e) = sink.send(WsMessage::Pong(payload)).await {
                        tracing::warn!(error = %e, "failed to answer ping");
                    }
                }
            }
            Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                Ok(value) => callbacks.message(value),
                Err(e) => tracing::warn!(error = %e, "non-JSON text frame dropped"),
            },
            Ok(WsMessage::Binary(data)) => match serde_json::from_slice(&data) {
                Ok(value) => callbacks.message(value),
                Err(e) => tracing::warn!(error = %e, "non-JSON binary frame dropped"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                callbacks.error(BinanceError::WebSocket(e));
                break;
            }
        }
    }

    teardown();
    callbacks.closed();
}
