use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use binance_api_client::error::BinanceError;
use binance_api_client::stream::StreamCallbacks;
use binance_api_client::stream::market::{MarketStreamSession, market_stream_url};

/// Accept one WebSocket connection and report the request path and query.
async fn accept_one(
    listener: TcpListener,
    path_tx: tokio::sync::oneshot::Sender<String>,
) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut captured = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        captured = Some(
            req.uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
        );
        Ok(resp)
    })
    .await
    .unwrap();
    let _ = path_tx.send(captured.unwrap_or_default());
    ws
}

#[test]
fn test_connect_url_shape() {
    assert_eq!(
        market_stream_url(
            "wss://stream.binance.com:9443",
            &["BTCUSDT@trade".to_string(), "ETHUSDT@depth".to_string()]
        ),
        "wss://stream.binance.com:9443/stream?streams=btcusdt@trade/ethusdt@depth"
    );
}

#[tokio::test]
async fn test_subscribe_frame_gets_random_positive_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, path_rx) = tokio::sync::oneshot::channel();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener, path_tx).await;
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => frame_tx.send(text.to_string()).unwrap(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let callbacks = StreamCallbacks::new(|_| {});
    let session = MarketStreamSession::custom(
        format!("ws://{addr}"),
        vec!["BTCUSDT@trade".to_string()],
        callbacks,
    );
    session.start().await.unwrap();
    assert_eq!(path_rx.await.unwrap(), "/stream?streams=btcusdt@trade");

    let used_id = session
        .subscribe(vec!["btcusdt@trade".to_string()], None)
        .await
        .unwrap();
    assert!(used_id >= 1);

    let frame: serde_json::Value =
        serde_json::from_str(&frame_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["method"], "SUBSCRIBE");
    assert_eq!(frame["params"], serde_json::json!(["btcusdt@trade"]));
    assert_eq!(frame["id"], used_id);
    assert!(frame["id"].as_u64().unwrap() >= 1);

    session.stop().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_control_frames_honor_explicit_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, _path_rx) = tokio::sync::oneshot::channel();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener, path_tx).await;
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => frame_tx.send(text.to_string()).unwrap(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let callbacks = StreamCallbacks::new(|_| {});
    let session = MarketStreamSession::custom(
        format!("ws://{addr}"),
        vec!["btcusdt@trade".to_string()],
        callbacks,
    );
    session.start().await.unwrap();

    session
        .unsubscribe(vec!["btcusdt@trade".to_string()], Some(99))
        .await
        .unwrap();
    let frame: serde_json::Value =
        serde_json::from_str(&frame_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["id"], 99);
    assert_eq!(frame["method"], "UNSUBSCRIBE");

    session.list_subscriptions(Some(100)).await.unwrap();
    let frame: serde_json::Value =
        serde_json::from_str(&frame_rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["id"], 100);
    assert_eq!(frame["method"], "LIST_SUBSCRIPTIONS");
    assert!(frame.get("params").is_none());

    session.stop().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_messages_forwarded_and_close_observed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (path_tx, _path_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(async move {
        let mut ws = accept_one(listener, path_tx).await;
        ws.send(Message::Text(
            r#"{"stream":"btcusdt@trade","data":{"p":"50000"}}"#.into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Close(None)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let connects_cb = Arc::clone(&connects);

    let callbacks = StreamCallbacks::new(move |event| {
        msg_tx.send(event).unwrap();
    })
    .on_connect(move || {
        connects_cb.fetch_add(1, Ordering::SeqCst);
    })
    .on_close(move || {
        let _ = close_tx.send(());
    });

    let session = MarketStreamSession::custom(
        format!("ws://{addr}"),
        vec!["btcusdt@trade".to_string()],
        callbacks,
    );
    session.start().await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    let event = msg_rx.recv().await.unwrap();
    assert_eq!(event["stream"], "btcusdt@trade");
    assert_eq!(event["data"]["p"], "50000");

    close_rx.recv().await.unwrap();
    assert!(!session.is_connected());

    session.stop().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_before_start_is_rejected() {
    let callbacks = StreamCallbacks::new(|_| {});
    let session = MarketStreamSession::custom(
        "ws://127.0.0.1:1",
        vec!["btcusdt@trade".to_string()],
        callbacks,
    );
    let err = session
        .subscribe(vec!["ethusdt@trade".to_string()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, BinanceError::SessionClosed));
}
