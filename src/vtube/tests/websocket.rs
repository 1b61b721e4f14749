use super::helpers::*;
use crate::vtube::client::AvatarLinkClient;
use crate::vtube::config::VTubeStudioConfig;
use crate::vtube::error::AvatarLinkError;
use crate::vtube::protocol;
use crate::vtube::transport::{Connector, WebSocketConnector};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

fn parse_text(message: Message) -> Value {
    match message {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn transport_round_trip_and_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut ws_tx, mut ws_rx) = ws.split();

        let incoming = parse_text(ws_rx.next().await.unwrap().unwrap());
        assert_eq!(incoming["ping"], true);

        ws_tx.send(Message::Text("not json".into())).await.unwrap();
        ws_tx
            .send(Message::Text("{\"pong\":true}".into()))
            .await
            .unwrap();
        ws_tx.send(Message::Close(None)).await.unwrap();
    });

    let transport = WebSocketConnector::default()
        .connect(&format!("ws://{}", addr))
        .await
        .unwrap();
    assert!(transport.is_open());

    transport.send(json!({ "ping": true })).await.unwrap();

    assert!(matches!(transport.recv().await, Err(AvatarLinkError::Protocol(_))));
    assert_eq!(transport.recv().await.unwrap()["pong"], true);
    assert!(matches!(transport.recv().await, Err(AvatarLinkError::Transport(_))));
    assert!(!transport.is_open());
    assert_eq!(
        transport.send(json!({})).await,
        Err(AvatarLinkError::NotConnected)
    );

    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WebSocketConnector::new(Duration::from_secs(2))
        .connect(&format!("ws://{}", addr))
        .await;
    assert!(matches!(result, Err(AvatarLinkError::Transport(_))));
}

#[tokio::test]
async fn client_authenticates_and_triggers_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut ws_tx, mut ws_rx) = ws.split();

        let auth = parse_text(ws_rx.next().await.unwrap().unwrap());
        assert_eq!(auth["messageType"], protocol::AUTH_REQUEST);
        assert_eq!(auth["data"]["pluginName"], "LLMChat");
        assert_eq!(auth["data"]["authenticationToken"], "stored-token");

        ws_tx
            .send(Message::Text(auth_response(true).to_string()))
            .await
            .unwrap();

        parse_text(ws_rx.next().await.unwrap().unwrap())
    });

    let config = VTubeStudioConfig {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        idle_enabled: false,
        emotion_map: HashMap::from([("happy".to_string(), "hk_smile".to_string())]),
        ..Default::default()
    };
    let client = AvatarLinkClient::new(
        config,
        RecordingCredentialStore::with_token(Some("stored-token")),
        Arc::new(WebSocketConnector::default()),
    )
    .unwrap();

    client.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), wait_until(|| client.is_authenticated()))
        .await
        .expect("client should authenticate");

    client.play_emotion("happy").await.unwrap();

    let trigger = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server should receive the trigger")
        .unwrap();
    assert_eq!(trigger["messageType"], protocol::HOTKEY_TRIGGER_REQUEST);
    assert_eq!(trigger["data"]["hotkeyID"], "hk_smile");

    client.shutdown().await;
}
