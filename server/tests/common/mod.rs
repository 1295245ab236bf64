//! Shared helpers for integration tests: a real server on a random
//! port plus a tokio-tungstenite client with login and frame-reading
//! conveniences.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use pixelfield_server::config::RuntimeSettings;
use pixelfield_server::state::AppState;
use pixelfield_server::ws::registry::ConnectionRegistry;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _tmp: tempfile::TempDir,
}

/// Start the server on a random port with the given cooldown window and
/// a 64x64 field.
pub async fn start_test_server(cooldown_secs: u64) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = pixelfield_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = pixelfield_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate signing key");

    let state = AppState {
        db,
        jwt_secret,
        registry: Arc::new(ConnectionRegistry::default()),
        settings: Arc::new(RuntimeSettings::new(cooldown_secs, 64, 64)),
    };

    let app = pixelfield_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        _tmp: tmp_dir,
    }
}

pub async fn connect(server: &TestServer) -> WsClient {
    let url = format!("ws://{}/ws", server.addr);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Read frames until one parses as JSON with the given `type`. Pings
/// are answered; everything else is skipped.
pub async fn recv_type(ws: &mut WsClient, kind: &str) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for '{}'", kind))
            .expect("Stream ended")
            .expect("Transport error");
        match msg {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("Invalid JSON frame");
                if value["type"] == kind {
                    return value;
                }
            }
            Message::Ping(data) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }
}

/// Read frames until the server closes the connection; returns the
/// close code, or None for a codeless close / dropped stream.
pub async fn recv_close_code(ws: &mut WsClient) -> Option<u16> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Log in as an actor. Returns the actor id (minted or echoed back from
/// the caller) and the initial field_state.
pub async fn login(
    ws: &mut WsClient,
    nickname: &str,
    user_id: Option<&str>,
) -> (String, serde_json::Value) {
    let mut data = serde_json::json!({ "nickname": nickname });
    if let Some(id) = user_id {
        data["user_id"] = id.into();
    }
    send_json(ws, serde_json::json!({ "type": "login", "data": data })).await;

    let mut actor_id = user_id.map(|s| s.to_string());
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out during login")
            .expect("Stream ended during login")
            .expect("Transport error during login");
        match msg {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("Invalid JSON frame");
                match value["type"].as_str() {
                    Some("user_id") => {
                        actor_id = Some(value["data"].as_str().unwrap().to_string());
                    }
                    Some("field_state") => {
                        return (actor_id.expect("No actor id resolved"), value);
                    }
                    _ => {}
                }
            }
            Message::Ping(data) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }
}

/// Create an administrator record directly in the store and issue a
/// short-lived token for it.
pub fn admin_token(server: &TestServer, username: &str) -> String {
    {
        let conn = server.state.db.lock().unwrap();
        pixelfield_server::store::identity::create_admin(&conn, username, "hunter2")
            .expect("Failed to create admin");
    }
    pixelfield_server::auth::jwt::issue_admin_token(&server.state.jwt_secret, username, 600)
        .expect("Failed to issue token")
}

/// Log in as an administrator; returns the initial field_state.
pub async fn login_admin(ws: &mut WsClient, token: &str) -> serde_json::Value {
    send_json(
        ws,
        serde_json::json!({ "type": "login_admin", "data": token }),
    )
    .await;
    recv_type(ws, "field_state").await
}
