//! WebSocket transport: one actor task per connection.
//!
//! The socket splits into reader and writer halves. The writer task
//! owns the sink and forwards frames from an mpsc channel; the reader
//! drives the handshake and then the in-session read loop. Everything
//! that can push to this client — router replies, registry broadcasts —
//! clones the channel sender.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::session::{self, Session};
use crate::canvas::mutation;
use crate::errors::{HandshakeError, CLOSE_NORMAL};
use crate::state::AppState;
use crate::ws::protocol::{send, send_error, ConnectionSender, ServerMessage};
use crate::ws::router::{self, Dispatch};

/// Server ping every 30 seconds; prevents connection leaks from abrupt
/// disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// The first (login) frame must arrive within this window.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// GET /ws — WebSocket upgrade. Authentication happens in-band: the
/// first frame must be a `login` or `login_admin` message.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Spawn writer task: forwards mpsc messages to the WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Pre-admission handshake. A failure terminates the connection with
    // a failure-specific close code; nothing was registered yet.
    let session = match handshake(&mut ws_receiver, &tx, &state).await {
        Ok(session) => session,
        Err(err) => {
            tracing::info!(error = %err, close_code = err.close_code(), "Handshake failed");
            send_error(&tx, &err.client_message());
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: err.close_code(),
                reason: err.client_message().into(),
            })));
            drop(tx);
            let _ = writer_handle.await;
            return;
        }
    };

    // A freshly minted actor id is the one response guaranteed before
    // the session is open.
    if let Some(minted) = &session.minted_id {
        send(
            &tx,
            &ServerMessage::UserId {
                data: minted.clone(),
            },
        );
    }

    let conn_id = state.registry.admit(
        tx.clone(),
        session.role,
        session.actor_id.clone(),
        session.nickname.clone(),
    );

    tracing::info!(
        nickname = %session.nickname,
        role = ?session.role,
        "WebSocket session open"
    );

    // Resynchronize the newly admitted connection.
    match mutation::full_field_snapshot(&state.db, &state.registry, &state.settings).await {
        Ok(snapshot) => send(&tx, &snapshot),
        Err(e) => {
            tracing::error!(error = %e, "Initial snapshot failed");
            send_error(&tx, "Internal server error");
        }
    }

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Ping task: periodic pings, close on missed pong.
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Read loop: messages from one connection are processed strictly in
    // arrival order; each dispatch completes before the next read.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    match router::dispatch(&state, &session, &tx, text.as_str()).await {
                        Dispatch::Continue => {}
                        Dispatch::Close => {
                            let _ = tx.send(Message::Close(Some(CloseFrame {
                                code: CLOSE_NORMAL,
                                reason: "Normal Closure".into(),
                            })));
                            break;
                        }
                        Dispatch::Shutdown => break,
                    }
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames; binary is a shape
                    // violation, not a reason to drop the connection.
                    send_error(&tx, "Binary frames are not supported");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        nickname = %session.nickname,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    nickname = %session.nickname,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(nickname = %session.nickname, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: this connection only. Removal is idempotent, so the
    // shutdown-all path having already cleared the record is fine.
    ping_handle.abort();
    state.registry.remove(conn_id);
    drop(tx);
    let _ = writer_handle.await;

    tracing::info!(nickname = %session.nickname, "WebSocket session closed");
}

/// Await the first frame and run the Session Protocol on it. Control
/// frames are tolerated before the login; anything else is a protocol
/// violation.
async fn handshake(
    ws_receiver: &mut SplitStream<WebSocket>,
    tx: &ConnectionSender,
    state: &AppState,
) -> Result<Session, HandshakeError> {
    let first = timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    return Err(HandshakeError::Protocol(
                        "Binary frames are not supported".to_string(),
                    ))
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HandshakeError::Protocol(
                        "Connection closed before login".to_string(),
                    ))
                }
                Some(Err(_)) => {
                    return Err(HandshakeError::Protocol(
                        "Transport error before login".to_string(),
                    ))
                }
            }
        }
    })
    .await
    .map_err(|_| HandshakeError::Protocol("Login deadline expired".to_string()))??;

    session::authenticate(state, first.as_str()).await
}

/// Writer task: receives messages from the mpsc channel and forwards
/// them to the WebSocket sink. Exits when every sender is dropped or
/// the sink breaks.
async fn writer_task(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
        if is_close {
            break;
        }
    }
}
