//! Message Router: dispatch one decoded inbound message from an
//! already-authenticated connection to exactly one handler.
//!
//! Every failure here is non-fatal: unknown types, bad payload shapes,
//! privilege violations and store errors all come back to the sender as
//! an `error` frame and the connection stays open. Only `disconnect`
//! and a game reset end the read loop, and both go through the
//! registry's normal paths.

use crate::auth::session::{Role, Session};
use crate::canvas::mutation::{self, WriteOutcome, WriteRequest, ERASE_COLOR};
use crate::errors::{StoreError, WriteError, CLOSE_FORBIDDEN};
use crate::state::AppState;
use crate::store::canvas;
use crate::store::identity;
use crate::ws::protocol::{
    send, send_error, AdminPixelWrite, BanToggle, ConnectionSender, Inbound, OnlineCountData,
    PixelInfoData, PixelQuery, PixelUpdateData, PixelWrite, SelectionWrite, ServerMessage,
};
use crate::ws::registry::Audience;

/// What the read loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// Voluntary close request; the handler closes with a normal code.
    Close,
    /// The registry was shut down (game reset); everything is gone,
    /// including this connection.
    Shutdown,
}

pub async fn dispatch(
    state: &AppState,
    session: &Session,
    tx: &ConnectionSender,
    raw: &str,
) -> Dispatch {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(_) => {
            send_error(tx, "Malformed message");
            return Dispatch::Continue;
        }
    };

    match inbound.kind.as_str() {
        "update_pixel" => handle_update_pixel(state, session, tx, inbound.data).await,
        "update_pixel_admin" => {
            if require_admin(session, tx) {
                handle_update_pixel_admin(state, session, tx, inbound.data).await;
            }
        }
        "update_selection" => handle_update_selection(state, session, tx, inbound.data),
        "get_field_state" => handle_get_field_state(state, tx).await,
        "get_online_count" => send(
            tx,
            &ServerMessage::OnlineCountUpdate {
                data: OnlineCountData {
                    online: state.registry.online_count(),
                },
            },
        ),
        "get_cooldown" => send(
            tx,
            &ServerMessage::CooldownUpdate {
                data: state.settings.cooldown_secs(),
            },
        ),
        "pixel_info_admin" => {
            if require_admin(session, tx) {
                handle_pixel_info(state, tx, inbound.data).await;
            }
        }
        "toggle_ban_user_admin" => {
            if require_admin(session, tx) {
                handle_toggle_ban(state, tx, inbound.data).await;
            }
        }
        "update_cooldown_admin" => {
            if require_admin(session, tx) {
                handle_update_cooldown(state, tx, inbound.data);
            }
        }
        "reset_game_admin" => {
            if require_admin(session, tx) {
                return handle_reset_game(state, tx, inbound.data).await;
            }
        }
        "disconnect" => return Dispatch::Close,
        other => {
            tracing::debug!(kind = other, "Unknown message type");
            send_error(tx, "Unknown message type");
        }
    }

    Dispatch::Continue
}

/// Admin-only types from an observer get a non-fatal Forbidden reply;
/// there is no privilege escalation path.
fn require_admin(session: &Session, tx: &ConnectionSender) -> bool {
    if session.role == Role::Administrator {
        true
    } else {
        send_error(tx, "Forbidden");
        false
    }
}

async fn handle_update_pixel(
    state: &AppState,
    session: &Session,
    tx: &ConnectionSender,
    data: serde_json::Value,
) {
    let req: PixelWrite = match serde_json::from_value(data) {
        Ok(req) => req,
        Err(_) => {
            send_error(tx, "Invalid pixel payload");
            return;
        }
    };
    let Some(actor_id) = session.actor_id.clone() else {
        send_error(tx, "Administrators paint via update_pixel_admin");
        return;
    };

    let write = WriteRequest {
        x: req.x,
        y: req.y,
        color: req.color,
        owner: actor_id,
        claimed_time: mutation::next_write_time(),
        bypass_cooldown: false,
    };
    finish_write(state, session, tx, write).await;
}

async fn handle_update_pixel_admin(
    state: &AppState,
    session: &Session,
    tx: &ConnectionSender,
    data: serde_json::Value,
) {
    let req: AdminPixelWrite = match serde_json::from_value(data) {
        Ok(req) => req,
        Err(_) => {
            send_error(tx, "Invalid pixel payload");
            return;
        }
    };
    let Some(owner) = session.owner_id() else {
        send_error(tx, "No identity for this connection");
        return;
    };

    let write = WriteRequest {
        x: req.x,
        y: req.y,
        color: req.color.unwrap_or_else(|| ERASE_COLOR.to_string()),
        owner: owner.to_string(),
        claimed_time: mutation::next_write_time(),
        bypass_cooldown: true,
    };
    finish_write(state, session, tx, write).await;
}

/// Shared tail of both write paths: run the mutation, then announce an
/// applied write to everyone. A superseded write is a silent non-error —
/// the cell already reflects a later timestamp.
async fn finish_write(state: &AppState, session: &Session, tx: &ConnectionSender, write: WriteRequest) {
    let (x, y, color) = (write.x, write.y, write.color.clone());
    match mutation::apply_write(&state.db, &state.settings, write).await {
        Ok(WriteOutcome::Applied) => {
            state.registry.broadcast(
                &ServerMessage::PixelUpdate {
                    data: PixelUpdateData {
                        x,
                        y,
                        color,
                        nickname: session.nickname.clone(),
                    },
                },
                Audience::All,
            );
        }
        Ok(WriteOutcome::Superseded) => {}
        Err(WriteError::OutOfBounds) => send_error(tx, "Invalid pixel coordinates"),
        Err(WriteError::Cooldown) => {
            send_error(tx, "You can only color a pixel at a set time.")
        }
        Err(WriteError::Store(e)) => {
            tracing::error!(error = %e, "Pixel write failed");
            send_error(tx, "Internal server error");
        }
    }
}

fn handle_update_selection(
    state: &AppState,
    session: &Session,
    tx: &ConnectionSender,
    data: serde_json::Value,
) {
    let req: SelectionWrite = match serde_json::from_value(data) {
        Ok(req) => req,
        Err(_) => {
            send_error(tx, "Invalid selection payload");
            return;
        }
    };
    if session.actor_id.is_none() {
        send_error(tx, "No actor identity for this connection");
        return;
    }
    if let Some(position) = req.position {
        if !state.settings.in_bounds(position.x, position.y) {
            send_error(tx, "Invalid selection coordinates");
            return;
        }
    }

    state.registry.update_selection(&session.nickname, req.position);
}

async fn handle_get_field_state(state: &AppState, tx: &ConnectionSender) {
    match mutation::full_field_snapshot(&state.db, &state.registry, &state.settings).await {
        Ok(snapshot) => send(tx, &snapshot),
        Err(e) => {
            tracing::error!(error = %e, "Field snapshot failed");
            send_error(tx, "Internal server error");
        }
    }
}

async fn handle_pixel_info(state: &AppState, tx: &ConnectionSender, data: serde_json::Value) {
    let req: PixelQuery = match serde_json::from_value(data) {
        Ok(req) => req,
        Err(_) => {
            send_error(tx, "Invalid pixel query");
            return;
        }
    };

    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<PixelInfoData>, StoreError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let Some(pixel) = canvas::get_one(&conn, req.x, req.y).map_err(StoreError::from)? else {
            return Ok(None);
        };
        let nickname = identity::owner_nickname(&conn, &pixel.user_id).map_err(StoreError::from)?;
        Ok(Some(PixelInfoData {
            x: pixel.x,
            y: pixel.y,
            color: pixel.color,
            user_id: Some(pixel.user_id),
            nickname,
        }))
    })
    .await
    .map_err(|_| StoreError::Join);

    match result {
        Ok(Ok(Some(info))) => send(tx, &ServerMessage::PixelInfoUpdate { data: info }),
        Ok(Ok(None)) => send_error(tx, "There is no pixel at this position"),
        Ok(Err(e)) | Err(e) => {
            tracing::error!(error = %e, "Pixel info lookup failed");
            send_error(tx, "Internal server error");
        }
    }
}

async fn handle_toggle_ban(state: &AppState, tx: &ConnectionSender, data: serde_json::Value) {
    let req: BanToggle = match serde_json::from_value(data) {
        Ok(req) => req,
        Err(_) => {
            send_error(tx, "Invalid ban payload");
            return;
        }
    };

    let db = state.db.clone();
    let user_id = req.user_id.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<bool>, StoreError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        identity::toggle_ban(&conn, &user_id).map_err(StoreError::from)
    })
    .await
    .map_err(|_| StoreError::Join);

    match result {
        Ok(Ok(Some(banned))) => {
            if banned {
                state
                    .registry
                    .force_disconnect_actor(&req.user_id, CLOSE_FORBIDDEN, "Banned");
            }
            tracing::info!(user_id = %req.user_id, banned, "Ban toggled");
            send(
                tx,
                &ServerMessage::Success {
                    data: "User ban toggled".to_string(),
                },
            );
        }
        Ok(Ok(None)) => send_error(tx, "User not found"),
        Ok(Err(e)) | Err(e) => {
            tracing::error!(error = %e, "Ban toggle failed");
            send_error(tx, "Internal server error");
        }
    }
}

fn handle_update_cooldown(state: &AppState, tx: &ConnectionSender, data: serde_json::Value) {
    let secs: u64 = match serde_json::from_value(data) {
        Ok(secs) => secs,
        Err(_) => {
            send_error(tx, "Invalid cooldown payload");
            return;
        }
    };

    state.settings.set_cooldown_secs(secs);
    tracing::info!(cooldown_secs = secs, "Cooldown window updated");
    state
        .registry
        .broadcast(&ServerMessage::CooldownUpdate { data: secs }, Audience::All);
}

async fn handle_reset_game(
    state: &AppState,
    tx: &ConnectionSender,
    data: serde_json::Value,
) -> Dispatch {
    let (width, height): (u32, u32) = match serde_json::from_value(data) {
        Ok(size) => size,
        Err(_) => {
            send_error(tx, "Invalid field size");
            return Dispatch::Continue;
        }
    };
    if width == 0 || height == 0 {
        send_error(tx, "Invalid field size");
        return Dispatch::Continue;
    }

    // Queue the acknowledgment before the close frame lands.
    send(
        tx,
        &ServerMessage::Success {
            data: "Game reset".to_string(),
        },
    );

    if let Err(e) = mutation::reset(&state.db, &state.settings, width, height).await {
        tracing::error!(error = %e, "Game reset failed");
        send_error(tx, "Internal server error");
        return Dispatch::Continue;
    }

    state.registry.shutdown_all();
    Dispatch::Shutdown
}
