//! Wire messages: JSON objects with a `type` string and a `data` payload,
//! framed as text over the WebSocket.
//!
//! Inbound frames parse to a raw envelope first so the router can tell
//! "unknown type" apart from "known type, bad payload shape"; each
//! handler then validates its own payload. Outbound messages are a
//! single tagged enum serialized once per broadcast.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel. Cloned into the
/// registry so any part of the system can push frames to this client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

/// Raw inbound envelope. `data` stays opaque until the router knows the
/// type; absent `data` becomes Null so payload-less requests parse.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// --- Per-type inbound payloads ---

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub nickname: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PixelWrite {
    pub x: i64,
    pub y: i64,
    pub color: String,
}

/// Admin variant: a missing color paints the erase color.
#[derive(Debug, Deserialize)]
pub struct AdminPixelWrite {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub color: Option<String>,
}

/// `position: null` (or absent) clears the sender's selection.
#[derive(Debug, Deserialize)]
pub struct SelectionWrite {
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize)]
pub struct PixelQuery {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Deserialize)]
pub struct BanToggle {
    pub user_id: String,
}

// --- Outbound messages ---

#[derive(Debug, Clone, Serialize)]
pub struct PixelEntry {
    pub position: Position,
    pub color: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionEntry {
    pub nickname: String,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldStateData {
    pub pixels: Vec<PixelEntry>,
    pub selections: Vec<SelectionEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixelUpdateData {
    pub x: i64,
    pub y: i64,
    pub color: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionUpdateData {
    pub nickname: String,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineCountData {
    pub online: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfoData {
    pub nickname: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixelInfoData {
    pub x: i64,
    pub y: i64,
    pub color: String,
    pub user_id: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Freshly minted actor id, sent before the session is open.
    UserId { data: String },
    FieldState {
        cooldown: u64,
        size: (u32, u32),
        data: FieldStateData,
    },
    PixelUpdate { data: PixelUpdateData },
    SelectionUpdate { data: SelectionUpdateData },
    OnlineCountUpdate { data: OnlineCountData },
    /// Administrators only: the live observer roster.
    UsersInfoUpdate { data: Vec<UserInfoData> },
    CooldownUpdate { data: u64 },
    PixelInfoUpdate { data: PixelInfoData },
    Error { message: String },
    Success { data: String },
}

impl ServerMessage {
    /// Serialize to a text frame. None only if serde_json fails, which
    /// these types cannot trigger; the frame is simply skipped then.
    pub fn encode(&self) -> Option<Message> {
        serde_json::to_string(self).ok().map(|s| Message::Text(s.into()))
    }
}

/// Best-effort send to one connection; a dead channel is the writer's
/// problem, not the caller's.
pub fn send(tx: &ConnectionSender, message: &ServerMessage) {
    if let Some(frame) = message.encode() {
        let _ = tx.send(frame);
    }
}

pub fn send_error(tx: &ConnectionSender, message: &str) {
    send(
        tx,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    );
}
