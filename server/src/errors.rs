//! Error taxonomy for the session core.
//!
//! Handshake failures are connection-terminating and map 1:1 to
//! WebSocket close codes so a client can tell "retry with a new name"
//! from "banned" from "get a fresh token". Everything after admission
//! is a non-fatal `error` reply to the requester only.

use std::error::Error;
use std::fmt;

/// App-range close codes, one per handshake failure.
pub const CLOSE_PROTOCOL_ERROR: u16 = 4400;
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
pub const CLOSE_FORBIDDEN: u16 = 4403;
pub const CLOSE_NOT_FOUND: u16 = 4404;
pub const CLOSE_NAME_CONFLICT: u16 = 4409;
pub const CLOSE_SERVER_ERROR: u16 = 4500;

/// Standard close codes.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Terminal failure of the pre-admission handshake.
#[derive(Debug)]
pub enum HandshakeError {
    /// Malformed or unexpected first message, or handshake deadline hit.
    Protocol(String),
    /// Bad or expired admin token, or the subject is not an administrator.
    Unauthorized,
    /// The resolved actor is banned.
    Forbidden,
    /// A supplied actor id does not exist.
    NotFound,
    /// The requested display name is already taken.
    NameConflict,
    /// Store access failed mid-handshake.
    Internal(StoreError),
}

impl HandshakeError {
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::Protocol(_) => CLOSE_PROTOCOL_ERROR,
            HandshakeError::Unauthorized => CLOSE_UNAUTHORIZED,
            HandshakeError::Forbidden => CLOSE_FORBIDDEN,
            HandshakeError::NotFound => CLOSE_NOT_FOUND,
            HandshakeError::NameConflict => CLOSE_NAME_CONFLICT,
            HandshakeError::Internal(_) => CLOSE_SERVER_ERROR,
        }
    }

    /// Message sent to the client in an `error` frame before the close.
    pub fn client_message(&self) -> String {
        match self {
            HandshakeError::Protocol(msg) => msg.clone(),
            HandshakeError::Unauthorized => "Invalid or expired token".to_string(),
            HandshakeError::Forbidden => "User is banned".to_string(),
            HandshakeError::NotFound => "User not found".to_string(),
            HandshakeError::NameConflict => "Nickname already exists".to_string(),
            HandshakeError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            HandshakeError::Unauthorized => write!(f, "unauthorized"),
            HandshakeError::Forbidden => write!(f, "forbidden"),
            HandshakeError::NotFound => write!(f, "not found"),
            HandshakeError::NameConflict => write!(f, "name conflict"),
            HandshakeError::Internal(e) => write!(f, "internal: {}", e),
        }
    }
}

impl Error for HandshakeError {}

impl From<StoreError> for HandshakeError {
    fn from(e: StoreError) -> Self {
        HandshakeError::Internal(e)
    }
}

/// Rejection of a cell write. OutOfBounds and Cooldown are reported to
/// the requester and never broadcast; Store is surfaced as a generic
/// error at the handler boundary.
#[derive(Debug)]
pub enum WriteError {
    OutOfBounds,
    Cooldown,
    Store(StoreError),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::OutOfBounds => write!(f, "coordinates out of bounds"),
            WriteError::Cooldown => write!(f, "cooldown window not elapsed"),
            WriteError::Store(e) => write!(f, "store: {}", e),
        }
    }
}

impl Error for WriteError {}

impl From<StoreError> for WriteError {
    fn from(e: StoreError) -> Self {
        WriteError::Store(e)
    }
}

/// Failure talking to the SQLite store.
#[derive(Debug)]
pub enum StoreError {
    /// The connection mutex was poisoned.
    Lock,
    /// The blocking task was cancelled or panicked.
    Join,
    Sqlite(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Lock => write!(f, "database lock poisoned"),
            StoreError::Join => write!(f, "blocking task failed"),
            StoreError::Sqlite(e) => write!(f, "sqlite: {}", e),
        }
    }
}

impl Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}
