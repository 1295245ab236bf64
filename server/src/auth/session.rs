//! Session Protocol: turn a connection's first inbound frame into a
//! resolved identity and role, or a terminal failure, before the
//! connection is admitted to any other traffic.

use crate::auth::jwt;
use crate::errors::{HandshakeError, StoreError};
use crate::state::AppState;
use crate::store::identity;
use crate::ws::protocol::{Inbound, LoginData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Observer,
    Administrator,
}

/// A successfully authenticated connection, not yet admitted.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    /// Actor id for observers; None for administrators.
    pub actor_id: Option<String>,
    /// Administrator record id; None for observers.
    pub admin_id: Option<String>,
    pub nickname: String,
    /// Set when this login minted a new actor. The id goes back to the
    /// client before normal traffic begins.
    pub minted_id: Option<String>,
}

impl Session {
    /// The id cell writes are attributed to.
    pub fn owner_id(&self) -> Option<&str> {
        self.actor_id.as_deref().or(self.admin_id.as_deref())
    }
}

/// Authenticate the first inbound message. No registry admission happens
/// here — that is the caller's job after a successful result.
pub async fn authenticate(state: &AppState, first_frame: &str) -> Result<Session, HandshakeError> {
    let inbound: Inbound = serde_json::from_str(first_frame)
        .map_err(|_| HandshakeError::Protocol("Malformed login message".to_string()))?;

    match inbound.kind.as_str() {
        "login" => {
            let data: LoginData = serde_json::from_value(inbound.data)
                .map_err(|_| HandshakeError::Protocol("Invalid login payload".to_string()))?;
            if data.nickname.is_empty() {
                return Err(HandshakeError::Protocol("Nickname is required".to_string()));
            }
            login_actor(state, data).await
        }
        "login_admin" => {
            let token: String = serde_json::from_value(inbound.data)
                .map_err(|_| HandshakeError::Protocol("Invalid login payload".to_string()))?;
            login_admin(state, token).await
        }
        _ => Err(HandshakeError::Protocol(
            "Unsupported login type".to_string(),
        )),
    }
}

async fn login_actor(state: &AppState, data: LoginData) -> Result<Session, HandshakeError> {
    let db = state.db.clone();

    tokio::task::spawn_blocking(move || -> Result<Session, HandshakeError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;

        match data.user_id {
            Some(user_id) => {
                let user = identity::user_by_id(&conn, &user_id)
                    .map_err(StoreError::from)?
                    .ok_or(HandshakeError::NotFound)?;

                if user.nickname != data.nickname {
                    let renamed = identity::rename_user(&conn, &user_id, &data.nickname)
                        .map_err(StoreError::from)?;
                    if !renamed {
                        return Err(HandshakeError::NameConflict);
                    }
                }

                if user.is_banned {
                    return Err(HandshakeError::Forbidden);
                }

                Ok(Session {
                    role: Role::Observer,
                    actor_id: Some(user_id),
                    admin_id: None,
                    nickname: data.nickname,
                    minted_id: None,
                })
            }
            None => {
                let minted = identity::create_user(&conn, &data.nickname)
                    .map_err(StoreError::from)?
                    .ok_or(HandshakeError::NameConflict)?;

                Ok(Session {
                    role: Role::Observer,
                    actor_id: Some(minted.clone()),
                    admin_id: None,
                    nickname: data.nickname,
                    minted_id: Some(minted),
                })
            }
        }
    })
    .await
    .map_err(|_| HandshakeError::Internal(StoreError::Join))?
}

async fn login_admin(state: &AppState, token: String) -> Result<Session, HandshakeError> {
    let claims = jwt::validate_admin_token(&state.jwt_secret, &token)
        .map_err(|_| HandshakeError::Unauthorized)?;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || -> Result<Session, HandshakeError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        let admin = identity::admin_by_username(&conn, &claims.sub)
            .map_err(StoreError::from)?
            .ok_or(HandshakeError::Unauthorized)?;

        Ok(Session {
            role: Role::Administrator,
            actor_id: None,
            admin_id: Some(admin.id),
            nickname: admin.username,
            minted_id: None,
        })
    })
    .await
    .map_err(|_| HandshakeError::Internal(StoreError::Join))?
}
