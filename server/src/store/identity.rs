//! Identity Store: actor and administrator records.
//!
//! Display-name uniqueness is enforced by the schema; create and rename
//! report a collision instead of erroring so the Session Protocol can
//! turn it into a NameConflict close.

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::models::{Admin, User};
use crate::db::DbPool;

pub fn user_by_id(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, nickname, is_banned, last_write_at FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                nickname: row.get(1)?,
                is_banned: row.get(2)?,
                last_write_at: row.get(3)?,
            })
        },
    )
    .optional()
}

/// Create a new actor with the given display name. Returns None when the
/// name is already taken (the insert is a no-op in that case, so exactly
/// one of two concurrent creations with the same name wins).
pub fn create_user(conn: &Connection, nickname: &str) -> rusqlite::Result<Option<String>> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    let changed = conn.execute(
        "INSERT INTO users (id, nickname, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (nickname) DO NOTHING",
        params![id, nickname, now],
    )?;

    Ok(if changed == 1 { Some(id) } else { None })
}

/// Rename an actor. Returns false on a uniqueness collision; the record
/// is left unchanged in that case.
pub fn rename_user(conn: &Connection, user_id: &str, nickname: &str) -> rusqlite::Result<bool> {
    match conn.execute(
        "UPDATE users SET nickname = ?1 WHERE id = ?2",
        params![nickname, user_id],
    ) {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Flip an actor's banned flag. Returns the new state, or None for an
/// unknown id.
pub fn toggle_ban(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<bool>> {
    let changed = conn.execute(
        "UPDATE users SET is_banned = NOT is_banned WHERE id = ?1",
        [user_id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    conn.query_row(
        "SELECT is_banned FROM users WHERE id = ?1",
        [user_id],
        |row| row.get::<_, bool>(0),
    )
    .optional()
}

pub fn admin_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<Admin>> {
    conn.query_row(
        "SELECT id, username, credential_hash FROM admins WHERE username = ?1",
        [username],
        |row| {
            Ok(Admin {
                id: row.get(0)?,
                username: row.get(1)?,
                credential_hash: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Display name for a cell owner, whichever table it lives in.
pub fn owner_nickname(conn: &Connection, owner_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT nickname FROM users WHERE id = ?1
         UNION ALL
         SELECT username FROM admins WHERE id = ?1",
        [owner_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

/// SHA-256 hex digest of an admin credential for storage comparison.
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn create_admin(conn: &Connection, username: &str, credential: &str) -> rusqlite::Result<String> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO admins (id, username, credential_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, username, hash_credential(credential), now],
    )?;
    Ok(id)
}

/// First boot: if no administrator exists yet, create one with a random
/// credential and return it so main can log it exactly once.
pub fn ensure_bootstrap_admin(db: &DbPool) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let conn = db.lock().map_err(|_| "DB lock poisoned")?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(None);
    }

    let credential = hex::encode(rand::random::<[u8; 16]>());
    create_admin(&conn, "admin", &credential)?;
    Ok(Some(credential))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn create_then_lookup_roundtrip() {
        let db = db::init_db_in_memory().unwrap();
        let conn = db.lock().unwrap();

        let id = create_user(&conn, "alice").unwrap().expect("created");
        let user = user_by_id(&conn, &id).unwrap().expect("found");
        assert_eq!(user.nickname, "alice");
        assert!(!user.is_banned);
        assert_eq!(user.last_write_at, None);
    }

    #[test]
    fn duplicate_nickname_yields_exactly_one_winner() {
        let db = db::init_db_in_memory().unwrap();
        let conn = db.lock().unwrap();

        assert!(create_user(&conn, "bob").unwrap().is_some());
        assert!(create_user(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn rename_collision_leaves_record_unchanged() {
        let db = db::init_db_in_memory().unwrap();
        let conn = db.lock().unwrap();

        let id_a = create_user(&conn, "alice").unwrap().unwrap();
        create_user(&conn, "bob").unwrap().unwrap();

        assert!(!rename_user(&conn, &id_a, "bob").unwrap());
        let user = user_by_id(&conn, &id_a).unwrap().unwrap();
        assert_eq!(user.nickname, "alice");

        assert!(rename_user(&conn, &id_a, "carol").unwrap());
        let user = user_by_id(&conn, &id_a).unwrap().unwrap();
        assert_eq!(user.nickname, "carol");
    }

    #[test]
    fn toggle_ban_flips_and_reports_state() {
        let db = db::init_db_in_memory().unwrap();
        let conn = db.lock().unwrap();

        let id = create_user(&conn, "mallory").unwrap().unwrap();
        assert_eq!(toggle_ban(&conn, &id).unwrap(), Some(true));
        assert_eq!(toggle_ban(&conn, &id).unwrap(), Some(false));
        assert_eq!(toggle_ban(&conn, "missing").unwrap(), None);
    }
}
