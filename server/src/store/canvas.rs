//! Canvas Store: durable mapping from cell coordinate to
//! (color, owner, write-time), plus per-actor write-history bookkeeping.
//!
//! All functions are synchronous and take a locked connection; async
//! callers go through tokio::task::spawn_blocking (see canvas::mutation).

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::Pixel;

/// Result of an upsert attempt against a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The write landed; the cell now holds this value.
    Applied,
    /// A write with a greater-or-equal write_time already holds the
    /// cell; the incoming value was discarded.
    Superseded,
}

/// One cell joined with its owner's display name, as shipped in
/// field_state snapshots. The owner may be an actor or an administrator.
#[derive(Debug, Clone)]
pub struct OwnedPixel {
    pub x: i64,
    pub y: i64,
    pub color: String,
    pub nickname: String,
}

/// Atomic last-write-wins upsert. The WHERE clause on the conflict arm
/// makes the comparison and the write a single statement: an incoming
/// value with write_time <= the stored one changes nothing.
pub fn upsert_if_newer(
    conn: &Connection,
    x: i64,
    y: i64,
    color: &str,
    owner: &str,
    write_time: i64,
) -> rusqlite::Result<UpsertOutcome> {
    let changed = conn.execute(
        "INSERT INTO pixels (x, y, color, user_id, write_time) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (x, y) DO UPDATE SET
             color = excluded.color,
             user_id = excluded.user_id,
             write_time = excluded.write_time
         WHERE excluded.write_time > pixels.write_time",
        params![x, y, color, owner, write_time],
    )?;

    if changed == 1 {
        Ok(UpsertOutcome::Applied)
    } else {
        Ok(UpsertOutcome::Superseded)
    }
}

/// Every cell with its owner's name, for field_state snapshots.
pub fn get_all(conn: &Connection) -> rusqlite::Result<Vec<OwnedPixel>> {
    let mut stmt = conn.prepare(
        "SELECT p.x, p.y, p.color, COALESCE(u.nickname, a.username, '') AS nickname
         FROM pixels p
         LEFT JOIN users u ON u.id = p.user_id
         LEFT JOIN admins a ON a.id = p.user_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(OwnedPixel {
            x: row.get(0)?,
            y: row.get(1)?,
            color: row.get(2)?,
            nickname: row.get(3)?,
        })
    })?;
    rows.collect()
}

/// One cell with its raw owner id, for admin pixel inspection.
pub fn get_one(conn: &Connection, x: i64, y: i64) -> rusqlite::Result<Option<Pixel>> {
    conn.query_row(
        "SELECT x, y, color, user_id, write_time FROM pixels WHERE x = ?1 AND y = ?2",
        params![x, y],
        |row| {
            Ok(Pixel {
                x: row.get(0)?,
                y: row.get(1)?,
                color: row.get(2)?,
                user_id: row.get(3)?,
                write_time: row.get(4)?,
            })
        },
    )
    .optional()
}

/// The actor's last accepted write time (unix millis), if any.
pub fn actor_last_write(conn: &Connection, actor_id: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT last_write_at FROM users WHERE id = ?1",
        [actor_id],
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map(|v| v.flatten())
}

pub fn set_actor_last_write(
    conn: &Connection,
    actor_id: &str,
    write_time: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET last_write_at = ?1 WHERE id = ?2",
        params![write_time, actor_id],
    )?;
    Ok(())
}

/// Full-game-reset support: drop every cell and every actor's write
/// history. Actor records themselves survive.
pub fn clear_field(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM pixels", [])?;
    conn.execute("UPDATE users SET last_write_at = NULL", [])?;
    Ok(())
}
