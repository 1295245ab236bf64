//! Canvas Mutation Service: validates and applies cell writes under the
//! cooldown and last-write-wins rules, and produces full-field snapshots.
//!
//! The service decides *whether* a write landed; announcing it is the
//! router's job, driven by the returned outcome.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::config::RuntimeSettings;
use crate::db::DbPool;
use crate::errors::{StoreError, WriteError};
use crate::store::canvas;
use crate::ws::protocol::{FieldStateData, PixelEntry, Position, ServerMessage};
use crate::ws::registry::ConnectionRegistry;

pub use crate::store::canvas::UpsertOutcome as WriteOutcome;

/// Color painted by an admin write that supplies none.
pub const ERASE_COLOR: &str = "#FFFFFF";

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Server-assigned write time: wall-clock unix millis, nudged forward
/// where needed so stamps are strictly monotonic process-wide. Two
/// writes to the same cell therefore never tie.
pub fn next_write_time() -> i64 {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(if now > last { now } else { last + 1 })
        })
        .unwrap_or(now);
    if now > prev {
        now
    } else {
        prev + 1
    }
}

/// One validated-and-timestamped cell write. `claimed_time` is assigned
/// by the server at request receipt; clients never supply it.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub x: i64,
    pub y: i64,
    pub color: String,
    pub owner: String,
    pub claimed_time: i64,
    /// Administrator writes skip the cooldown check and do not consume
    /// the owner's own cooldown.
    pub bypass_cooldown: bool,
}

/// Bounds check, cooldown check, atomic upsert, write-history update —
/// in that order. OutOfBounds and Cooldown never touch a cell.
pub async fn apply_write(
    db: &DbPool,
    settings: &RuntimeSettings,
    req: WriteRequest,
) -> Result<WriteOutcome, WriteError> {
    if !settings.in_bounds(req.x, req.y) {
        return Err(WriteError::OutOfBounds);
    }

    let cooldown_ms = settings.cooldown_secs().saturating_mul(1000) as i64;
    let db = db.clone();

    tokio::task::spawn_blocking(move || -> Result<WriteOutcome, WriteError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;

        if !req.bypass_cooldown {
            if let Some(last) = canvas::actor_last_write(&conn, &req.owner).map_err(StoreError::from)? {
                if req.claimed_time - last < cooldown_ms {
                    return Err(WriteError::Cooldown);
                }
            }
        }

        let outcome =
            canvas::upsert_if_newer(&conn, req.x, req.y, &req.color, &req.owner, req.claimed_time)
                .map_err(StoreError::from)?;

        if !req.bypass_cooldown {
            canvas::set_actor_last_write(&conn, &req.owner, req.claimed_time)
                .map_err(StoreError::from)?;
        }

        Ok(outcome)
    })
    .await
    .map_err(|_| WriteError::Store(StoreError::Join))?
}

/// Everything a client needs to resynchronize: all cells, the live
/// selection overlay, the current cooldown window and grid dimensions.
pub async fn full_field_snapshot(
    db: &DbPool,
    registry: &ConnectionRegistry,
    settings: &RuntimeSettings,
) -> Result<ServerMessage, StoreError> {
    let db = db.clone();
    let pixels = tokio::task::spawn_blocking(move || -> Result<Vec<canvas::OwnedPixel>, StoreError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        canvas::get_all(&conn).map_err(StoreError::from)
    })
    .await
    .map_err(|_| StoreError::Join)??;

    let pixels = pixels
        .into_iter()
        .map(|p| PixelEntry {
            position: Position { x: p.x, y: p.y },
            color: p.color,
            nickname: p.nickname,
        })
        .collect();

    Ok(ServerMessage::FieldState {
        cooldown: settings.cooldown_secs(),
        size: settings.field_size(),
        data: FieldStateData {
            pixels,
            selections: registry.selections_snapshot(),
        },
    })
}

/// Full game reset: drop every cell and every actor's write history and
/// switch to the new dimensions. The caller follows with
/// `registry.shutdown_all()` so every client re-authenticates against
/// the new field.
pub async fn reset(
    db: &DbPool,
    settings: &RuntimeSettings,
    width: u32,
    height: u32,
) -> Result<(), StoreError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let conn = db.lock().map_err(|_| StoreError::Lock)?;
        canvas::clear_field(&conn).map_err(StoreError::from)
    })
    .await
    .map_err(|_| StoreError::Join)??;

    settings.set_field_size(width, height);
    tracing::info!(width, height, "Game field reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::identity;

    fn setup() -> (DbPool, RuntimeSettings, String) {
        let db = db::init_db_in_memory().unwrap();
        let actor_id = {
            let conn = db.lock().unwrap();
            identity::create_user(&conn, "alice").unwrap().unwrap()
        };
        (db, RuntimeSettings::new(300, 64, 64), actor_id)
    }

    fn write(actor: &str, x: i64, y: i64, t: i64, bypass: bool) -> WriteRequest {
        WriteRequest {
            x,
            y,
            color: "#FF0000".to_string(),
            owner: actor.to_string(),
            claimed_time: t,
            bypass_cooldown: bypass,
        }
    }

    #[test]
    fn write_times_are_strictly_monotonic() {
        let mut prev = next_write_time();
        for _ in 0..1000 {
            let next = next_write_time();
            assert!(next > prev);
            prev = next;
        }
    }

    #[tokio::test]
    async fn out_of_bounds_never_touches_the_store() {
        let (db, settings, actor) = setup();

        for (x, y) in [(-1, 0), (0, -1), (64, 0), (0, 64)] {
            let err = apply_write(&db, &settings, write(&actor, x, y, 1000, false))
                .await
                .unwrap_err();
            assert!(matches!(err, WriteError::OutOfBounds));
        }

        let conn = db.lock().unwrap();
        assert!(canvas::get_all(&conn).unwrap().is_empty());
        assert_eq!(canvas::actor_last_write(&conn, &actor).unwrap(), None);
    }

    #[tokio::test]
    async fn second_write_inside_window_is_rejected_without_side_effects() {
        let (db, settings, actor) = setup();

        let out = apply_write(&db, &settings, write(&actor, 5, 5, 10_000, false))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);

        let mut req = write(&actor, 5, 5, 10_000 + 299_999, false);
        req.color = "#00FF00".to_string();
        let err = apply_write(&db, &settings, req).await.unwrap_err();
        assert!(matches!(err, WriteError::Cooldown));

        let conn = db.lock().unwrap();
        let cell = canvas::get_one(&conn, 5, 5).unwrap().unwrap();
        assert_eq!(cell.color, "#FF0000");
        assert_eq!(canvas::actor_last_write(&conn, &actor).unwrap(), Some(10_000));
    }

    #[tokio::test]
    async fn write_exactly_at_window_boundary_is_accepted() {
        let (db, settings, actor) = setup();

        apply_write(&db, &settings, write(&actor, 1, 1, 10_000, false))
            .await
            .unwrap();
        let out = apply_write(&db, &settings, write(&actor, 2, 2, 10_000 + 300_000, false))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);
    }

    #[tokio::test]
    async fn bypass_skips_cooldown_and_leaves_write_history_alone() {
        let (db, settings, actor) = setup();
        let admin_id = {
            let conn = db.lock().unwrap();
            identity::create_admin(&conn, "root", "hunter2").unwrap()
        };

        apply_write(&db, &settings, write(&actor, 5, 5, 10_000, false))
            .await
            .unwrap();

        // Bypass write lands inside the actor's window, twice in a row.
        let out = apply_write(&db, &settings, write(&admin_id, 5, 5, 10_001, true))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);
        let out = apply_write(&db, &settings, write(&admin_id, 5, 5, 10_002, true))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);

        let conn = db.lock().unwrap();
        // The actor's own cooldown clock is untouched.
        assert_eq!(canvas::actor_last_write(&conn, &actor).unwrap(), Some(10_000));
        let cell = canvas::get_one(&conn, 5, 5).unwrap().unwrap();
        assert_eq!(cell.user_id, admin_id);
    }

    #[tokio::test]
    async fn cooldown_change_applies_to_subsequent_writes() {
        let (db, settings, actor) = setup();

        apply_write(&db, &settings, write(&actor, 1, 1, 10_000, false))
            .await
            .unwrap();
        settings.set_cooldown_secs(1);

        let out = apply_write(&db, &settings, write(&actor, 2, 2, 11_000, false))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);
    }

    #[tokio::test]
    async fn reset_clears_cells_history_and_resizes() {
        let (db, settings, actor) = setup();

        apply_write(&db, &settings, write(&actor, 5, 5, 10_000, false))
            .await
            .unwrap();

        reset(&db, &settings, 32, 32).await.unwrap();

        assert_eq!(settings.field_size(), (32, 32));
        let conn = db.lock().unwrap();
        assert!(canvas::get_all(&conn).unwrap().is_empty());
        assert_eq!(canvas::actor_last_write(&conn, &actor).unwrap(), None);
    }
}
