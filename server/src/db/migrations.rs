use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Initial schema

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    nickname TEXT NOT NULL,
    is_banned INTEGER NOT NULL DEFAULT 0,
    last_write_at INTEGER,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_users_nickname ON users(nickname);

CREATE TABLE admins (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    credential_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- No foreign key on user_id: a cell may be owned by an actor or by an
-- administrator (bypass writes), which live in different tables.
CREATE TABLE pixels (
    x INTEGER NOT NULL,
    y INTEGER NOT NULL,
    color TEXT NOT NULL,
    user_id TEXT NOT NULL,
    write_time INTEGER NOT NULL,
    PRIMARY KEY (x, y)
);
",
    )])
}
