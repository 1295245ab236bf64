/// Database row types. These correspond 1:1 to the SQLite schema
/// defined in migrations.rs.

/// Actor record in the users table.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub nickname: String,
    pub is_banned: bool,
    /// Unix milliseconds of the last accepted (non-bypass) cell write.
    pub last_write_at: Option<i64>,
}

/// Administrator record. Resolved in-session only via signed tokens;
/// the credential hash is consumed by out-of-core login tooling.
#[derive(Debug, Clone)]
pub struct Admin {
    pub id: String,
    pub username: String,
    pub credential_hash: String,
}

/// One cell of the canvas, keyed by (x, y).
#[derive(Debug, Clone)]
pub struct Pixel {
    pub x: i64,
    pub y: i64,
    pub color: String,
    pub user_id: String,
    /// Unix milliseconds; the stored row always carries the maximum
    /// write_time ever submitted for this cell.
    pub write_time: i64,
}
