//! Table definitions and the layout check.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};

const TABLES: &str = "
CREATE TABLE IF NOT EXISTS files (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    path  TEXT NOT NULL UNIQUE,
    qhash BLOB NOT NULL,
    size  INTEGER,
    type  INTEGER NOT NULL DEFAULT 0,
    hash  BLOB
);
CREATE INDEX IF NOT EXISTS idx_files_size  ON files(size);
CREATE INDEX IF NOT EXISTS idx_files_qhash ON files(qhash);
CREATE INDEX IF NOT EXISTS idx_files_hash  ON files(hash);

CREATE TABLE IF NOT EXISTS img (
    id        INTEGER PRIMARY KEY,
    height    INTEGER NOT NULL DEFAULT 0,
    width     INTEGER NOT NULL DEFAULT 0,
    r         INTEGER NOT NULL DEFAULT 0,
    g         INTEGER NOT NULL DEFAULT 0,
    b         INTEGER NOT NULL DEFAULT 0,
    signature BLOB
);

CREATE TABLE IF NOT EXISTS vid (
    id     INTEGER PRIMARY KEY,
    height INTEGER NOT NULL DEFAULT 0,
    width  INTEGER NOT NULL DEFAULT 0,
    length INTEGER NOT NULL DEFAULT 0,
    sigrgb BLOB
);

CREATE TABLE IF NOT EXISTS known_diff (
    f1 INTEGER NOT NULL,
    f2 INTEGER NOT NULL,
    CHECK (f1 < f2),
    UNIQUE (f1, f2)
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const DROP: &str = "
DROP TABLE IF EXISTS known_diff;
DROP TABLE IF EXISTS vid;
DROP TABLE IF EXISTS img;
DROP TABLE IF EXISTS files;
DROP TABLE IF EXISTS meta;
";

/// Create all tables if they do not exist yet.
pub(crate) fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(TABLES)?;
    Ok(())
}

/// Drop every table and recreate them empty.
pub(crate) fn recreate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(DROP)?;
    initialize(conn)
}

/// Settings that change how stored values are computed. Opening a store
/// with a different layout than the one it was created with is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub block_size: u64,
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub video_sampling: String,
}

impl StoreLayout {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            block_size: config.hashing.block_size,
            grid_rows: config.image.grid_rows,
            grid_cols: config.image.grid_cols,
            video_sampling: format!(
                "{}x{}@{}/{}",
                config.video.frame_width,
                config.video.frame_height,
                config.video.fps,
                config.video.window
            ),
        }
    }

    fn entries(&self) -> [(&'static str, String); 3] {
        [
            ("block_size", self.block_size.to_string()),
            ("image_grid", format!("{}x{}", self.grid_rows, self.grid_cols)),
            ("video_sampling", self.video_sampling.clone()),
        ]
    }
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default())
    }
}

/// Record the layout on first use; afterwards verify it matches.
pub(crate) fn check_layout(conn: &Connection, layout: &StoreLayout) -> StoreResult<()> {
    for (key, configured) in layout.entries() {
        let stored: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match stored {
            Some(stored) if stored != configured => {
                return Err(StoreError::ConfigMismatch {
                    key: key.to_string(),
                    stored,
                    configured,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                    params![key, configured],
                )?;
            }
        }
    }
    Ok(())
}
