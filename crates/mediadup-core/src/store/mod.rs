//! SQLite-backed metadata store.
//!
//! Four tables: `files` (one row per tracked path), `img` and `vid` (one
//! attribute row per image / video, keyed by the file id) and `known_diff`
//! (unordered pairs of file ids the user declared distinct). A small `meta`
//! table pins the hashing and fingerprint layout the store was built with.
//!
//! Every multi-row write runs in a single transaction: a batch is either
//! fully visible or not at all.

pub(crate) mod rows;
mod schema;

pub use schema::StoreLayout;

use std::collections::HashSet;
use std::path::Path;

use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::grouping::{GroupKey, KnownDifferences};
use crate::media::{
    ColorCurve, FileEntry, FileId, FrameCache, ImageAttributes, MediaAttributes, MediaKind,
    MediaRecord, Signature, VideoAttributes,
};

use rows::{
    entry_from_row, image_from_row, video_from_row, AttributeRow, ImageRow, RawEntry, RecordRows,
    VideoRow, ENTRY_COLUMNS,
};

/// Explicit answer required before [`MetadataStore::reset`] wipes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetConfirmation {
    Confirmed,
    Refused,
}

impl ResetConfirmation {
    /// Interpret a typed answer: only "y" or "yes" (any case) confirms.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => ResetConfirmation::Confirmed,
            _ => ResetConfirmation::Refused,
        }
    }
}

impl From<bool> for ResetConfirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            ResetConfirmation::Confirmed
        } else {
            ResetConfirmation::Refused
        }
    }
}

/// What [`MetadataStore::check_integrity`] found and repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Attribute rows whose file row no longer exists (deleted)
    pub orphan_attribute_rows: usize,
    /// Attribute rows in the table of the wrong kind (deleted)
    pub mismatched_attribute_rows: usize,
    /// Media files without an attribute row (empty row inserted)
    pub missing_attribute_rows: usize,
    /// Known-difference pairs referencing missing files (deleted)
    pub dangling_known_differences: usize,
    /// Files whose kind code is not recognized (reported only)
    pub unknown_kind_rows: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Durable index of tracked files.
pub struct MetadataStore {
    conn: Connection,
    layout: StoreLayout,
    frame_cache: Option<FrameCache>,
}

impl MetadataStore {
    /// Open or create a store at `path` in WAL mode.
    ///
    /// Fails with [`StoreError::ConfigMismatch`] when the file was created
    /// with a different layout.
    pub fn open(
        path: &Path,
        layout: StoreLayout,
        frame_cache: Option<FrameCache>,
    ) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, layout, frame_cache)
    }

    /// Wipe the store at `path` and start over with `layout`. Unlike
    /// [`open`](Self::open) followed by [`reset`](Self::reset), this works on
    /// a file created with a different layout.
    pub fn recreate(
        path: &Path,
        layout: StoreLayout,
        frame_cache: Option<FrameCache>,
        confirmation: ResetConfirmation,
    ) -> StoreResult<Self> {
        if confirmation != ResetConfirmation::Confirmed {
            return Err(StoreError::ResetNotConfirmed);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let mut store = Self {
            conn,
            layout,
            frame_cache,
        };
        store.reset(confirmation)?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(layout: StoreLayout) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, layout, None)
    }

    fn from_connection(
        conn: Connection,
        layout: StoreLayout,
        frame_cache: Option<FrameCache>,
    ) -> StoreResult<Self> {
        schema::initialize(&conn)?;
        schema::check_layout(&conn, &layout)?;
        Ok(Self {
            conn,
            layout,
            frame_cache,
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn frame_cache(&self) -> Option<&FrameCache> {
        self.frame_cache.as_ref()
    }

    /// Drop and recreate every table and empty the frame cache.
    pub fn reset(&mut self, confirmation: ResetConfirmation) -> StoreResult<()> {
        if confirmation != ResetConfirmation::Confirmed {
            tracing::info!("Reset refused; store left untouched");
            return Err(StoreError::ResetNotConfirmed);
        }
        schema::recreate(&self.conn)?;
        schema::check_layout(&self.conn, &self.layout)?;
        if let Some(cache) = &self.frame_cache {
            cache.clear()?;
        }
        tracing::info!("Metadata store reset");
        Ok(())
    }

    // ── Records ──────────────────────────────────────────────────────

    pub fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Fetch the grouping projection of one path.
    pub fn get_entry(&self, path: &str) -> StoreResult<Option<FileEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM files WHERE path = ?1"),
                params![path],
                entry_from_row,
            )
            .optional()?
            .map(RawEntry::decode)
            .transpose()
    }

    /// Rebuild the full record for `path`, attribute block included.
    pub fn get(&self, path: &str) -> StoreResult<Option<MediaRecord>> {
        let Some(entry) = self.get_entry(path)? else {
            return Ok(None);
        };
        let attributes = self.load_attributes(&entry)?;
        Ok(Some(MediaRecord {
            path: entry.path,
            size: entry.size,
            quick_hash: Some(entry.quick_hash),
            full_hash: entry.full_hash,
            attributes,
        }))
    }

    /// Full records for the given paths; untracked paths are skipped.
    pub fn records(&self, paths: &[String]) -> StoreResult<Vec<MediaRecord>> {
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(record) = self.get(path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn load_attributes(&self, entry: &FileEntry) -> StoreResult<MediaAttributes> {
        let id = entry.id.0;
        match entry.kind {
            MediaKind::NonMedia => Ok(MediaAttributes::NonMedia),
            MediaKind::Image => {
                let row = self
                    .conn
                    .query_row(
                        "SELECT height, width, r, g, b, signature FROM img WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(ImageRow {
                                height: row.get(0)?,
                                width: row.get(1)?,
                                rgb: [row.get(2)?, row.get(3)?, row.get(4)?],
                                signature: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                match row {
                    Some(row) => Ok(MediaAttributes::Image(image_from_row(
                        &entry.path,
                        row,
                        self.layout.grid_rows,
                        self.layout.grid_cols,
                    )?)),
                    None => {
                        tracing::warn!("Image {} has no attribute row", entry.path);
                        Ok(MediaAttributes::Image(ImageAttributes::default()))
                    }
                }
            }
            MediaKind::Video => {
                let row = self
                    .conn
                    .query_row(
                        "SELECT height, width, length, sigrgb FROM vid WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(VideoRow {
                                height: row.get(0)?,
                                width: row.get(1)?,
                                length: row.get(2)?,
                                sigrgb: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                match row {
                    Some(row) => Ok(MediaAttributes::Video(video_from_row(&entry.path, row)?)),
                    None => {
                        tracing::warn!("Video {} has no attribute row", entry.path);
                        Ok(MediaAttributes::Video(VideoAttributes::default()))
                    }
                }
            }
        }
    }

    /// Insert or update one record and its attribute row atomically.
    pub fn upsert(&mut self, record: &MediaRecord) -> StoreResult<FileId> {
        let rows = RecordRows::encode(record)?;
        let tx = self.conn.transaction()?;
        let id = upsert_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(id)
    }

    /// Insert or update many records in one transaction.
    pub fn upsert_many(&mut self, records: &[MediaRecord]) -> StoreResult<usize> {
        let rows: Vec<RecordRows> = records
            .par_iter()
            .map(RecordRows::encode)
            .collect::<StoreResult<_>>()?;
        let tx = self.conn.transaction()?;
        for row in &rows {
            upsert_rows(&tx, row)?;
        }
        tx.commit()?;
        tracing::debug!("Updated {} records", rows.len());
        Ok(rows.len())
    }

    /// Insert records that are not tracked yet.
    ///
    /// Rows are encoded in parallel, then written in one transaction: file
    /// rows first, then image rows, then video rows. Any path that is
    /// already tracked (or repeated within the batch) fails the whole batch
    /// with [`StoreError::DuplicatePath`].
    pub fn insert_many(&mut self, records: &[MediaRecord]) -> StoreResult<usize> {
        let rows: Vec<RecordRows> = records
            .par_iter()
            .map(RecordRows::encode)
            .collect::<StoreResult<_>>()?;

        let mut seen = HashSet::with_capacity(rows.len());
        if let Some(dup) = rows.iter().find(|r| !seen.insert(r.file.path.as_str())) {
            return Err(StoreError::DuplicatePath {
                path: dup.file.path.clone(),
            });
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files (path, qhash, size, type, hash) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in &rows {
                let f = &row.file;
                stmt.execute(params![f.path, f.qhash, f.size, f.kind, f.hash])
                    .map_err(|e| duplicate_or(e, &f.path))?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO img (id, height, width, r, g, b, signature)
                 VALUES ((SELECT id FROM files WHERE path = ?1), ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in &rows {
                if let AttributeRow::Image(i) = &row.attributes {
                    stmt.execute(params![
                        row.file.path,
                        i.height,
                        i.width,
                        i.rgb[0],
                        i.rgb[1],
                        i.rgb[2],
                        i.signature
                    ])?;
                }
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vid (id, height, width, length, sigrgb)
                 VALUES ((SELECT id FROM files WHERE path = ?1), ?2, ?3, ?4, ?5)",
            )?;
            for row in &rows {
                if let AttributeRow::Video(v) = &row.attributes {
                    stmt.execute(params![row.file.path, v.height, v.width, v.length, v.sigrgb])?;
                }
            }
        }
        tx.commit()?;
        tracing::debug!("Inserted {} records", rows.len());
        Ok(rows.len())
    }

    /// Remove one path. Returns `false` if it was not tracked.
    pub fn remove(&mut self, path: &str) -> StoreResult<bool> {
        Ok(self.remove_many(&[path.to_string()])? == 1)
    }

    /// Remove paths with their attribute rows, their known-difference pairs
    /// and any cached frames. Untracked paths are ignored.
    pub fn remove_many(&mut self, paths: &[String]) -> StoreResult<usize> {
        let mut removed_videos = Vec::new();
        let mut removed = 0usize;

        let tx = self.conn.transaction()?;
        {
            let mut find = tx.prepare("SELECT id, type FROM files WHERE path = ?1")?;
            for path in paths {
                let found: Option<(i64, i64)> = find
                    .query_row(params![path], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?;
                let Some((id, kind)) = found else {
                    continue;
                };
                tx.execute("DELETE FROM img WHERE id = ?1", params![id])?;
                tx.execute("DELETE FROM vid WHERE id = ?1", params![id])?;
                tx.execute(
                    "DELETE FROM known_diff WHERE f1 = ?1 OR f2 = ?1",
                    params![id],
                )?;
                tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
                removed += 1;
                if kind == MediaKind::Video.code() {
                    removed_videos.push(path);
                }
            }
        }
        tx.commit()?;

        if let Some(cache) = &self.frame_cache {
            for path in removed_videos {
                cache.remove(Path::new(path))?;
            }
        }
        tracing::debug!("Removed {} records", removed);
        Ok(removed)
    }

    // ── Listing reconciliation ───────────────────────────────────────

    pub fn all_paths(&self) -> StoreResult<Vec<String>> {
        self.string_column("SELECT path FROM files ORDER BY path")
    }

    /// Paths in `listing` that are not tracked yet, in listing order.
    pub fn new_paths(&self, listing: &[String]) -> StoreResult<Vec<String>> {
        let known: HashSet<String> = self.all_paths()?.into_iter().collect();
        let mut seen = HashSet::new();
        Ok(listing
            .iter()
            .filter(|p| !known.contains(p.as_str()) && seen.insert(p.as_str()))
            .cloned()
            .collect())
    }

    /// Tracked paths that no longer appear in `listing`.
    pub fn stale_paths(&self, listing: &[String]) -> StoreResult<Vec<String>> {
        let present: HashSet<&str> = listing.iter().map(String::as_str).collect();
        Ok(self
            .all_paths()?
            .into_iter()
            .filter(|p| !present.contains(p.as_str()))
            .collect())
    }

    /// Tracked paths under `root` that no longer appear in `listing`. Paths
    /// outside `root` are never reported, so a listing of one subtree leaves
    /// the rest of the store alone.
    pub fn stale_paths_under(&self, listing: &[String], root: &Path) -> StoreResult<Vec<String>> {
        Ok(self
            .stale_paths(listing)?
            .into_iter()
            .filter(|p| Path::new(p).starts_with(root))
            .collect())
    }

    /// Paths whose full hash has not been computed.
    pub fn paths_missing_full_hash(&self) -> StoreResult<Vec<String>> {
        self.string_column("SELECT path FROM files WHERE hash IS NULL ORDER BY path")
    }

    /// Images whose grid signature has not been computed.
    pub fn paths_missing_image_signature(&self) -> StoreResult<Vec<String>> {
        self.string_column(
            "SELECT f.path FROM files f LEFT JOIN img i ON i.id = f.id
             WHERE f.type = 1 AND i.signature IS NULL ORDER BY f.path",
        )
    }

    /// Videos whose color curve has not been computed.
    pub fn paths_missing_video_curve(&self) -> StoreResult<Vec<String>> {
        self.string_column(
            "SELECT f.path FROM files f LEFT JOIN vid v ON v.id = f.id
             WHERE f.type = 2 AND v.sigrgb IS NULL ORDER BY f.path",
        )
    }

    fn string_column(&self, sql: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(values)
    }

    // ── Grouping queries ─────────────────────────────────────────────

    /// Every tracked file as a grouping projection.
    pub fn entries(&self) -> StoreResult<Vec<FileEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM files ORDER BY id"))?;
        let raw = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawEntry::decode).collect()
    }

    /// Current projections for the given ids; ids no longer present are
    /// skipped.
    pub fn entries_by_ids(&self, ids: &[FileId]) -> StoreResult<Vec<FileEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM files WHERE id = ?1"))?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(raw) = stmt.query_row(params![id.0], entry_from_row).optional()? {
                entries.push(raw.decode()?);
            }
        }
        Ok(entries)
    }

    /// All files sharing a non-null `key` value with at least one other
    /// file, clustered by value. Computed by the database with a group-by.
    pub fn duplicate_entries(&self, key: GroupKey) -> StoreResult<Vec<Vec<FileEntry>>> {
        let column = key.column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM files WHERE {column} IN (
                 SELECT {column} FROM files WHERE {column} IS NOT NULL
                 GROUP BY {column} HAVING COUNT(*) > 1
             ) ORDER BY {column}, id"
        ))?;
        let raw = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut clusters: Vec<Vec<FileEntry>> = Vec::new();
        for entry in raw.into_iter().map(RawEntry::decode) {
            let entry = entry?;
            match clusters.last_mut() {
                Some(last) if key.value(&last[0]) == key.value(&entry) => last.push(entry),
                _ => clusters.push(vec![entry]),
            }
        }
        Ok(clusters)
    }

    /// Images with a computed signature.
    pub fn image_signatures(&self) -> StoreResult<Vec<(FileEntry, Signature)>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.path, f.size, f.qhash, f.hash, f.type, i.signature
             FROM files f JOIN img i ON i.id = f.id
             WHERE f.type = 1 AND i.signature IS NOT NULL ORDER BY f.id",
        )?;
        let raw = stmt
            .query_map([], |row| Ok((entry_from_row(row)?, row.get::<_, Vec<u8>>(6)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(raw, blob)| {
                let entry = raw.decode()?;
                let signature =
                    Signature::from_bytes(self.layout.grid_rows, self.layout.grid_cols, &blob)
                        .ok_or_else(|| StoreError::MalformedBlob {
                            path: entry.path.clone(),
                            message: format!("signature has {} bytes", blob.len()),
                        })?;
                Ok((entry, signature))
            })
            .collect()
    }

    /// Videos with a computed color curve, with their duration in seconds.
    pub fn video_curves(&self) -> StoreResult<Vec<(FileEntry, u64, ColorCurve)>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.path, f.size, f.qhash, f.hash, f.type, v.length, v.sigrgb
             FROM files f JOIN vid v ON v.id = f.id
             WHERE f.type = 2 AND v.sigrgb IS NOT NULL ORDER BY f.id",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    entry_from_row(row)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Vec<u8>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(raw, length, blob)| {
                let entry = raw.decode()?;
                let curve =
                    ColorCurve::from_bytes(&blob).ok_or_else(|| StoreError::MalformedBlob {
                        path: entry.path.clone(),
                        message: format!("color curve has {} bytes", blob.len()),
                    })?;
                Ok((entry, length.max(0) as u64, curve))
            })
            .collect()
    }

    // ── Known differences ────────────────────────────────────────────

    fn id_of(&self, path: &str) -> StoreResult<Option<FileId>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM files WHERE path = ?1", params![path], |row| {
                row.get(0)
            })
            .optional()?
            .map(FileId))
    }

    /// Declare two tracked paths distinct. Stored as the ordered pair of
    /// their ids; declaring the same pair twice is a no-op.
    pub fn add_known_difference(&self, first: &str, second: &str) -> StoreResult<(FileId, FileId)> {
        let invalid = |reason: &str| StoreError::InvalidKnownDifference {
            first: first.to_string(),
            second: second.to_string(),
            reason: reason.to_string(),
        };
        let a = self
            .id_of(first)?
            .ok_or_else(|| invalid("first path is not tracked"))?;
        let b = self
            .id_of(second)?
            .ok_or_else(|| invalid("second path is not tracked"))?;
        self.insert_known_difference(a, b)
            .map_err(|e| match e {
                StoreError::InvalidKnownDifference { reason, .. } => invalid(&reason),
                other => other,
            })
    }

    /// Declare two tracked file ids distinct.
    pub fn add_known_difference_ids(&self, a: FileId, b: FileId) -> StoreResult<(FileId, FileId)> {
        for id in [a, b] {
            if self.entries_by_ids(&[id])?.is_empty() {
                return Err(StoreError::InvalidKnownDifference {
                    first: a.to_string(),
                    second: b.to_string(),
                    reason: format!("file id {id} is not tracked"),
                });
            }
        }
        self.insert_known_difference(a, b)
    }

    fn insert_known_difference(&self, a: FileId, b: FileId) -> StoreResult<(FileId, FileId)> {
        if a == b {
            return Err(StoreError::InvalidKnownDifference {
                first: a.to_string(),
                second: b.to_string(),
                reason: "a file cannot be known-different from itself".to_string(),
            });
        }
        let (lo, hi) = (a.min(b), a.max(b));
        self.conn.execute(
            "INSERT OR IGNORE INTO known_diff (f1, f2) VALUES (?1, ?2)",
            params![lo.0, hi.0],
        )?;
        Ok((lo, hi))
    }

    /// Withdraw a declaration. Returns `false` if the pair was not stored.
    pub fn remove_known_difference(&self, a: FileId, b: FileId) -> StoreResult<bool> {
        let (lo, hi) = (a.min(b), a.max(b));
        let deleted = self.conn.execute(
            "DELETE FROM known_diff WHERE f1 = ?1 AND f2 = ?2",
            params![lo.0, hi.0],
        )?;
        Ok(deleted > 0)
    }

    pub fn known_differences(&self) -> StoreResult<KnownDifferences> {
        let mut stmt = self.conn.prepare("SELECT f1, f2 FROM known_diff")?;
        let pairs = stmt
            .query_map([], |row| Ok((FileId(row.get(0)?), FileId(row.get(1)?))))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs.into_iter().collect())
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Repair relational drift: orphan or misfiled attribute rows, media
    /// files without an attribute row, and dangling known-difference pairs.
    pub fn check_integrity(&mut self) -> StoreResult<IntegrityReport> {
        let tx = self.conn.transaction()?;
        let mut report = IntegrityReport {
            orphan_attribute_rows: tx.execute(
                "DELETE FROM img WHERE id NOT IN (SELECT id FROM files)",
                [],
            )? + tx.execute("DELETE FROM vid WHERE id NOT IN (SELECT id FROM files)", [])?,
            ..IntegrityReport::default()
        };
        report.mismatched_attribute_rows = tx.execute(
            "DELETE FROM img WHERE id IN (SELECT id FROM files WHERE type != 1)",
            [],
        )? + tx.execute(
            "DELETE FROM vid WHERE id IN (SELECT id FROM files WHERE type != 2)",
            [],
        )?;
        report.missing_attribute_rows = tx.execute(
            "INSERT INTO img (id) SELECT id FROM files
             WHERE type = 1 AND id NOT IN (SELECT id FROM img)",
            [],
        )? + tx.execute(
            "INSERT INTO vid (id) SELECT id FROM files
             WHERE type = 2 AND id NOT IN (SELECT id FROM vid)",
            [],
        )?;
        report.dangling_known_differences = tx.execute(
            "DELETE FROM known_diff
             WHERE f1 NOT IN (SELECT id FROM files) OR f2 NOT IN (SELECT id FROM files)",
            [],
        )?;
        let unknown: i64 = tx.query_row(
            "SELECT COUNT(*) FROM files WHERE type NOT IN (0, 1, 2)",
            [],
            |row| row.get(0),
        )?;
        report.unknown_kind_rows = unknown as usize;
        tx.commit()?;

        if report.is_clean() {
            tracing::info!("Store integrity check passed");
        } else {
            tracing::warn!("Store integrity check repaired drift: {:?}", report);
        }
        Ok(report)
    }
}

fn upsert_rows(conn: &Connection, rows: &RecordRows) -> StoreResult<FileId> {
    let f = &rows.file;
    conn.execute(
        "INSERT INTO files (path, qhash, size, type, hash) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path) DO UPDATE SET
             qhash = excluded.qhash, size = excluded.size,
             type = excluded.type, hash = excluded.hash",
        params![f.path, f.qhash, f.size, f.kind, f.hash],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM files WHERE path = ?1",
        params![f.path],
        |row| row.get(0),
    )?;

    match &rows.attributes {
        AttributeRow::None => {
            conn.execute("DELETE FROM img WHERE id = ?1", params![id])?;
            conn.execute("DELETE FROM vid WHERE id = ?1", params![id])?;
        }
        AttributeRow::Image(i) => {
            conn.execute("DELETE FROM vid WHERE id = ?1", params![id])?;
            conn.execute(
                "INSERT OR REPLACE INTO img (id, height, width, r, g, b, signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, i.height, i.width, i.rgb[0], i.rgb[1], i.rgb[2], i.signature],
            )?;
        }
        AttributeRow::Video(v) => {
            conn.execute("DELETE FROM img WHERE id = ?1", params![id])?;
            conn.execute(
                "INSERT OR REPLACE INTO vid (id, height, width, length, sigrgb)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, v.height, v.width, v.length, v.sigrgb],
            )?;
        }
    }
    Ok(FileId(id))
}

fn duplicate_or(e: rusqlite::Error, path: &str) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicatePath {
                path: path.to_string(),
            }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::hash::{Digest, DIGEST_LEN};

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory(StoreLayout::default()).unwrap()
    }

    fn digest(n: u8) -> Digest {
        Digest([n; DIGEST_LEN])
    }

    fn file(path: &str, size: u64, q: u8) -> MediaRecord {
        let mut record = MediaRecord::non_media(path);
        record.size = Some(size);
        record.quick_hash = Some(digest(q));
        record
    }

    fn image(path: &str, q: u8) -> MediaRecord {
        let mut record = MediaRecord::image(path);
        record.size = Some(100);
        record.quick_hash = Some(digest(q));
        record.attributes = MediaAttributes::Image(ImageAttributes {
            height: 30,
            width: 40,
            average_color: [1.5, 2.0, 3.25],
            signature: Some(Signature::zeros(3, 3)),
        });
        record
    }

    fn video(path: &str, q: u8) -> MediaRecord {
        let mut record = MediaRecord::video(path);
        record.size = Some(1000);
        record.quick_hash = Some(digest(q));
        record.attributes = MediaAttributes::Video(VideoAttributes {
            height: 27,
            width: 48,
            duration_seconds: 12,
            color_curve: Some(ColorCurve(vec![[1, 2, 3], [4, 5, 6]])),
        });
        record
    }

    #[test]
    fn test_upsert_then_get_round_trips() {
        let mut store = store();
        for record in [file("/a.txt", 5, 1), image("/b.png", 2), video("/c.mp4", 3)] {
            store.upsert(&record).unwrap();
            assert_eq!(store.get(&record.path).unwrap(), Some(record));
        }
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let mut store = store();
        let mut record = image("/b.png", 2);
        let id = store.upsert(&record).unwrap();
        record.full_hash = Some(digest(9));
        assert_eq!(store.upsert(&record).unwrap(), id);
        assert_eq!(store.get("/b.png").unwrap().unwrap().full_hash, Some(digest(9)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_kind_change_moves_attribute_row() {
        let mut store = store();
        store.upsert(&image("/x", 1)).unwrap();
        store.upsert(&video("/x", 1)).unwrap();
        let report = store.check_integrity().unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(store.get("/x").unwrap().unwrap().kind(), MediaKind::Video);
    }

    #[test]
    fn test_get_missing_path_is_none() {
        assert_eq!(store().get("/nope").unwrap(), None);
    }

    #[test]
    fn test_insert_many_writes_all_tables() {
        let mut store = store();
        let records = vec![file("/a", 5, 1), image("/b.png", 2), video("/c.mp4", 3)];
        assert_eq!(store.insert_many(&records).unwrap(), 3);
        for record in &records {
            assert_eq!(store.get(&record.path).unwrap().as_ref(), Some(record));
        }
        assert!(store.check_integrity().unwrap().is_clean());
    }

    #[test]
    fn test_insert_many_rejects_tracked_path_atomically() {
        let mut store = store();
        store.insert_many(&[file("/a", 5, 1)]).unwrap();

        let err = store
            .insert_many(&[file("/z", 5, 2), file("/a", 5, 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePath { ref path } if path == "/a"));
        // Nothing from the failed batch is visible.
        assert_eq!(store.get("/z").unwrap(), None);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_insert_many_rejects_repeat_within_batch() {
        let mut store = store();
        let err = store
            .insert_many(&[file("/a", 5, 1), file("/a", 5, 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePath { .. }));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_insert_without_quick_hash_fails() {
        let mut store = store();
        let err = store
            .insert_many(&[MediaRecord::non_media("/a")])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingQuickHash { .. }));
    }

    #[test]
    fn test_remove_deletes_everything() {
        let mut store = store();
        store
            .insert_many(&[image("/a.png", 1), image("/b.png", 1)])
            .unwrap();
        store.add_known_difference("/a.png", "/b.png").unwrap();

        assert!(store.remove("/a.png").unwrap());
        assert_eq!(store.get("/a.png").unwrap(), None);
        assert!(store.known_differences().unwrap().is_empty());
        assert!(store.check_integrity().unwrap().is_clean());
        assert!(!store.remove("/a.png").unwrap());
    }

    #[test]
    fn test_remove_deletes_cached_frames() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = FrameCache::new(dir.path(), dir.path().join("cache"));
        let mut store = MetadataStore::open(
            &dir.path().join("db.sqlite"),
            StoreLayout::default(),
            Some(cache.clone()),
        )
        .unwrap();

        let clip = dir.path().join("clip.mp4").to_string_lossy().into_owned();
        store.upsert(&video(&clip, 1)).unwrap();
        let frames = crate::media::FrameStream {
            width: 1,
            height: 1,
            data: vec![0, 0, 0],
        };
        let cached = cache.store(Path::new(&clip), &frames).unwrap();

        store.remove(&clip).unwrap();
        assert!(!cached.exists());
    }

    #[test]
    fn test_new_and_stale_paths() {
        let mut store = store();
        store
            .insert_many(&[file("/a", 1, 1), file("/b", 1, 2)])
            .unwrap();
        let listing = vec!["/b".to_string(), "/c".to_string(), "/c".to_string()];
        assert_eq!(store.new_paths(&listing).unwrap(), vec!["/c".to_string()]);
        assert_eq!(store.stale_paths(&listing).unwrap(), vec!["/a".to_string()]);
    }

    #[test]
    fn test_stale_paths_under_ignores_other_trees() {
        let mut store = store();
        store
            .insert_many(&[
                file("/m/a/1", 1, 1),
                file("/m/a/2", 1, 2),
                file("/m/ab/3", 1, 3),
                file("/m/b/4", 1, 4),
            ])
            .unwrap();
        // Listing of /m/a only; /m/a/2 vanished.
        let listing = vec!["/m/a/1".to_string()];
        assert_eq!(
            store.stale_paths_under(&listing, Path::new("/m/a")).unwrap(),
            vec!["/m/a/2".to_string()]
        );
        assert!(store
            .stale_paths_under(&listing, Path::new("/elsewhere"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pending_queries() {
        let mut store = store();
        let mut img = MediaRecord::image("/i.png");
        img.quick_hash = Some(digest(1));
        let mut vid = MediaRecord::video("/v.mp4");
        vid.quick_hash = Some(digest(2));
        let mut done = file("/t", 1, 3);
        done.full_hash = Some(digest(3));
        store.insert_many(&[img, vid, done]).unwrap();

        assert_eq!(store.paths_missing_image_signature().unwrap(), vec!["/i.png"]);
        assert_eq!(store.paths_missing_video_curve().unwrap(), vec!["/v.mp4"]);
        assert_eq!(
            store.paths_missing_full_hash().unwrap(),
            vec!["/i.png", "/v.mp4"]
        );
    }

    #[test]
    fn test_duplicate_entries_by_quick_hash() {
        let mut store = store();
        store
            .insert_many(&[
                file("/a", 10, 1),
                file("/b", 10, 1),
                file("/c", 10, 2),
                file("/d", 20, 3),
                file("/e", 20, 3),
            ])
            .unwrap();
        let clusters = store.duplicate_entries(GroupKey::QuickHash).unwrap();
        let paths: Vec<Vec<&str>> = clusters
            .iter()
            .map(|c| c.iter().map(|e| e.path.as_str()).collect())
            .collect();
        assert_eq!(paths, vec![vec!["/a", "/b"], vec!["/d", "/e"]]);

        let by_size = store.duplicate_entries(GroupKey::Size).unwrap();
        assert_eq!(by_size.len(), 2);
        assert_eq!(by_size[0].len(), 3);
    }

    #[test]
    fn test_null_full_hashes_never_cluster() {
        let mut store = store();
        store
            .insert_many(&[file("/a", 10, 1), file("/b", 10, 1)])
            .unwrap();
        assert!(store.duplicate_entries(GroupKey::FullHash).unwrap().is_empty());
    }

    #[test]
    fn test_known_difference_validation() {
        let mut store = store();
        store
            .insert_many(&[file("/a", 1, 1), file("/b", 1, 2)])
            .unwrap();

        let (lo, hi) = store.add_known_difference("/b", "/a").unwrap();
        assert!(lo < hi);
        // Second declaration is a no-op.
        store.add_known_difference("/a", "/b").unwrap();
        let known = store.known_differences().unwrap();
        assert_eq!(known.len(), 1);
        assert!(known.contains(hi, lo));

        assert!(matches!(
            store.add_known_difference("/a", "/a"),
            Err(StoreError::InvalidKnownDifference { .. })
        ));
        assert!(matches!(
            store.add_known_difference("/a", "/missing"),
            Err(StoreError::InvalidKnownDifference { .. })
        ));
        assert!(matches!(
            store.add_known_difference_ids(lo, FileId(999)),
            Err(StoreError::InvalidKnownDifference { .. })
        ));

        assert!(store.remove_known_difference(hi, lo).unwrap());
        assert!(!store.remove_known_difference(hi, lo).unwrap());
    }

    #[test]
    fn test_reset_requires_confirmation() {
        let mut store = store();
        store.insert_many(&[file("/a", 1, 1)]).unwrap();

        let err = store.reset(ResetConfirmation::from_answer("no")).unwrap_err();
        assert!(matches!(err, StoreError::ResetNotConfirmed));
        assert_eq!(store.count().unwrap(), 1);

        store.reset(ResetConfirmation::from_answer(" Yes ")).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_with_other_block_size_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("db.sqlite");
        MetadataStore::open(&db, StoreLayout::default(), None).unwrap();

        let other = StoreLayout {
            block_size: 4096,
            ..StoreLayout::default()
        };
        assert!(matches!(
            MetadataStore::open(&db, other.clone(), None),
            Err(StoreError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_recreate_adopts_new_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("db.sqlite");
        let mut store = MetadataStore::open(&db, StoreLayout::default(), None).unwrap();
        store.insert_many(&[file("/a", 1, 1)]).unwrap();
        drop(store);

        let other = StoreLayout {
            block_size: 4096,
            ..StoreLayout::default()
        };
        assert!(matches!(
            MetadataStore::recreate(&db, other.clone(), None, ResetConfirmation::Refused),
            Err(StoreError::ResetNotConfirmed)
        ));
        let store =
            MetadataStore::recreate(&db, other.clone(), None, ResetConfirmation::Confirmed)
                .unwrap();
        assert_eq!(store.count().unwrap(), 0);
        drop(store);
        assert!(MetadataStore::open(&db, other, None).is_ok());
    }

    #[test]
    fn test_check_integrity_repairs_drift() {
        let mut store = store();
        store
            .insert_many(&[image("/a.png", 1), file("/b", 1, 2)])
            .unwrap();
        let a = store.get_entry("/a.png").unwrap().unwrap().id;
        let b = store.get_entry("/b").unwrap().unwrap().id;
        store.add_known_difference_ids(a, b).unwrap();

        // Simulate drift left by an interrupted external edit.
        store.conn.execute("DELETE FROM img", []).unwrap();
        store
            .conn
            .execute("INSERT INTO vid (id) VALUES (?1)", params![b.0])
            .unwrap();
        store
            .conn
            .execute("INSERT INTO img (id) VALUES (4242)", [])
            .unwrap();
        store
            .conn
            .execute("DELETE FROM files WHERE id = ?1", params![b.0])
            .unwrap();

        let report = store.check_integrity().unwrap();
        assert_eq!(report.orphan_attribute_rows, 2);
        assert_eq!(report.missing_attribute_rows, 1);
        assert_eq!(report.dangling_known_differences, 1);
        assert!(store.check_integrity().unwrap().is_clean());

        let MediaAttributes::Image(attrs) = store.get("/a.png").unwrap().unwrap().attributes else {
            panic!("expected image");
        };
        assert!(attrs.signature.is_none());
        assert_eq!(store.paths_missing_image_signature().unwrap(), vec!["/a.png"]);
    }
}
