//! Conversion between [`MediaRecord`]s and table rows.
//!
//! Row encoding is pure and runs in parallel for bulk inserts; only the
//! writes themselves happen on the connection.

use rusqlite::Row;

use crate::error::{StoreError, StoreResult};
use crate::media::{
    ColorCurve, FileEntry, FileId, ImageAttributes, MediaAttributes, MediaKind, MediaRecord,
    Signature, VideoAttributes,
};
use crate::pipeline::hash::Digest;

/// Scale used to store the average color as an integer.
const COLOR_SCALE: f64 = 256.0;

#[derive(Debug, Clone)]
pub(crate) struct FileRow {
    pub path: String,
    pub qhash: Vec<u8>,
    pub size: Option<i64>,
    pub kind: i64,
    pub hash: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageRow {
    pub height: i64,
    pub width: i64,
    pub rgb: [i64; 3],
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) struct VideoRow {
    pub height: i64,
    pub width: i64,
    pub length: i64,
    pub sigrgb: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) enum AttributeRow {
    None,
    Image(ImageRow),
    Video(VideoRow),
}

/// Everything needed to persist one record.
#[derive(Debug, Clone)]
pub(crate) struct RecordRows {
    pub file: FileRow,
    pub attributes: AttributeRow,
}

impl RecordRows {
    pub fn encode(record: &MediaRecord) -> StoreResult<Self> {
        let qhash = record.quick_hash.ok_or_else(|| StoreError::MissingQuickHash {
            path: record.path.clone(),
        })?;
        let file = FileRow {
            path: record.path.clone(),
            qhash: qhash.as_bytes().to_vec(),
            size: record.size.map(|s| s as i64),
            kind: record.kind().code(),
            hash: record.full_hash.map(|d| d.as_bytes().to_vec()),
        };
        let attributes = match &record.attributes {
            MediaAttributes::NonMedia => AttributeRow::None,
            MediaAttributes::Image(attrs) => AttributeRow::Image(ImageRow {
                height: i64::from(attrs.height),
                width: i64::from(attrs.width),
                rgb: attrs.average_color.map(|c| (c * COLOR_SCALE) as i64),
                signature: attrs.signature.as_ref().map(Signature::to_bytes),
            }),
            MediaAttributes::Video(attrs) => AttributeRow::Video(VideoRow {
                height: i64::from(attrs.height),
                width: i64::from(attrs.width),
                length: attrs.duration_seconds as i64,
                sigrgb: attrs.color_curve.as_ref().map(ColorCurve::to_bytes),
            }),
        };
        Ok(Self { file, attributes })
    }
}

/// Columns selected for a [`FileEntry`], in order.
pub(crate) const ENTRY_COLUMNS: &str = "id, path, size, qhash, hash, type";

/// Read the raw entry columns from a row selected with [`ENTRY_COLUMNS`]
/// starting at column 0.
pub(crate) fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        path: row.get(1)?,
        size: row.get(2)?,
        qhash: row.get(3)?,
        hash: row.get(4)?,
        kind: row.get(5)?,
    })
}

/// An entry as read from SQLite, before blob and kind validation.
#[derive(Debug)]
pub(crate) struct RawEntry {
    pub id: i64,
    pub path: String,
    pub size: Option<i64>,
    pub qhash: Vec<u8>,
    pub hash: Option<Vec<u8>>,
    pub kind: i64,
}

impl RawEntry {
    pub fn decode(self) -> StoreResult<FileEntry> {
        let quick_hash = digest(&self.path, "qhash", &self.qhash)?;
        let full_hash = self
            .hash
            .as_deref()
            .map(|h| digest(&self.path, "hash", h))
            .transpose()?;
        let kind = MediaKind::from_code(self.kind).ok_or(StoreError::UnknownKind {
            path: self.path.clone(),
            kind: self.kind,
        })?;
        Ok(FileEntry {
            id: FileId(self.id),
            path: self.path,
            size: self.size.map(|s| s as u64),
            quick_hash,
            full_hash,
            kind,
        })
    }
}

fn digest(path: &str, column: &str, bytes: &[u8]) -> StoreResult<Digest> {
    Digest::from_slice(bytes).ok_or_else(|| StoreError::MalformedBlob {
        path: path.to_string(),
        message: format!("{column} has {} bytes", bytes.len()),
    })
}

pub(crate) fn image_from_row(
    path: &str,
    row: ImageRow,
    rows: usize,
    cols: usize,
) -> StoreResult<ImageAttributes> {
    let signature = row
        .signature
        .map(|blob| {
            Signature::from_bytes(rows, cols, &blob).ok_or_else(|| StoreError::MalformedBlob {
                path: path.to_string(),
                message: format!(
                    "signature has {} bytes, expected {}",
                    blob.len(),
                    rows * cols * 3 * 2
                ),
            })
        })
        .transpose()?;
    Ok(ImageAttributes {
        height: row.height as u32,
        width: row.width as u32,
        average_color: row.rgb.map(|c| c as f64 / COLOR_SCALE),
        signature,
    })
}

pub(crate) fn video_from_row(path: &str, row: VideoRow) -> StoreResult<VideoAttributes> {
    let color_curve = row
        .sigrgb
        .map(|blob| {
            ColorCurve::from_bytes(&blob).ok_or_else(|| StoreError::MalformedBlob {
                path: path.to_string(),
                message: format!("color curve has {} bytes", blob.len()),
            })
        })
        .transpose()?;
    Ok(VideoAttributes {
        height: row.height as u32,
        width: row.width as u32,
        duration_seconds: row.length as u64,
        color_curve,
    })
}
