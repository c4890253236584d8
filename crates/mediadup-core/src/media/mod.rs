//! The in-memory model of one tracked file.
//!
//! A [`MediaRecord`] is identified by its path. Hashes and attribute blocks
//! are filled in by explicit `compute_*` calls made by the batch processor;
//! nothing is computed implicitly on access.

pub mod frame_cache;
pub mod image;
pub mod video;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MediaConfig;
use crate::error::PipelineError;
use crate::pipeline::decode::{ImageDecoder, VideoDecoder};
use crate::pipeline::hash::{ContentHasher, Digest};

pub use self::frame_cache::FrameCache;
pub use self::image::{ImageAttributes, ImageFingerprinter, PixelBuffer, Signature};
pub use self::video::{
    ColorCurve, FrameFormat, FrameStream, VideoAttributes, VideoFingerprinter, VideoProbe,
};

/// Kind of a tracked file. The numeric codes are part of the persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    NonMedia,
    Image,
    Video,
}

impl MediaKind {
    /// Code stored in the `files.type` column.
    pub fn code(self) -> i64 {
        match self {
            MediaKind::NonMedia => 0,
            MediaKind::Image => 1,
            MediaKind::Video => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MediaKind::NonMedia),
            1 => Some(MediaKind::Image),
            2 => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Classify a path by its extension (case-insensitive).
    pub fn classify(path: &str, media: &MediaConfig) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let Some(ext) = ext else {
            return MediaKind::NonMedia;
        };
        let matches = |list: &[String]| list.iter().any(|e| e.to_lowercase() == ext);
        if matches(&media.image_extensions) {
            MediaKind::Image
        } else if matches(&media.video_extensions) {
            MediaKind::Video
        } else {
            MediaKind::NonMedia
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::NonMedia => "NOMEDIA",
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
        })
    }
}

/// Kind-specific attribute block. Exactly one variant per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaAttributes {
    NonMedia,
    Image(ImageAttributes),
    Video(VideoAttributes),
}

impl MediaAttributes {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaAttributes::NonMedia => MediaKind::NonMedia,
            MediaAttributes::Image(_) => MediaKind::Image,
            MediaAttributes::Video(_) => MediaKind::Video,
        }
    }
}

/// Row id of a record in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Light projection of a stored record used for grouping.
///
/// Carries only the comparison keys, so a full-tree grouping pass never loads
/// attribute blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: FileId,
    pub path: String,
    pub size: Option<u64>,
    pub quick_hash: Digest,
    pub full_hash: Option<Digest>,
    pub kind: MediaKind,
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Unique identity key
    pub path: String,
    /// Size in bytes, read from the filesystem on demand
    pub size: Option<u64>,
    /// Sampled digest; mandatory before the record is stored
    pub quick_hash: Option<Digest>,
    /// Full digest, absent until computed
    pub full_hash: Option<Digest>,
    /// Kind-specific attributes
    pub attributes: MediaAttributes,
}

impl MediaRecord {
    fn with_attributes(path: impl Into<String>, attributes: MediaAttributes) -> Self {
        Self {
            path: path.into(),
            size: None,
            quick_hash: None,
            full_hash: None,
            attributes,
        }
    }

    /// A record for a file that is neither image nor video.
    pub fn non_media(path: impl Into<String>) -> Self {
        Self::with_attributes(path, MediaAttributes::NonMedia)
    }

    /// An image record with undetermined attributes.
    pub fn image(path: impl Into<String>) -> Self {
        Self::with_attributes(path, MediaAttributes::Image(ImageAttributes::default()))
    }

    /// A video record with undetermined attributes.
    pub fn video(path: impl Into<String>) -> Self {
        Self::with_attributes(path, MediaAttributes::Video(VideoAttributes::default()))
    }

    /// Build a record whose kind is derived from the path's extension.
    pub fn classify(path: impl Into<String>, media: &MediaConfig) -> Self {
        let path = path.into();
        match MediaKind::classify(&path, media) {
            MediaKind::NonMedia => Self::non_media(path),
            MediaKind::Image => Self::image(path),
            MediaKind::Video => Self::video(path),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.attributes.kind()
    }

    /// Compute the quick hash (and size). For files smaller than three blocks
    /// the digest covers the whole file and is stored as the full hash too.
    pub fn compute_quick_hash(&mut self, hasher: &ContentHasher) -> Result<Digest, PipelineError> {
        let quick = hasher.quick_hash(Path::new(&self.path))?;
        self.size = Some(quick.size);
        self.quick_hash = Some(quick.digest);
        if quick.covers_whole_file {
            self.full_hash = Some(quick.digest);
        }
        Ok(quick.digest)
    }

    /// Compute the full hash unless it is already known.
    pub fn compute_full_hash(
        &mut self,
        hasher: &ContentHasher,
        recompute: bool,
    ) -> Result<Digest, PipelineError> {
        if let (Some(digest), false) = (self.full_hash, recompute) {
            return Ok(digest);
        }
        let digest = hasher.full_hash(Path::new(&self.path))?;
        self.full_hash = Some(digest);
        Ok(digest)
    }

    /// Decode the image and fill its attribute block. Returns `false` for
    /// records that are not images. Decode failures degrade to zero defaults.
    pub fn compute_image_attributes(
        &mut self,
        fingerprinter: &ImageFingerprinter,
        decoder: &dyn ImageDecoder,
    ) -> bool {
        let MediaAttributes::Image(attrs) = &mut self.attributes else {
            return false;
        };
        *attrs = fingerprinter.compute(Path::new(&self.path), decoder);
        true
    }

    /// Probe and decode the video and fill its attribute block. Returns
    /// `false` for records that are not videos.
    pub fn compute_video_attributes(
        &mut self,
        fingerprinter: &VideoFingerprinter,
        decoder: &dyn VideoDecoder,
        cache: Option<&FrameCache>,
    ) -> bool {
        let MediaAttributes::Video(attrs) = &mut self.attributes else {
            return false;
        };
        *attrs = fingerprinter.compute(Path::new(&self.path), decoder, cache);
        true
    }
}

impl fmt::Display for MediaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "<{}> {} ({})", self.kind(), self.path, human_size(size)),
            None => write!(f, "<{}> {}", self.kind(), self.path),
        }
    }
}

/// Render a byte count with binary prefixes ("512 B", "1.50 MiB").
pub fn human_size(size: u64) -> String {
    if size < 1024 {
        return format!("{size} B");
    }
    let mut value = size as f64;
    let mut prefix = 'B';
    for p in ['K', 'M', 'G', 'T', 'P'] {
        value /= 1024.0;
        prefix = p;
        if value < 1024.0 {
            break;
        }
    }
    format!("{value:.2} {prefix}iB")
}
