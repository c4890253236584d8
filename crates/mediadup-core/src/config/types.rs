//! Sub-configuration structs with their defaults.
//!
//! Every section rejects unknown keys so a typo in the config file is a
//! parse error rather than a silently ignored setting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One mebibyte, the default hashing block size.
pub const MIB: u64 = 1024 * 1024;

/// General settings: where the tree, the database and the cache live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Root of the scanned media tree
    pub root_dir: PathBuf,

    /// SQLite database file
    pub db_file: PathBuf,

    /// Side tree for cached full-resolution video frames
    pub signature_cache_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("~/Pictures"),
            db_file: PathBuf::from("~/.mediadup/mediadup.db"),
            signature_cache_dir: PathBuf::from("~/.mediadup/frames"),
        }
    }
}

/// Extension lists used to classify paths into media kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    /// Extensions treated as images (without the dot)
    pub image_extensions: Vec<String>,

    /// Extensions treated as videos (without the dot)
    pub video_extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image_extensions: ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: ["mp4", "mkv", "avi", "mov", "wmv", "webm", "m4v", "mpg", "mpeg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Content hashing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashingConfig {
    /// Block size in bytes. Part of the store's versioned layout: changing it
    /// changes every quick hash.
    pub block_size: u64,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { block_size: MIB }
    }
}

/// Image signature grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    /// Number of grid rows (Y)
    pub grid_rows: usize,

    /// Number of grid columns (X)
    pub grid_cols: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            grid_rows: 3,
            grid_cols: 3,
        }
    }
}

/// Video resampling and color-curve settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Width of the resampled frames
    pub frame_width: u32,

    /// Height of the resampled frames
    pub frame_height: u32,

    /// Resampled frame rate (frames per second)
    pub fps: u32,

    /// Frames averaged into one color-curve entry
    pub window: usize,

    /// Write the full frame tensor to the signature cache on single-file runs
    pub cache_frames: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_width: 48,
            frame_height: 27,
            fps: 2,
            window: 5,
            cache_frames: false,
        }
    }
}

/// Worker pool and batching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Workers for cheap work (hashing, stat). 0 means one per CPU core.
    pub hash_workers: usize,

    /// Workers for decode-bound work (image/video fingerprints)
    pub decode_workers: usize,

    /// Records computed and committed per transaction
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hash_workers: 0,
            decode_workers: 4,
            batch_size: 5000,
        }
    }
}

impl PipelineConfig {
    /// Resolve the wide pool size, falling back to the available parallelism.
    pub fn effective_hash_workers(&self) -> usize {
        if self.hash_workers > 0 {
            self.hash_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Thresholds for perceptual near-duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Max mean absolute signature difference (0–255 scale) for images
    pub image_threshold: f64,

    /// Max mean absolute color-curve difference (0–255 scale) for videos
    pub video_threshold: f64,

    /// Max duration difference in seconds before two videos are compared
    pub duration_tolerance_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            image_threshold: 4.0,
            video_threshold: 6.0,
            duration_tolerance_secs: 2,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
