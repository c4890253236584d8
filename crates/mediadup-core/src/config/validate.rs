//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hashing.block_size == 0 {
            return Err(ConfigError::ValidationError(
                "hashing.block_size must be > 0".into(),
            ));
        }
        if self.image.grid_rows == 0 || self.image.grid_cols == 0 {
            return Err(ConfigError::ValidationError(
                "image.grid_rows and image.grid_cols must be > 0".into(),
            ));
        }
        if self.video.frame_width == 0 || self.video.frame_height == 0 {
            return Err(ConfigError::ValidationError(
                "video.frame_width and video.frame_height must be > 0".into(),
            ));
        }
        if self.video.fps == 0 {
            return Err(ConfigError::ValidationError("video.fps must be > 0".into()));
        }
        if self.video.window == 0 {
            return Err(ConfigError::ValidationError(
                "video.window must be > 0".into(),
            ));
        }
        if self.pipeline.decode_workers == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.decode_workers must be > 0".into(),
            ));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.batch_size must be > 0".into(),
            ));
        }
        if !(0.0..=255.0).contains(&self.similarity.image_threshold) {
            return Err(ConfigError::ValidationError(
                "similarity.image_threshold must be between 0 and 255".into(),
            ));
        }
        if !(0.0..=255.0).contains(&self.similarity.video_threshold) {
            return Err(ConfigError::ValidationError(
                "similarity.video_threshold must be between 0 and 255".into(),
            ));
        }
        for ext in self
            .media
            .image_extensions
            .iter()
            .chain(&self.media.video_extensions)
        {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(ConfigError::ValidationError(format!(
                    "media extensions must be non-empty and without a leading dot: {ext:?}"
                )));
            }
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(
                "logging.format must be \"pretty\" or \"json\"".into(),
            ));
        }
        Ok(())
    }
}
