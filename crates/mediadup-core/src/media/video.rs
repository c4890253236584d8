//! Video attributes and the temporal color curve.
//!
//! A video is resampled to a small fixed frame size at a fixed rate. Each
//! frame is reduced to its mean color, trailing frames that do not fill a
//! whole window are dropped, and each window of frame means is averaged into
//! one `[u8; 3]` entry (truncated).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::VideoConfig;
use crate::pipeline::decode::VideoDecoder;

use super::frame_cache::FrameCache;

/// Target frame size and rate for resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl FrameFormat {
    /// Bytes per RGB frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Resampled RGB frames, `frames x height x width x 3`, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStream {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameStream {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn frame_count(&self) -> usize {
        match self.frame_len() {
            0 => 0,
            len => self.data.len() / len,
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        // chunks_exact panics on zero; an empty-geometry stream has no frames.
        self.data.chunks_exact(self.frame_len().max(1)).take(self.frame_count())
    }
}

/// Container-level facts reported by the prober.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoProbe {
    pub height: u32,
    pub width: u32,
    pub duration_seconds: u64,
}

/// Sequence of windowed mean colors (RGB).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCurve(pub Vec<[u8; 3]>);

impl ColorCurve {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[[u8; 3]] {
        &self.0
    }

    /// Flat `u8` blob, three bytes per entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flatten().copied().collect()
    }

    /// Returns `None` if the blob length is not a multiple of 3.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 3 != 0 {
            return None;
        }
        Some(Self(
            bytes
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        ))
    }
}

/// Video-only attributes. Zeros mean "unknown or unprobeable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoAttributes {
    pub height: u32,
    pub width: u32,
    pub duration_seconds: u64,
    /// `None` until computed, or when decoding failed
    pub color_curve: Option<ColorCurve>,
}

/// Computes [`VideoAttributes`] through a [`VideoDecoder`].
#[derive(Debug, Clone)]
pub struct VideoFingerprinter {
    format: FrameFormat,
    window: usize,
}

impl VideoFingerprinter {
    pub fn new(format: FrameFormat, window: usize) -> Self {
        Self {
            format,
            window: window.max(1),
        }
    }

    pub fn from_config(config: &VideoConfig) -> Self {
        Self::new(
            FrameFormat {
                width: config.frame_width,
                height: config.frame_height,
                fps: config.fps,
            },
            config.window,
        )
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Reduce resampled frames to a color curve.
    pub fn reduce(&self, frames: &FrameStream) -> ColorCurve {
        let means: Vec<[f64; 3]> = frames.frames().map(frame_mean).collect();
        let usable = means.len() - means.len() % self.window;
        ColorCurve(
            means[..usable]
                .chunks_exact(self.window)
                .map(|chunk| {
                    let mut acc = [0f64; 3];
                    for mean in chunk {
                        for (a, m) in acc.iter_mut().zip(mean) {
                            *a += m;
                        }
                    }
                    acc.map(|a| (a / chunk.len() as f64) as u8)
                })
                .collect(),
        )
    }

    /// Probe, resample and reduce `path`.
    ///
    /// A probe failure yields all-zero attributes without a curve. A frame
    /// decode failure keeps the probed dimensions and leaves the curve unset.
    /// When `cache` is given the resampled frames are also written to it.
    pub fn compute(
        &self,
        path: &Path,
        decoder: &dyn VideoDecoder,
        cache: Option<&FrameCache>,
    ) -> VideoAttributes {
        let probe = match decoder.probe(path) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!("Could not probe video {:?}: {e}", path);
                return VideoAttributes::default();
            }
        };

        let color_curve = match decoder.frames(path, self.format) {
            Ok(frames) => {
                if let Some(cache) = cache {
                    if let Err(e) = cache.store(path, &frames) {
                        tracing::warn!("Could not cache frames for {:?}: {e}", path);
                    }
                }
                Some(self.reduce(&frames))
            }
            Err(e) => {
                tracing::warn!("Could not decode frames of {:?}: {e}", path);
                None
            }
        };

        VideoAttributes {
            height: probe.height,
            width: probe.width,
            duration_seconds: probe.duration_seconds,
            color_curve,
        }
    }
}

fn frame_mean(frame: &[u8]) -> [f64; 3] {
    let mut sums = [0u64; 3];
    for px in frame.chunks_exact(3) {
        for (s, &c) in sums.iter_mut().zip(px) {
            *s += u64::from(c);
        }
    }
    let pixels = (frame.len() / 3).max(1) as f64;
    sums.map(|s| s as f64 / pixels)
}
