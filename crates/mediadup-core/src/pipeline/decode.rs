//! Pluggable decoders for images and videos.
//!
//! Fingerprinting only sees [`PixelBuffer`]s and [`FrameStream`]s, so the
//! concrete backends can be swapped (tests use in-memory fakes). The default
//! backends are the `image` crate for rasters and the `ffprobe`/`ffmpeg`
//! executables for video.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::error::PipelineError;
use crate::media::{FrameFormat, FrameStream, PixelBuffer, VideoProbe};

/// Decodes a still image into RGB pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<PixelBuffer, PipelineError>;
}

/// Probes and resamples videos.
pub trait VideoDecoder: Send + Sync {
    /// Resolution and duration of the first video stream.
    fn probe(&self, path: &Path) -> Result<VideoProbe, PipelineError>;

    /// All frames resampled to `format`, as packed RGB.
    fn frames(&self, path: &Path, format: FrameFormat) -> Result<FrameStream, PipelineError>;
}

/// Raster decoder backed by the `image` crate. Formats are detected by
/// content, not by extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl ImageDecoder for RasterDecoder {
    fn decode(&self, path: &Path) -> Result<PixelBuffer, PipelineError> {
        let decode_err = |message: String| PipelineError::Decode {
            path: path.to_path_buf(),
            message,
        };
        let reader = image::ImageReader::open(path)
            .map_err(|e| decode_err(format!("Cannot open image: {}", e)))?
            .with_guessed_format()
            .map_err(|e| decode_err(format!("Cannot detect image format: {}", e)))?;
        let image = reader.decode().map_err(|e| decode_err(e.to_string()))?;

        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        PixelBuffer::new(height, width, rgb.into_raw())
            .ok_or_else(|| decode_err("decoded buffer has unexpected length".into()))
    }
}

/// Video decoder that shells out to `ffprobe` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegDecoder {
    /// Use explicit executable paths instead of looking them up on `PATH`.
    #[cfg(test)]
    pub(crate) fn with_binaries(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Whether `ffmpeg` can be spawned at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn probe(&self, path: &Path) -> Result<VideoProbe, PipelineError> {
        let probe_err = |message: String| PipelineError::Probe {
            path: path.to_path_buf(),
            message,
        };
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_type,width,height,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| probe_err(format!("Could not spawn ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(probe_err(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe(&output.stdout).map_err(probe_err)
    }

    fn frames(&self, path: &Path, format: FrameFormat) -> Result<FrameStream, PipelineError> {
        let decode_err = |message: String| PipelineError::Decode {
            path: path.to_path_buf(),
            message,
        };
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{}x{}", format.width, format.height),
                "-r",
                &format.fps.to_string(),
                "pipe:",
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| decode_err(format!("Could not spawn ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(decode_err(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut data = output.stdout;
        let frame_len = format.frame_len();
        let whole = data.len() / frame_len * frame_len;
        if whole != data.len() {
            tracing::debug!(
                "Dropping {} trailing bytes of a partial frame from {:?}",
                data.len() - whole,
                path
            );
            data.truncate(whole);
        }
        Ok(FrameStream {
            width: format.width,
            height: format.height,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Extract the first video stream from `ffprobe -of json` output. Containers
/// that only report duration at the format level (e.g. Matroska) fall back
/// to it. Fractional seconds are truncated.
fn parse_probe(json: &[u8]) -> Result<VideoProbe, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("Invalid ffprobe output: {}", e))?;
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or("No video stream")?;

    let duration = stream
        .duration
        .as_deref()
        .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .ok_or("No duration reported")?;
    let duration: f64 = duration
        .parse()
        .map_err(|e| format!("Invalid duration {:?}: {}", duration, e))?;

    Ok(VideoProbe {
        height: stream.height.ok_or("No height reported")?,
        width: stream.width.ok_or("No width reported")?,
        duration_seconds: duration.max(0.0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_decoder_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::RgbImage::from_pixel(6, 4, image::Rgb([128, 64, 32]))
            .save(&path)
            .unwrap();

        let pixels = RasterDecoder.decode(&path).unwrap();
        assert_eq!((pixels.height(), pixels.width()), (4, 6));
        assert_eq!(&pixels.data()[..3], &[128, 64, 32]);
    }

    #[test]
    fn test_format_detected_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("misnamed.jpg");
        let png = dir.path().join("real.png");
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]))
            .save(&png)
            .unwrap();
        std::fs::copy(&png, &path).unwrap();

        let pixels = RasterDecoder.decode(&path).unwrap();
        assert_eq!(&pixels.data()[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_raster_decoder_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(
            RasterDecoder.decode(&path),
            Err(PipelineError::Decode { .. })
        ));
    }

    #[test]
    fn test_parse_probe_stream_duration() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "duration": "99.0"},
                {"codec_type": "video", "width": 1920, "height": 1080, "duration": "12.97"}
            ],
            "format": {"duration": "13.00"}
        }"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(
            probe,
            VideoProbe {
                height: 1080,
                width: 1920,
                duration_seconds: 12
            }
        );
    }

    #[test]
    fn test_parse_probe_falls_back_to_format_duration() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360}],
            "format": {"duration": "61.5"}
        }"#;
        assert_eq!(parse_probe(json).unwrap().duration_seconds, 61);
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(parse_probe(json).unwrap_err().contains("No video stream"));
    }

    #[test]
    fn test_missing_binary_is_probe_error() {
        let decoder = FfmpegDecoder::with_binaries("/nonexistent/ffprobe", "/nonexistent/ffmpeg");
        assert!(!decoder.is_available());
        assert!(matches!(
            decoder.probe(Path::new("/tmp/x.mp4")),
            Err(PipelineError::Probe { .. })
        ));
    }
}
