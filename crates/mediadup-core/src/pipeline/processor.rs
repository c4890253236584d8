//! Batch orchestration: runs hashing and fingerprinting over many records.
//!
//! Cheap, I/O-bound work (stat + quick/full hash) runs on the wide pool;
//! decode-bound work (image signatures, video color curves) runs on the
//! narrow pool. Every pass returns the updated records plus the per-file
//! failures, so a bad file never aborts a batch.

use std::sync::Arc;

use crate::config::{Config, MediaConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::media::{FrameCache, ImageFingerprinter, MediaRecord, VideoFingerprinter};

use super::decode::{FfmpegDecoder, ImageDecoder, RasterDecoder, VideoDecoder};
use super::hash::ContentHasher;
use super::pool::{Progress, WorkerPool};

/// Records that made it through a pass, and the files that did not.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<MediaRecord>,
    pub failures: Vec<PipelineError>,
}

impl BatchOutcome {
    fn from_results(results: Vec<PipelineResult<MediaRecord>>) -> Self {
        let mut outcome = Self::default();
        for result in results {
            match result {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    tracing::warn!("{e}");
                    outcome.failures.push(e);
                }
            }
        }
        outcome
    }
}

/// Wires hashers, fingerprinters and decoders to the two worker pools.
pub struct BatchProcessor {
    media: MediaConfig,
    hasher: ContentHasher,
    images: ImageFingerprinter,
    videos: VideoFingerprinter,
    image_decoder: Arc<dyn ImageDecoder>,
    video_decoder: Arc<dyn VideoDecoder>,
    wide: WorkerPool,
    narrow: WorkerPool,
}

impl BatchProcessor {
    /// Processor with the default decoders (`image` crate, ffmpeg).
    pub fn new(config: &Config) -> Self {
        Self::with_decoders(
            config,
            Arc::new(RasterDecoder),
            Arc::new(FfmpegDecoder::default()),
        )
    }

    /// Processor with explicit decoder backends.
    pub fn with_decoders(
        config: &Config,
        image_decoder: Arc<dyn ImageDecoder>,
        video_decoder: Arc<dyn VideoDecoder>,
    ) -> Self {
        Self {
            media: config.media.clone(),
            hasher: ContentHasher::new(config.hashing.block_size),
            images: ImageFingerprinter::from_config(&config.image),
            videos: VideoFingerprinter::from_config(&config.video),
            image_decoder,
            video_decoder,
            wide: WorkerPool::new("hash", config.pipeline.effective_hash_workers()),
            narrow: WorkerPool::new("decode", config.pipeline.decode_workers),
        }
    }

    /// A fresh record for `path`, classified by extension.
    pub fn classify(&self, path: impl Into<String>) -> MediaRecord {
        MediaRecord::classify(path, &self.media)
    }

    /// Classify new paths and compute size and quick hash (and the full hash
    /// for small files). Runs on the wide pool.
    pub async fn ingest(&self, paths: Vec<String>, progress: Option<Progress>) -> BatchOutcome {
        let media = self.media.clone();
        let hasher = self.hasher.clone();
        let results = self
            .wide
            .run(
                paths,
                move |path| {
                    let mut record = MediaRecord::classify(path, &media);
                    record.compute_quick_hash(&hasher)?;
                    Ok(record)
                },
                progress,
            )
            .await;
        BatchOutcome::from_results(results)
    }

    /// Compute missing full hashes. Runs on the wide pool.
    pub async fn full_hashes(
        &self,
        records: Vec<MediaRecord>,
        progress: Option<Progress>,
    ) -> BatchOutcome {
        let hasher = self.hasher.clone();
        let results = self
            .wide
            .run(
                records,
                move |mut record: MediaRecord| {
                    record.compute_full_hash(&hasher, false)?;
                    Ok(record)
                },
                progress,
            )
            .await;
        BatchOutcome::from_results(results)
    }

    /// Decode images and compute their grid signatures. Runs on the narrow
    /// pool. Undecodable images come back with zero attributes, not as
    /// failures.
    pub async fn image_signatures(
        &self,
        records: Vec<MediaRecord>,
        progress: Option<Progress>,
    ) -> BatchOutcome {
        let images = self.images.clone();
        let decoder = self.image_decoder.clone();
        let results = self
            .narrow
            .run(
                records,
                move |mut record: MediaRecord| {
                    record.compute_image_attributes(&images, decoder.as_ref());
                    Ok(record)
                },
                progress,
            )
            .await;
        BatchOutcome::from_results(results)
    }

    /// Probe and resample videos and compute their color curves. Runs on the
    /// narrow pool. Frames are never cached in bulk runs.
    pub async fn video_signatures(
        &self,
        records: Vec<MediaRecord>,
        progress: Option<Progress>,
    ) -> BatchOutcome {
        let videos = self.videos.clone();
        let decoder = self.video_decoder.clone();
        let results = self
            .narrow
            .run(
                records,
                move |mut record: MediaRecord| {
                    record.compute_video_attributes(&videos, decoder.as_ref(), None);
                    Ok(record)
                },
                progress,
            )
            .await;
        BatchOutcome::from_results(results)
    }

    /// Fully process a single record on the calling thread: quick hash if
    /// missing, full hash, and kind-specific attributes. Video frames are
    /// written to `cache` when one is given.
    pub fn process_one(
        &self,
        record: &mut MediaRecord,
        cache: Option<&FrameCache>,
    ) -> PipelineResult<()> {
        let start = std::time::Instant::now();
        if record.quick_hash.is_none() {
            record.compute_quick_hash(&self.hasher)?;
        }
        record.compute_full_hash(&self.hasher, false)?;
        record.compute_image_attributes(&self.images, self.image_decoder.as_ref());
        record.compute_video_attributes(&self.videos, self.video_decoder.as_ref(), cache);
        tracing::debug!("Processed {} in {:?}", record.path, start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        FrameFormat, FrameStream, MediaAttributes, PixelBuffer, VideoProbe,
    };
    use std::path::Path;
    use tempfile::TempDir;

    struct SolidDecoder;

    impl ImageDecoder for SolidDecoder {
        fn decode(&self, _path: &Path) -> PipelineResult<PixelBuffer> {
            Ok(PixelBuffer::solid(9, 9, [128, 128, 128]))
        }
    }

    struct StaticVideo;

    impl VideoDecoder for StaticVideo {
        fn probe(&self, _path: &Path) -> PipelineResult<VideoProbe> {
            Ok(VideoProbe {
                height: 27,
                width: 48,
                duration_seconds: 5,
            })
        }

        fn frames(&self, _path: &Path, format: FrameFormat) -> PipelineResult<FrameStream> {
            Ok(FrameStream {
                width: format.width,
                height: format.height,
                data: vec![50; format.frame_len() * 10],
            })
        }
    }

    fn processor() -> BatchProcessor {
        let mut config = Config::default();
        config.hashing.block_size = 16;
        BatchProcessor::with_decoders(&config, Arc::new(SolidDecoder), Arc::new(StaticVideo))
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_ingest_hashes_and_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.jpg", &[1u8; 100]);
        let b = write(&dir, "b.txt", b"small");
        let missing = dir.path().join("gone.mp4").to_string_lossy().into_owned();

        let outcome = processor().ingest(vec![a, b, missing], None).await;
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.records.iter().all(|r| r.quick_hash.is_some()));

        let small = outcome
            .records
            .iter()
            .find(|r| r.path.ends_with("b.txt"))
            .unwrap();
        assert_eq!(small.full_hash, small.quick_hash);
    }

    #[tokio::test]
    async fn test_signature_passes_fill_attributes() {
        let processor = processor();
        let outcome = processor
            .image_signatures(vec![MediaRecord::image("/x/a.png")], None)
            .await;
        let MediaAttributes::Image(attrs) = &outcome.records[0].attributes else {
            panic!("expected image attributes");
        };
        assert!(attrs.signature.as_ref().unwrap().values().iter().all(|&v| v == 32768));

        let outcome = processor
            .video_signatures(vec![MediaRecord::video("/x/a.mp4")], None)
            .await;
        let MediaAttributes::Video(attrs) = &outcome.records[0].attributes else {
            panic!("expected video attributes");
        };
        assert_eq!(attrs.duration_seconds, 5);
        assert_eq!(attrs.color_curve.as_ref().unwrap().entries(), &[[50, 50, 50]; 2]);
    }

    #[test]
    fn test_process_one_caches_frames() {
        let dir = TempDir::new().unwrap();
        let clip = write(&dir, "clip.mp4", &[7u8; 200]);
        let cache = FrameCache::new(dir.path(), dir.path().join("cache"));

        let processor = processor();
        let mut record = processor.classify(clip.clone());
        processor.process_one(&mut record, Some(&cache)).unwrap();

        assert!(record.full_hash.is_some());
        assert_eq!(cache.load(Path::new(&clip)).unwrap().frame_count(), 10);
    }
}
