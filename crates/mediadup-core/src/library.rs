//! High-level entry point tying the store, the batch processor and grouping
//! together.
//!
//! Work is chunked by `pipeline.batch_size`: each chunk is computed in full
//! and then committed in one transaction, so an interruption only repeats
//! the chunk in flight.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::grouping::{self, similarity, DuplicateGroup, GroupKey};
use crate::media::{FileId, FrameCache, MediaRecord};
use crate::pipeline::{BatchOutcome, BatchProcessor, Progress};
use crate::store::{IntegrityReport, MetadataStore, ResetConfirmation, StoreLayout};

/// Outcome of a bulk pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Records computed and committed
    pub committed: usize,
    /// Files that could not be processed
    pub failures: Vec<PipelineError>,
}

impl PassReport {
    fn absorb(&mut self, committed: usize, failures: Vec<PipelineError>) {
        self.committed += committed;
        self.failures.extend(failures);
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    FullHash,
    ImageSignature,
    VideoSignature,
}

/// A media library: one store plus the machinery to fill it.
pub struct Library {
    config: Config,
    store: MetadataStore,
    processor: BatchProcessor,
}

impl Library {
    /// Open (or create) the store configured in `config`.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = FrameCache::new(config.root_dir(), config.signature_cache_dir());
        let store = MetadataStore::open(
            &config.db_file(),
            StoreLayout::from_config(&config),
            Some(cache),
        )?;
        let processor = BatchProcessor::new(&config);
        tracing::debug!("Opened library at {:?}", config.db_file());
        Ok(Self::with_parts(config, store, processor))
    }

    /// Wipe the configured store (and frame cache) and start empty with the
    /// current layout.
    pub fn create(config: Config, confirmation: ResetConfirmation) -> Result<Self> {
        config.validate()?;
        let cache = FrameCache::new(config.root_dir(), config.signature_cache_dir());
        let store = MetadataStore::recreate(
            &config.db_file(),
            StoreLayout::from_config(&config),
            Some(cache),
            confirmation,
        )?;
        let processor = BatchProcessor::new(&config);
        Ok(Self::with_parts(config, store, processor))
    }

    /// Assemble a library from explicit parts.
    pub fn with_parts(config: Config, store: MetadataStore, processor: BatchProcessor) -> Self {
        Self {
            config,
            store,
            processor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Insert every path of `listing` that is not tracked yet, with size and
    /// quick hash computed.
    pub async fn detect_and_add(
        &mut self,
        listing: &[String],
        progress: Option<Progress>,
    ) -> Result<PassReport> {
        let new_paths = self.store.new_paths(listing)?;
        tracing::info!("{} new paths out of {} listed", new_paths.len(), listing.len());

        let total = new_paths.len();
        let mut report = PassReport::default();
        let batch_size = self.batch_size();
        for (index, chunk) in new_paths.chunks(batch_size).enumerate() {
            let offset = index * batch_size;
            let outcome = self
                .processor
                .ingest(chunk.to_vec(), offset_progress(&progress, offset, total))
                .await;
            let committed = self.store.insert_many(&outcome.records)?;
            report.absorb(committed, outcome.failures);
        }
        Ok(report)
    }

    /// Remove every tracked path that is absent from `listing`.
    pub fn cleanup(&mut self, listing: &[String]) -> Result<usize> {
        let stale = self.store.stale_paths(listing)?;
        let removed = self.store.remove_many(&stale)?;
        tracing::info!("Removed {} stale records", removed);
        Ok(removed)
    }

    /// Remove tracked paths under `root` that are absent from `listing`, a
    /// listing of that subtree only.
    pub fn cleanup_under(&mut self, root: &Path, listing: &[String]) -> Result<usize> {
        let stale = self.store.stale_paths_under(listing, root)?;
        let removed = self.store.remove_many(&stale)?;
        tracing::info!("Removed {} stale records under {:?}", removed, root);
        Ok(removed)
    }

    // ── Bulk passes ──────────────────────────────────────────────────

    /// Compute full hashes. Without explicit paths, only files that still
    /// share size and quick hash with another file are hashed.
    pub async fn compute_full_hashes(
        &mut self,
        paths: Option<Vec<String>>,
        progress: Option<Progress>,
    ) -> Result<PassReport> {
        let paths = match paths {
            Some(paths) => paths,
            None => self.full_hash_candidates()?,
        };
        self.run_pass(Pass::FullHash, paths, progress).await
    }

    /// Compute image signatures (by default, for every image lacking one).
    pub async fn compute_image_signatures(
        &mut self,
        paths: Option<Vec<String>>,
        progress: Option<Progress>,
    ) -> Result<PassReport> {
        let paths = match paths {
            Some(paths) => paths,
            None => self.store.paths_missing_image_signature()?,
        };
        self.run_pass(Pass::ImageSignature, paths, progress).await
    }

    /// Compute video color curves (by default, for every video lacking one).
    pub async fn compute_video_signatures(
        &mut self,
        paths: Option<Vec<String>>,
        progress: Option<Progress>,
    ) -> Result<PassReport> {
        let paths = match paths {
            Some(paths) => paths,
            None => self.store.paths_missing_video_curve()?,
        };
        self.run_pass(Pass::VideoSignature, paths, progress).await
    }

    // `with_parts` takes an unvalidated config.
    fn batch_size(&self) -> usize {
        self.config.pipeline.batch_size.max(1)
    }

    fn full_hash_candidates(&self) -> Result<Vec<String>> {
        let groups = grouping::funnel(&self.store, &[GroupKey::Size, GroupKey::QuickHash])?;
        Ok(groups
            .iter()
            .flat_map(|g| &g.members)
            .filter(|m| m.full_hash.is_none())
            .map(|m| m.path.clone())
            .collect())
    }

    async fn run_pass(
        &mut self,
        pass: Pass,
        paths: Vec<String>,
        progress: Option<Progress>,
    ) -> Result<PassReport> {
        tracing::info!("{:?} pass over {} files", pass, paths.len());
        let total = paths.len();
        let batch_size = self.batch_size();
        let mut report = PassReport::default();

        for (index, chunk) in paths.chunks(batch_size).enumerate() {
            let records = self.store.records(chunk)?;
            let chunk_progress = offset_progress(&progress, index * batch_size, total);
            let BatchOutcome { records, failures } = match pass {
                Pass::FullHash => self.processor.full_hashes(records, chunk_progress).await,
                Pass::ImageSignature => {
                    self.processor.image_signatures(records, chunk_progress).await
                }
                Pass::VideoSignature => {
                    self.processor.video_signatures(records, chunk_progress).await
                }
            };
            let committed = self.store.upsert_many(&records)?;
            report.absorb(committed, failures);
        }
        Ok(report)
    }

    /// Fully process one file interactively (hashes and attributes) and
    /// store the result. Video frames go to the signature cache when
    /// `video.cache_frames` is set.
    pub fn process_file(&mut self, path: &str) -> Result<MediaRecord> {
        let mut record = match self.store.get(path)? {
            Some(record) => record,
            None => self.processor.classify(path),
        };
        let cache = self
            .config
            .video
            .cache_frames
            .then(|| self.store.frame_cache())
            .flatten();
        self.processor.process_one(&mut record, cache)?;
        self.store.upsert(&record)?;
        Ok(record)
    }

    // ── Grouping ─────────────────────────────────────────────────────

    /// Exact duplicates through successive key passes.
    pub fn find_duplicates(&self, keys: &[GroupKey]) -> Result<Vec<DuplicateGroup>> {
        Ok(grouping::funnel(&self.store, keys)?)
    }

    /// Images within the configured perceptual threshold.
    pub fn similar_images(&self) -> Result<Vec<DuplicateGroup>> {
        let known = self.store.known_differences()?;
        Ok(similarity::similar_images(
            self.store.image_signatures()?,
            self.config.similarity.image_threshold,
            &known,
        ))
    }

    /// Videos within the configured perceptual threshold.
    pub fn similar_videos(&self) -> Result<Vec<DuplicateGroup>> {
        let known = self.store.known_differences()?;
        Ok(similarity::similar_videos(
            self.store.video_curves()?,
            self.config.similarity.video_threshold,
            self.config.similarity.duration_tolerance_secs,
            &known,
        ))
    }

    /// Declare two tracked paths distinct.
    pub fn mark_different(&self, first: &str, second: &str) -> Result<(FileId, FileId)> {
        Ok(self.store.add_known_difference(first, second)?)
    }

    pub fn check_integrity(&mut self) -> Result<IntegrityReport> {
        Ok(self.store.check_integrity()?)
    }

    pub fn reset(&mut self, confirmation: ResetConfirmation) -> Result<()> {
        Ok(self.store.reset(confirmation)?)
    }

    /// True when `path` lies under the configured root.
    pub fn is_under_root(&self, path: &Path) -> bool {
        path.starts_with(self.config.root_dir())
    }
}

fn offset_progress(progress: &Option<Progress>, offset: usize, total: usize) -> Option<Progress> {
    progress.as_ref().map(|p| {
        let p = Arc::clone(p);
        Arc::new(move |done: usize, _chunk_total: usize| p(offset + done, total)) as Progress
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library(dir: &TempDir) -> Library {
        let mut config = Config::default();
        config.general.root_dir = dir.path().to_path_buf();
        config.general.db_file = dir.path().join("db/mediadup.db");
        config.general.signature_cache_dir = dir.path().join("frames");
        config.hashing.block_size = 64;
        config.pipeline.batch_size = 2;
        Library::open(config).unwrap()
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_detect_and_add_then_cleanup() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        let listing: Vec<String> = (0..5)
            .map(|i| write(&dir, &format!("f{i}.bin"), &[i as u8; 10]))
            .collect();

        let report = lib.detect_and_add(&listing, None).await.unwrap();
        assert_eq!(report.committed, 5);
        assert!(report.failures.is_empty());

        // Idempotent: nothing new the second time.
        let report = lib.detect_and_add(&listing, None).await.unwrap();
        assert_eq!(report.committed, 0);

        assert_eq!(lib.cleanup(&listing[1..]).unwrap(), 1);
        assert_eq!(lib.store().count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_full_hash_pass_confirms_candidates_only() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        let mut content = vec![5u8; 1000];
        let a = write(&dir, "a.bin", &content);
        let b = write(&dir, "b.bin", &content);
        content[100] = 6; // outside the sampled windows
        let c = write(&dir, "c.bin", &content);
        let d = write(&dir, "d.bin", &[9u8; 1000]);
        let listing = vec![a.clone(), b.clone(), c.clone(), d.clone()];

        lib.detect_and_add(&listing, None).await.unwrap();
        let quick = lib.find_duplicates(&[GroupKey::Size, GroupKey::QuickHash]).unwrap();
        assert_eq!(quick.len(), 1);
        assert_eq!(quick[0].len(), 3);

        let report = lib.compute_full_hashes(None, None).await.unwrap();
        assert_eq!(report.committed, 3);
        assert!(lib.store().get(&d).unwrap().unwrap().full_hash.is_none());

        let exact = lib.find_duplicates(&GroupKey::FUNNEL).unwrap();
        assert_eq!(exact.len(), 1);
        let mut paths: Vec<&str> = exact[0].paths().collect();
        paths.sort_unstable();
        assert_eq!(paths, vec![a.as_str(), b.as_str()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        let present = write(&dir, "here.bin", b"x");
        let gone = dir.path().join("gone.bin").to_string_lossy().into_owned();

        let report = lib.detect_and_add(&[present, gone], None).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        let listing: Vec<String> = (0..5)
            .map(|i| write(&dir, &format!("p{i}.bin"), &[i as u8; 3]))
            .collect();

        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = max_seen.clone();
        let progress: Progress = Arc::new(move |done, total| {
            assert_eq!(total, 5);
            sink.fetch_max(done, std::sync::atomic::Ordering::SeqCst);
        });
        lib.detect_and_add(&listing, Some(progress)).await.unwrap();
        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_create_starts_empty_after_layout_change() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        let listing = vec![write(&dir, "x.bin", b"xyz")];
        lib.detect_and_add(&listing, None).await.unwrap();

        let mut config = lib.config().clone();
        drop(lib);
        config.hashing.block_size = 128;
        assert!(Library::open(config.clone()).is_err());
        assert!(Library::create(config.clone(), ResetConfirmation::Refused).is_err());

        let lib = Library::create(config, ResetConfirmation::Confirmed).unwrap();
        assert_eq!(lib.store().count().unwrap(), 0);
        assert_eq!(lib.store().layout().block_size, 128);
    }

    #[tokio::test]
    async fn test_cleanup_under_keeps_sibling_tree() {
        let dir = TempDir::new().unwrap();
        let mut lib = library(&dir);
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        let a1 = write(&dir, "a/one.bin", b"a1");
        let a2 = write(&dir, "a/two.bin", b"a2");
        let b1 = write(&dir, "b/one.bin", b"b1");
        let b2 = write(&dir, "b/two.bin", b"b22");
        let listing = vec![a1.clone(), a2.clone(), b1.clone(), b2.clone()];
        lib.detect_and_add(&listing, None).await.unwrap();

        // Rescan of b/ alone, after b/two.bin vanished.
        std::fs::remove_file(&b2).unwrap();
        let removed = lib
            .cleanup_under(&dir.path().join("b"), &[b1.clone()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(lib.store().get(&b2).unwrap().is_none());
        for kept in [&a1, &a2, &b1] {
            assert!(lib.store().get(kept).unwrap().is_some());
        }
    }

    #[test]
    fn test_open_rejects_zero_batch_size() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.general.root_dir = dir.path().to_path_buf();
        config.general.db_file = dir.path().join("mediadup.db");
        config.general.signature_cache_dir = dir.path().join("frames");
        config.pipeline.batch_size = 0;

        let err = Library::open(config.clone()).err().unwrap();
        assert!(err.to_string().contains("batch_size"));
        assert!(Library::create(config, ResetConfirmation::Confirmed).is_err());
        assert!(!dir.path().join("mediadup.db").exists());
    }

    #[tokio::test]
    async fn test_unvalidated_zero_batch_size_still_chunks() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.general.root_dir = dir.path().to_path_buf();
        config.pipeline.batch_size = 0;
        let store = MetadataStore::open_in_memory(StoreLayout::from_config(&config)).unwrap();
        let processor = BatchProcessor::new(&config);
        let mut lib = Library::with_parts(config, store, processor);

        let listing = vec![write(&dir, "z.bin", b"zz"), write(&dir, "y.bin", b"y")];
        let report = lib.detect_and_add(&listing, None).await.unwrap();
        assert_eq!(report.committed, 2);
    }
}
