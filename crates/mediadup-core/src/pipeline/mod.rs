//! Per-file computation pipeline.
//!
//! - **hash**: quick (sampled) and full content hashes
//! - **decode**: pluggable image and video decoders
//! - **pool**: bounded blocking worker pool with progress reporting
//! - **processor**: runs hashing and fingerprint passes over batches

pub mod decode;
pub mod hash;
pub mod pool;
pub mod processor;

// Re-exports for convenient access
pub use decode::{FfmpegDecoder, ImageDecoder, RasterDecoder, VideoDecoder};
pub use hash::{ContentHasher, Digest, QuickHash, DIGEST_LEN};
pub use pool::{Progress, WorkItem, WorkerPool};
pub use processor::{BatchOutcome, BatchProcessor};
