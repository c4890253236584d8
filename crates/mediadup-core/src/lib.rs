//! Mediadup Core - duplicate media detection library.
//!
//! Mediadup indexes a media tree into a SQLite store and finds duplicates
//! by narrowing candidates with progressively stronger keys:
//!
//! ```text
//! paths → size → quick hash (3 sampled blocks) → full hash
//!                          ↘ image grid signature / video color curve
//! ```
//!
//! Directory traversal is left to the caller; the library consumes a flat
//! list of paths.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mediadup_core::{Config, GroupKey, Library};
//!
//! #[tokio::main]
//! async fn main() -> mediadup_core::Result<()> {
//!     let config = Config::load()?;
//!     let mut library = Library::open(config)?;
//!
//!     let listing = vec!["/photos/a.jpg".to_string(), "/photos/b.jpg".to_string()];
//!     library.detect_and_add(&listing, None).await?;
//!     library.compute_full_hashes(None, None).await?;
//!
//!     for group in library.find_duplicates(&GroupKey::FUNNEL)? {
//!         println!("{:?}", group.paths().collect::<Vec<_>>());
//!     }
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod grouping;
pub mod library;
pub mod media;
pub mod pipeline;
pub mod store;

// Re-exports for convenient access
pub use config::Config;
pub use error::{
    ConfigError, MediadupError, PipelineError, PipelineResult, Result, StoreError, StoreResult,
};
pub use grouping::{DuplicateGroup, GroupKey, KnownDifferences};
pub use library::{Library, PassReport};
pub use media::{FileEntry, FileId, MediaAttributes, MediaKind, MediaRecord};
pub use pipeline::{BatchProcessor, ContentHasher, Digest, Progress};
pub use store::{IntegrityReport, MetadataStore, ResetConfirmation, StoreLayout};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
