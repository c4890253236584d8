//! The `mediadup scan` command: list the media tree and reconcile the store
//! with it.

use std::path::{Path, PathBuf};

use clap::Args;
use mediadup_core::Config;
use walkdir::WalkDir;

use super::{open_library, progress_bar, report};

/// Arguments for the `scan` command.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Scan only this directory (default: `general.root_dir`). Cleanup is
    /// limited to records under it.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Keep records of files that no longer exist
    #[arg(long)]
    pub no_cleanup: bool,

    /// Follow symbolic links while walking the tree
    #[arg(long)]
    pub follow_links: bool,
}

/// Execute the scan command.
pub async fn execute(mut config: Config, args: ScanArgs) -> anyhow::Result<()> {
    let root = args.root.unwrap_or_else(|| config.root_dir());
    if !root.is_dir() {
        anyhow::bail!(
            "Media root is not a directory: {:?}\n\n  Hint: Set `general.root_dir` or pass --root.",
            root
        );
    }
    // Records are keyed by absolute path.
    let root = root.canonicalize()?;
    if let Ok(configured) = config.root_dir().canonicalize() {
        config.general.root_dir = configured;
    }

    let db = config.db_file();
    let cache = config.signature_cache_dir();
    let mut library = open_library(config)?;

    let db = db.canonicalize().unwrap_or(db);
    let excluded = vec![
        cache.canonicalize().unwrap_or(cache),
        sidecar(&db, "-wal"),
        sidecar(&db, "-shm"),
        sidecar(&db, "-journal"),
        db,
    ];
    let listing = list_files(&root, &excluded, args.follow_links);
    tracing::info!("Found {} files under {:?}", listing.len(), root);

    if !args.no_cleanup {
        let removed = library.cleanup_under(&root, &listing)?;
        if removed > 0 {
            eprintln!("Removed {removed} records of vanished files");
        }
    }

    let (pb, progress) = progress_bar("hashing new files");
    let outcome = library.detect_and_add(&listing, Some(progress)).await?;
    pb.finish_and_clear();
    report("Scan", &outcome);

    println!("{} files tracked", library.store().count()?);
    Ok(())
}

/// Every regular file under `root`, sorted, skipping anything under an
/// excluded path. Unreadable entries and non-UTF-8 paths are logged and
/// skipped.
pub fn list_files(root: &Path, excluded: &[PathBuf], follow_links: bool) -> Vec<String> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(follow_links)
        .into_iter()
        .filter_entry(|entry| !excluded.iter().any(|ex| entry.path().starts_with(ex)));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().to_str() {
            Some(path) => files.push(path.to_string()),
            None => tracing::warn!("Skipping non-UTF-8 path: {:?}", entry.path()),
        }
    }

    files.sort();
    files
}

fn sidecar(db: &Path, suffix: &str) -> PathBuf {
    let mut name = db.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
