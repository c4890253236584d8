//! Bulk computation commands: `hash`, `signatures`, and single-file `process`.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use mediadup_core::Config;

use super::{open_library, progress_bar, report};

/// Arguments for the `hash` command.
#[derive(Args, Debug)]
pub struct HashArgs {
    /// Hash these tracked files instead of the quick-hash collision candidates
    pub paths: Vec<PathBuf>,
}

/// Which signature pass to run.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SignatureKind {
    /// Grid signatures for images
    Images,
    /// Color curves for videos (needs ffmpeg and ffprobe)
    Videos,
}

/// Arguments for the `signatures` command.
#[derive(Args, Debug)]
pub struct SignaturesArgs {
    #[arg(value_enum)]
    pub kind: SignatureKind,

    /// Recompute for these tracked files instead of those still missing one
    pub paths: Vec<PathBuf>,
}

/// Arguments for the `process` command.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// File to hash and fingerprint
    pub path: PathBuf,

    /// Print the stored record as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the hash command.
pub async fn hash(config: Config, args: HashArgs) -> anyhow::Result<()> {
    let mut library = open_library(config)?;
    let (pb, progress) = progress_bar("full hashes");
    let outcome = library
        .compute_full_hashes(explicit(args.paths), Some(progress))
        .await?;
    pb.finish_and_clear();
    report("Full hashes", &outcome);
    Ok(())
}

/// Execute the signatures command.
pub async fn signatures(config: Config, args: SignaturesArgs) -> anyhow::Result<()> {
    let mut library = open_library(config)?;
    let paths = explicit(args.paths);
    let outcome = match args.kind {
        SignatureKind::Images => {
            let (pb, progress) = progress_bar("image signatures");
            let outcome = library.compute_image_signatures(paths, Some(progress)).await?;
            pb.finish_and_clear();
            outcome
        }
        SignatureKind::Videos => {
            if !mediadup_core::pipeline::FfmpegDecoder::default().is_available() {
                tracing::warn!("ffprobe/ffmpeg not found on PATH; every video will fail to decode");
            }
            let (pb, progress) = progress_bar("video color curves");
            let outcome = library.compute_video_signatures(paths, Some(progress)).await?;
            pb.finish_and_clear();
            outcome
        }
    };
    report("Signatures", &outcome);
    Ok(())
}

/// Execute the process command.
pub fn process(config: Config, args: ProcessArgs) -> anyhow::Result<()> {
    let mut library = open_library(config)?;
    let path = args
        .path
        .canonicalize()
        .unwrap_or_else(|_| args.path.clone());
    if !library.is_under_root(&path) {
        tracing::warn!("{:?} is outside the configured media root", path);
    }
    let Some(path) = path.to_str() else {
        anyhow::bail!("Path is not valid UTF-8: {:?}", path);
    };

    let record = library.process_file(path)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{record}");
    }
    Ok(())
}

fn explicit(paths: Vec<PathBuf>) -> Option<Vec<String>> {
    if paths.is_empty() {
        return None;
    }
    Some(
        paths
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_paths_means_default_candidates() {
        assert_eq!(explicit(Vec::new()), None);
        assert_eq!(
            explicit(vec![PathBuf::from("/a.jpg")]),
            Some(vec!["/a.jpg".to_string()])
        );
    }
}
