//! Group listing commands: `dups` and `similar`.

use clap::{Args, ValueEnum};
use console::style;
use mediadup_core::media::human_size;
use mediadup_core::{Config, DuplicateGroup, GroupKey};

use super::open_library;

/// Strongest key the exact funnel goes up to.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum KeyArg {
    Size,
    Quick,
    #[default]
    Full,
}

impl KeyArg {
    /// Funnel prefix ending at this key.
    fn funnel(self) -> &'static [GroupKey] {
        match self {
            KeyArg::Size => &[GroupKey::Size],
            KeyArg::Quick => &[GroupKey::Size, GroupKey::QuickHash],
            KeyArg::Full => &GroupKey::FUNNEL,
        }
    }
}

/// Arguments for the `dups` command.
#[derive(Args, Debug)]
pub struct DupsArgs {
    /// Group up to this key (size, then quick hash, then full hash)
    #[arg(short, long, value_enum, default_value = "full")]
    pub key: KeyArg,

    /// Emit groups as a JSON array
    #[arg(long)]
    pub json: bool,
}

/// Which perceptual comparison to run.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SimilarKind {
    Images,
    Videos,
}

/// Arguments for the `similar` command.
#[derive(Args, Debug)]
pub struct SimilarArgs {
    #[arg(value_enum)]
    pub kind: SimilarKind,

    /// Override the configured distance threshold (0-255 channel scale)
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Emit groups as a JSON array
    #[arg(long)]
    pub json: bool,
}

/// Execute the dups command.
pub fn dups(config: Config, args: DupsArgs) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let groups = library.find_duplicates(args.key.funnel())?;
    print_groups(&groups, args.json)
}

/// Execute the similar command.
pub fn similar(mut config: Config, args: SimilarArgs) -> anyhow::Result<()> {
    if let Some(threshold) = args.threshold {
        match args.kind {
            SimilarKind::Images => config.similarity.image_threshold = threshold,
            SimilarKind::Videos => config.similarity.video_threshold = threshold,
        }
        config.validate()?;
    }
    let library = open_library(config)?;
    let groups = match args.kind {
        SimilarKind::Images => library.similar_images()?,
        SimilarKind::Videos => library.similar_videos()?,
    };
    print_groups(&groups, args.json)
}

fn print_groups(groups: &[DuplicateGroup], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(groups)?);
        return Ok(());
    }

    for (index, group) in groups.iter().enumerate() {
        println!(
            "{} {} files, {} reclaimable",
            style(format!("Group {}:", index + 1)).bold(),
            group.len(),
            human_size(group.redundant_bytes())
        );
        for path in group.paths() {
            println!("  {path}");
        }
    }

    let reclaimable: u64 = groups.iter().map(DuplicateGroup::redundant_bytes).sum();
    eprintln!(
        "{} groups, {} reclaimable",
        groups.len(),
        human_size(reclaimable)
    );
    Ok(())
}
