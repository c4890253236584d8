//! Mediadup CLI - find exact and visually similar duplicate media files.
//!
//! Mediadup indexes a media tree into a SQLite store, then groups files by
//! size, sampled quick hash and full hash, or by perceptual signatures for
//! images and videos.
//!
//! # Usage
//!
//! ```bash
//! # Index the configured tree (or another root)
//! mediadup scan
//! mediadup scan --root ~/Pictures
//!
//! # Confirm quick-hash collisions with full hashes, then list duplicates
//! mediadup hash
//! mediadup dups
//!
//! # Perceptual near-duplicates
//! mediadup signatures images
//! mediadup similar images
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Mediadup - find exact and visually similar duplicate media files.
#[derive(Parser, Debug)]
#[command(name = "mediadup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true, env = "MEDIADUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Wipe the metadata store and start over
    Init(cli::store::InitArgs),

    /// Reconcile the store with the files under the media root
    Scan(cli::scan::ScanArgs),

    /// Compute full hashes for files whose quick hashes collide
    Hash(cli::passes::HashArgs),

    /// Compute perceptual signatures for images or videos
    Signatures(cli::passes::SignaturesArgs),

    /// Hash and fingerprint a single file and print its record
    Process(cli::passes::ProcessArgs),

    /// List exact duplicate groups
    Dups(cli::groups::DupsArgs),

    /// List perceptually similar groups
    Similar(cli::groups::SimilarArgs),

    /// Declare, withdraw or list known differences
    KnownDiff(cli::store::KnownDiffArgs),

    /// Check and repair store consistency
    Check,

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = match &cli.config {
        Some(path) => mediadup_core::Config::load_from(path)?,
        None => match mediadup_core::Config::load() {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load config: {e}\n  \
                     Using default configuration. Check your config file with `mediadup config path`."
                );
                mediadup_core::Config::default()
            }
        },
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Mediadup v{}", mediadup_core::VERSION);

    match cli.command {
        Commands::Init(args) => cli::store::init(config, args),
        Commands::Scan(args) => cli::scan::execute(config, args).await,
        Commands::Hash(args) => cli::passes::hash(config, args).await,
        Commands::Signatures(args) => cli::passes::signatures(config, args).await,
        Commands::Process(args) => cli::passes::process(config, args),
        Commands::Dups(args) => cli::groups::dups(config, args),
        Commands::Similar(args) => cli::groups::similar(config, args),
        Commands::KnownDiff(args) => cli::store::known_diff(config, args),
        Commands::Check => cli::store::check(config),
        Commands::Config(args) => cli::config::execute(config, cli.config, args),
    }
}
