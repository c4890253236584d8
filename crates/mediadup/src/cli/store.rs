//! Store maintenance commands: `init`, `known-diff` and `check`.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::Term;
use dialoguer::Confirm;
use mediadup_core::{Config, FileId, Library, ResetConfirmation};

use super::open_library;
use super::theme::confirm_theme;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the `known-diff` command.
#[derive(Args, Debug)]
pub struct KnownDiffArgs {
    #[command(subcommand)]
    pub command: KnownDiffCommand,
}

#[derive(Subcommand, Debug)]
pub enum KnownDiffCommand {
    /// Declare two tracked files different so they never group together
    Add { first: PathBuf, second: PathBuf },

    /// Withdraw a declaration
    Remove { first: PathBuf, second: PathBuf },

    /// List declared pairs
    List,
}

/// Execute the init command.
pub fn init(config: Config, args: InitArgs) -> anyhow::Result<()> {
    let db = config.db_file();
    let confirmation = if args.yes {
        ResetConfirmation::Confirmed
    } else if !Term::stderr().is_term() {
        anyhow::bail!("Refusing to wipe {:?} without a terminal; pass --yes to confirm.", db);
    } else {
        ask(&format!("Delete every record in {}?", db.display()))?
    };

    if confirmation == ResetConfirmation::Refused {
        eprintln!("Aborted; store left untouched.");
        return Ok(());
    }
    Library::create(config, confirmation)?;
    println!("Initialized empty store at {}", db.display());
    Ok(())
}

/// Ctrl-C at the prompt counts as a refusal.
fn ask(prompt: &str) -> anyhow::Result<ResetConfirmation> {
    let answer = Confirm::with_theme(&confirm_theme())
        .with_prompt(prompt)
        .default(false)
        .interact();
    match answer {
        Ok(confirmed) => Ok(confirmed.into()),
        Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
            Ok(ResetConfirmation::Refused)
        }
        Err(e) => Err(e.into()),
    }
}

/// Execute the known-diff command.
pub fn known_diff(config: Config, args: KnownDiffArgs) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let store = library.store();

    match args.command {
        KnownDiffCommand::Add { first, second } => {
            let (a, b) = library.mark_different(&tracked(&first), &tracked(&second))?;
            println!("Marked files {a} and {b} as different");
        }

        KnownDiffCommand::Remove { first, second } => {
            let a = id_of(&library, &first)?;
            let b = id_of(&library, &second)?;
            if store.remove_known_difference(a, b)? {
                println!("Removed known difference between {a} and {b}");
            } else {
                eprintln!("No known difference between {a} and {b}");
            }
        }

        KnownDiffCommand::List => {
            let pairs = store.known_differences()?.sorted_pairs();
            for (a, b) in &pairs {
                let entries = store.entries_by_ids(&[*a, *b])?;
                let path = |id: FileId| {
                    entries
                        .iter()
                        .find(|e| e.id == id)
                        .map_or("<missing>", |e| e.path.as_str())
                };
                println!("{a}\t{b}\t{}\t{}", path(*a), path(*b));
            }
            eprintln!("{} known differences", pairs.len());
        }
    }
    Ok(())
}

/// Execute the check command.
pub fn check(config: Config) -> anyhow::Result<()> {
    let mut library = open_library(config)?;
    let report = library.check_integrity()?;

    if report.is_clean() {
        println!("Store is consistent");
        return Ok(());
    }
    println!("Repaired:");
    println!("  orphan attribute rows removed:      {}", report.orphan_attribute_rows);
    println!("  misfiled attribute rows removed:    {}", report.mismatched_attribute_rows);
    println!("  missing attribute rows recreated:   {}", report.missing_attribute_rows);
    println!("  dangling known differences removed: {}", report.dangling_known_differences);
    if report.unknown_kind_rows > 0 {
        println!("Files with an unknown kind (left as is): {}", report.unknown_kind_rows);
    }
    Ok(())
}

/// Paths are stored absolute; resolve what the user typed the same way.
fn tracked(path: &std::path::Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn id_of(library: &Library, path: &std::path::Path) -> anyhow::Result<FileId> {
    let path = tracked(path);
    match library.store().get_entry(&path)? {
        Some(entry) => Ok(entry.id),
        None => anyhow::bail!("Not a tracked file: {path}"),
    }
}
