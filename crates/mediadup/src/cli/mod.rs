//! Subcommand implementations and the helpers they share.

pub mod config;
pub mod groups;
pub mod passes;
pub mod scan;
pub mod store;
mod theme;

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use mediadup_core::{Config, Library, PassReport, Progress};

/// Open the configured library, pointing at `mediadup init` when the store
/// was built with other settings.
pub(crate) fn open_library(config: Config) -> anyhow::Result<Library> {
    match Library::open(config) {
        Ok(library) => Ok(library),
        Err(mediadup_core::MediadupError::Store(
            e @ mediadup_core::StoreError::ConfigMismatch { .. },
        )) => anyhow::bail!(
            "{e}\n\n  Hint: Restore the previous settings, or run `mediadup init` to rebuild the store."
        ),
        Err(e) => Err(e.into()),
    }
}

/// Progress bar fed by the core's `(done, total)` callback.
pub(crate) fn progress_bar(label: &str) -> (ProgressBar, Progress) {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_message(label.to_string());

    let sink = pb.clone();
    let progress: Progress = Arc::new(move |done, total| {
        sink.set_length(total as u64);
        sink.set_position(done as u64);
    });
    (pb, progress)
}

/// Log every failure and print a one-line summary of a pass.
pub(crate) fn report(label: &str, report: &PassReport) {
    for failure in &report.failures {
        tracing::error!("{failure}");
    }
    if report.failures.is_empty() {
        eprintln!("{label}: {} files updated", report.committed);
    } else {
        eprintln!(
            "{label}: {} files updated, {} failed (see log)",
            report.committed,
            report.failures.len()
        );
    }
}
