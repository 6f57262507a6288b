//! `librarian scan`, `librarian run` and `librarian rescan`

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use comfy_table::{Cell, Color};
use tracing::warn;

use librarian_core::{
    BookFormat, CancellationFlag, Disposition, Pipeline, RescanOptions, RunOptions, SourceStatus,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stop after this many files
    #[arg(long)]
    pub limit: Option<usize>,

    /// Files fetched per batch (default: pipeline.batch_size)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Show where files would go without moving anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RescanStatus {
    Failed,
    Pending,
    All,
}

#[derive(Args, Debug)]
pub struct RescanArgs {
    /// Which recorded files to re-inspect
    #[arg(long, value_enum, default_value = "failed")]
    pub status: RescanStatus,

    /// Only files of this format (epub, pdf, mobi, ...)
    #[arg(long)]
    pub format: Option<String>,

    /// Stop after this many files
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn scan(pipeline: &Pipeline) -> Result<()> {
    let summary = pipeline.scan().await?;
    println!(
        "{} files found: {} new, {} already known, {} failed",
        summary.discovered, summary.recorded, summary.known, summary.failed
    );
    if summary.duplicates > 0 {
        println!("{} identical copies set aside", summary.duplicates);
    }
    if summary.reset > 0 {
        println!("{} interrupted files returned to pending", summary.reset);
    }
    Ok(())
}

pub async fn rescan(args: RescanArgs, pipeline: &Pipeline) -> Result<()> {
    let statuses = match args.status {
        RescanStatus::Failed => vec![SourceStatus::Failed],
        RescanStatus::Pending => vec![SourceStatus::Pending],
        RescanStatus::All => vec![SourceStatus::Failed, SourceStatus::Pending],
    };
    let mut options = RescanOptions::failed().with_statuses(statuses);
    if let Some(format) = &args.format {
        let format =
            BookFormat::parse(format).ok_or_else(|| anyhow!("Unknown format: {}", format))?;
        options = options.with_format(format);
    }
    if let Some(limit) = args.limit {
        options = options.with_limit(limit);
    }

    let summary = pipeline.rescan(options).await?;
    println!(
        "{} examined: {} updated ({} recovered), {} still failing, {} changed, {} missing",
        summary.examined,
        summary.updated,
        summary.recovered,
        summary.failed,
        summary.changed,
        summary.missing
    );
    if summary.changed > 0 {
        println!("Changed files are recorded as new by the next scan");
    }
    if summary.duplicates > 0 {
        println!("{} identical copies set aside", summary.duplicates);
    }
    Ok(())
}

pub async fn run(args: RunArgs, pipeline: &Pipeline) -> Result<()> {
    let options = RunOptions {
        limit: args.limit,
        batch_size: args.batch_size,
        dry_run: args.dry_run,
    };

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing files in flight");
            on_signal.cancel();
        }
    });

    let summary = pipeline.run(options, cancel).await?;

    if !summary.outcomes.is_empty() {
        let mut table = super::table(&["Source", "Outcome", "Detail"]);
        for outcome in &summary.outcomes {
            let name = outcome
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| outcome.path.display().to_string());
            let (label, color, detail) = describe(&outcome.disposition);
            table.add_row(vec![
                Cell::new(name),
                Cell::new(label).fg(color),
                Cell::new(detail),
            ]);
        }
        println!("{table}");
    }

    let mut line = format!(
        "{} processed: {} filed, {} duplicate, {} for review, {} failed",
        summary.total, summary.migrated, summary.duplicate, summary.needs_review, summary.failed
    );
    if args.dry_run {
        line.push_str(&format!(", {} planned (dry run)", summary.planned));
    }
    if summary.deferred > 0 {
        line.push_str(&format!(", {} deferred to the next run", summary.deferred));
    }
    if summary.skipped > 0 {
        line.push_str(&format!(", {} skipped", summary.skipped));
    }
    println!("{line}");
    if summary.cancelled {
        println!("Run cancelled; remaining files stay pending");
    }
    Ok(())
}

fn describe(disposition: &Disposition) -> (&'static str, Color, String) {
    match disposition {
        Disposition::Migrated {
            item_id,
            target,
            new_item,
        } => (
            "filed",
            Color::Green,
            format!(
                "{} (item {}{})",
                target.display(),
                item_id,
                if *new_item { ", new" } else { "" }
            ),
        ),
        Disposition::Duplicate { item_id } => {
            ("duplicate", Color::DarkGrey, format!("of item {}", item_id))
        }
        Disposition::NeedsReview {
            review_id,
            reason,
            confidence,
        } => (
            "review",
            Color::Yellow,
            match review_id {
                Some(id) => format!("#{} {} ({:.2})", id, reason, confidence),
                None => format!("{} ({:.2})", reason, confidence),
            },
        ),
        Disposition::Failed { error } => ("failed", Color::Red, error.clone()),
        Disposition::Deferred { error } => ("deferred", Color::Magenta, error.clone()),
        Disposition::Planned { target } => ("planned", Color::Cyan, target.display().to_string()),
        Disposition::Skipped { reason } => ("skipped", Color::DarkGrey, reason.clone()),
    }
}
