//! `librarian review` - work through files held for review

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color};

use librarian_core::{Hint, Pipeline, ReviewEntry, ReviewFilter, ReviewState, TerminalDecision};

#[derive(Args, Debug)]
pub struct ReviewArgs {
    #[command(subcommand)]
    pub action: ReviewAction,
}

#[derive(Subcommand, Debug)]
pub enum ReviewAction {
    /// List entries (open ones by default)
    List {
        /// Include closed entries
        #[arg(long)]
        all: bool,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Show one entry in full
    Show { id: i64 },
    /// Find entries by title, author, path or note
    Search { text: String },
    /// Re-run lookups with a corrected ISBN or title/author
    Retry {
        id: i64,

        #[arg(long, conflicts_with = "title", required_unless_present = "title")]
        isbn: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, requires = "title")]
        author: Option<String>,
    },
    /// File with the held metadata regardless of confidence
    Force { id: i64 },
    /// Leave the file where it is and close the entry
    Skip { id: i64 },
    /// Close the entry as a copy of an existing catalog item
    Duplicate {
        id: i64,

        /// Catalog item the file duplicates
        #[arg(long)]
        item: i64,
    },
}

pub async fn run(args: ReviewArgs, pipeline: &Pipeline) -> Result<()> {
    match args.action {
        ReviewAction::List { all, limit } => {
            let filter = if all {
                ReviewFilter::new()
            } else {
                ReviewFilter::open()
            };
            let entries = pipeline.review().list(&filter.with_limit(limit))?;
            print_entries(&entries);
            Ok(())
        }
        ReviewAction::Show { id } => show(pipeline, id),
        ReviewAction::Search { text } => {
            let entries = pipeline.review().search(&text)?;
            print_entries(&entries);
            Ok(())
        }
        ReviewAction::Retry {
            id,
            isbn,
            title,
            author,
        } => {
            let hint = match (isbn, title) {
                (Some(isbn), _) => Hint::isbn(isbn),
                (None, Some(title)) => Hint::title_author(title, author),
                (None, None) => bail!("retry needs --isbn or --title"),
            };
            let entry = pipeline
                .retry_review(id, &hint)
                .await
                .with_context(|| format!("Retry of review {} failed", id))?;
            report(&entry);
            Ok(())
        }
        ReviewAction::Force { id } => {
            let entry = pipeline.force_review(id).await?;
            report(&entry);
            Ok(())
        }
        ReviewAction::Skip { id } => {
            let entry = pipeline.close_review(id, TerminalDecision::Skipped).await?;
            report(&entry);
            Ok(())
        }
        ReviewAction::Duplicate { id, item } => {
            let entry = pipeline
                .close_review(id, TerminalDecision::Duplicate { item_id: item })
                .await?;
            report(&entry);
            Ok(())
        }
    }
}

fn print_entries(entries: &[ReviewEntry]) {
    if entries.is_empty() {
        println!("No review entries.");
        return;
    }
    let mut table = super::table(&["ID", "State", "Reason", "Title", "Authors", "Classification"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(entry.state).fg(state_color(entry.state)),
            Cell::new(entry.reason),
            Cell::new(entry.merged.title.as_deref().unwrap_or("-")),
            Cell::new(entry.merged.authors.join(", ")),
            Cell::new(entry.classification.describe()),
        ]);
    }
    println!("{table}");
    println!("{} entries", entries.len());
}

fn show(pipeline: &Pipeline, id: i64) -> Result<()> {
    let entry = pipeline.review().get(id)?;
    let source = pipeline.catalog().get_source_file(entry.source_file_id)?;

    let mut table = super::table(&["Field", "Value"]);
    table.add_row(vec![Cell::new("State"), Cell::new(entry.state)]);
    table.add_row(vec![Cell::new("Reason"), Cell::new(entry.reason)]);
    if let Some(source) = &source {
        table.add_row(vec![Cell::new("File"), Cell::new(source.path.display())]);
        table.add_row(vec![
            Cell::new("Format"),
            Cell::new(
                source
                    .format
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
        table.add_row(vec![Cell::new("SHA-256"), Cell::new(&source.checksums.sha256)]);
    }
    let merged = &entry.merged;
    table.add_row(vec![
        Cell::new("Title"),
        Cell::new(merged.title.as_deref().unwrap_or("-")),
    ]);
    table.add_row(vec![Cell::new("Authors"), Cell::new(merged.authors.join(", "))]);
    for (scheme, value) in &merged.identifiers {
        table.add_row(vec![Cell::new(scheme), Cell::new(value)]);
    }
    if !merged.subjects.is_empty() {
        table.add_row(vec![Cell::new("Subjects"), Cell::new(merged.subjects.join("; "))]);
    }
    table.add_row(vec![
        Cell::new("Classification"),
        Cell::new(entry.classification.describe()),
    ]);
    for hint in &entry.hints {
        table.add_row(vec![
            Cell::new(format!("Hint ({})", hint.source)),
            Cell::new(&hint.code),
        ]);
    }
    if let Some(note) = &entry.note {
        table.add_row(vec![Cell::new("Note"), Cell::new(note)]);
    }
    if let Some(item_id) = entry.item_id {
        table.add_row(vec![Cell::new("Item"), Cell::new(item_id)]);
    }
    println!("{table}");
    Ok(())
}

fn report(entry: &ReviewEntry) {
    match entry.state {
        ReviewState::Filed => println!(
            "Review {} filed as item {}",
            entry.id,
            entry.item_id.unwrap_or_default()
        ),
        ReviewState::Duplicate => println!(
            "Review {} closed as duplicate of item {}",
            entry.id,
            entry.item_id.unwrap_or_default()
        ),
        ReviewState::Skipped => println!("Review {} skipped", entry.id),
        ReviewState::Pending | ReviewState::Searching => {
            println!(
                "Review {} still open: {}",
                entry.id,
                entry
                    .note
                    .clone()
                    .unwrap_or_else(|| entry.classification.describe())
            );
        }
    }
}

fn state_color(state: ReviewState) -> Color {
    match state {
        ReviewState::Pending => Color::Yellow,
        ReviewState::Searching => Color::Cyan,
        ReviewState::Filed => Color::Green,
        ReviewState::Skipped | ReviewState::Duplicate => Color::DarkGrey,
    }
}
