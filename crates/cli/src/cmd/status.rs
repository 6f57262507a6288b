//! `librarian status` and `librarian config`

use anyhow::Result;
use clap::Args;
use comfy_table::Cell;

use librarian_core::{Config, Pipeline, SanitizedConfig};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print counts as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs, pipeline: &Pipeline) -> Result<()> {
    let stats = pipeline.stats()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let mut table = super::table(&["Catalog", "Count"]);
    table.add_row(vec![Cell::new("Items"), Cell::new(stats.items)]);
    table.add_row(vec![Cell::new("Files"), Cell::new(stats.files)]);
    table.add_row(vec![
        Cell::new("Size"),
        Cell::new(human_bytes(stats.total_size_bytes)),
    ]);
    table.add_row(vec![Cell::new("Open reviews"), Cell::new(stats.open_reviews)]);
    println!("{table}");

    let mut by_status = super::table(&["Status", "Files"]);
    for (status, count) in &stats.by_status {
        by_status.add_row(vec![Cell::new(status), Cell::new(count)]);
    }
    println!("{by_status}");

    if !stats.by_format.is_empty() {
        let mut by_format = super::table(&["Format", "Files"]);
        for (format, count) in &stats.by_format {
            by_format.add_row(vec![Cell::new(format), Cell::new(count)]);
        }
        println!("{by_format}");
    }
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let sanitized = SanitizedConfig::from(config);
    println!("{}", serde_json::to_string_pretty(&sanitized)?);
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
