// Command line entry point: run the whole batch once.
//
// Loads the TOML configuration, runs every stage, writes the output tables
// and prints a short summary followed by a preview of the indicator grid.
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mensa_pipeline::pipeline::{self, PipelineOutput};
use mensa_pipeline::{output, util, PipelineConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mensa-pipeline")]
#[command(about = "Clean canteen menu data and aggregate monthly supply indicators")]
#[command(version)]
struct Args {
    /// Pipeline configuration (TOML)
    #[arg(long, default_value = "config/pipeline.toml")]
    config: PathBuf,

    /// Directory the output tables are written to
    #[arg(long, default_value = "data/processed_data")]
    out: PathBuf,

    /// Number of indicator rows to preview
    #[arg(long, default_value_t = 5)]
    preview: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Print the per-stage counts of a finished run.
fn print_summary(out: &PipelineOutput) {
    let r = &out.report;
    for s in &r.sources {
        println!(
            "{}: {} rows read, {} loaded ({} malformed, {} repeated ids)",
            s.source,
            util::format_int(s.total_rows),
            util::format_int(s.loaded_rows),
            util::format_int(s.malformed_rows),
            util::format_int(s.duplicate_ids)
        );
    }
    println!("");
    println!(
        "Canteens: {} in target country, {} university canteens kept.",
        util::format_int(r.geo.kept),
        util::format_int(r.organizations.kept)
    );
    println!(
        "Days: {} dates repaired, {} kept.",
        util::format_int(r.days.repaired),
        util::format_int(r.days.kept)
    );
    println!(
        "Meals: {} kept ({} duplicates, {} pseudo meals, {} prices nulled).",
        util::format_int(r.meals.kept),
        util::format_int(r.meals.duplicates_dropped),
        util::format_int(r.meals.closure_notices + r.meals.placeholders + r.meals.announcements),
        util::format_int(r.meals.prices_nulled)
    );
    println!(
        "Notes: {} distinct notes in use, {} cover {}% of usages.",
        util::format_int(r.notes.distinct_notes),
        util::format_int(r.notes.common_notes),
        util::format_number(
            out.note_frequencies
                .iter()
                .take(r.notes.common_notes)
                .last()
                .map(|f| f.cum_percent)
                .unwrap_or(0.0),
            2
        )
    );
    println!(
        "Indicators: {} rows ({} canteens x {} months), {} with data.\n",
        util::format_int(r.indicators.rows),
        util::format_int(r.indicators.canteens),
        util::format_int(r.indicators.months),
        util::format_int(r.indicators.rows_with_data)
    );
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "mensa_pipeline=debug" } else { "mensa_pipeline=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_path(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;

    println!("Processing dataset...");
    let out = pipeline::run_from_config(&config).context("pipeline run failed")?;
    print_summary(&out);

    let written = output::write_outputs(&args.out, &out)
        .with_context(|| format!("failed to write outputs to {}", args.out.display()))?;
    println!("Outputs saved to {}:", args.out.display());
    for p in &written {
        println!("  {}", p.display());
    }
    println!("");

    println!("Monthly indicators (first {} rows)\n", args.preview);
    output::preview_table_rows(&out.indicators, args.preview);
    Ok(())
}
