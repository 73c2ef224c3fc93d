//! Loader Service - Loads temperature records keyed by province code
//!
//! Responsibilities:
//! - Read the measurements CSV (free-text `provincia` column)
//! - Read the `provincias` reference table
//! - Reconcile each label to a province code (normalize, override, contains)
//! - Drop rows with no match and report how many
//! - Replace `datos_meteorologicos` with the reconciled rows in batches
//!
//! Usage:
//!   cargo run --bin loader -- --input data/temperaturas_limpias.csv
//!   cargo run --bin loader -- --input data/t.csv --overrides config/overrides.json --dry-run
//!
//! Reconciliation is deterministic: same file + same reference table +
//! same overrides = same rows.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use sqlx::Connection;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use loader::config::DbConfig;
use loader::db::{self, ReferenceTable, TargetTable};
use loader::reconcile::{OverrideMap, Reconciler};
use loader::records::{self, ReadOptions};
use loader::report::{filter_resolved, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads temperature records with reconciled province codes")]
struct Args {
    /// Measurements file
    #[arg(long, default_value = "data/temperaturas_limpias.csv")]
    input: PathBuf,

    /// Field delimiter (single ASCII character)
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Input encoding label (utf-8, windows-1252, latin1, ...)
    #[arg(long, default_value = "utf-8")]
    encoding: String,

    /// Column holding the free-text province label
    #[arg(long, default_value = "provincia")]
    label_column: String,

    /// JSON object of extra label overrides, e.g. {"gran canaria": "las palmas"}
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Reference table of provinces
    #[arg(long, default_value = "provincias")]
    reference_table: String,

    /// Province name column in the reference table
    #[arg(long, default_value = "nombre")]
    name_column: String,

    /// Province code column (reference table and destination)
    #[arg(long, default_value = "codigo_prov")]
    code_column: String,

    /// Destination table (replaced on every run)
    #[arg(long, default_value = "datos_meteorologicos")]
    target_table: String,

    /// Rows per INSERT statement
    #[arg(long, default_value_t = 500)]
    batch_size: usize,

    /// Dry run - reconcile but don't write to the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn read_options(&self) -> Result<ReadOptions> {
        if !self.delimiter.is_ascii() {
            anyhow::bail!("--delimiter must be a single ASCII character");
        }
        Ok(ReadOptions {
            delimiter: self.delimiter as u8,
            encoding: self.encoding.clone(),
            label_column: self.label_column.clone(),
            code_column: self.code_column.clone(),
        })
    }

    fn reference_table(&self) -> ReferenceTable {
        ReferenceTable {
            table: self.reference_table.clone(),
            name_column: self.name_column.clone(),
            code_column: self.code_column.clone(),
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args, run_id: Uuid) -> Result<RunSummary> {
    let started_at = Utc::now();
    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }
    let read_options = args.read_options()?;
    let db_config = DbConfig::from_env().context("Invalid database configuration")?;

    // Input file
    info!(path = %args.input.display(), "Reading input");
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let input_sha256 = records::fingerprint(&bytes);
    info!(bytes = bytes.len(), hash = %input_sha256, "Input loaded");

    let table = records::read_records(&bytes, &read_options).context("Failed to parse input")?;
    info!(rows = table.records.len(), columns = table.columns.len() + 1, "Parsed input");

    // Overrides
    let overrides = match &args.overrides {
        Some(path) => OverrideMap::load(path).context("Failed to load overrides")?,
        None => OverrideMap::builtin(),
    };
    info!(entries = overrides.len(), "Overrides ready");

    // Reference
    info!(db = %db_config.describe(), "Connecting to database");
    let mut conn = db::connect(&db_config)
        .await
        .context("Failed to connect to database")?;

    let reference_table = args.reference_table();
    let reference = db::fetch_reference(&mut conn, &reference_table)
        .await
        .with_context(|| format!("Failed to read reference table {}", reference_table.table))?;
    info!(table = %reference_table.table, provinces = reference.len(), "Reference loaded");
    if reference.is_empty() {
        warn!("Reference table is empty; every row will be dropped");
    }
    for p in reference.iter().take(5) {
        info!(code = p.code, province = p.name.as_deref().unwrap_or("NULL"), "  Reference row");
    }

    // Reconcile and filter
    info!("Reconciling province labels");
    let reconciler = Reconciler::new(&reference, overrides);
    let outcome = filter_resolved(reconciler.reconcile_all(table.records));
    outcome.log(&table.columns, &args.code_column);

    // Write
    let target = TargetTable {
        table: args.target_table.clone(),
        columns: table.columns,
        code_column: args.code_column.clone(),
    };

    let loaded_rows = if args.dry_run {
        info!(rows = outcome.rows.len(), table = %target.table, "Dry run - nothing written");
        0
    } else {
        info!(rows = outcome.rows.len(), table = %target.table, "Replacing table contents");
        let inserted = db::write_rows(&mut conn, &target, &outcome.rows, args.batch_size)
            .await
            .with_context(|| format!("Failed to write {}", target.table))?;
        inserted as usize
    };

    conn.close().await.context("Failed to close connection")?;

    Ok(RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        input_path: args.input.clone(),
        input_sha256,
        target_table: target.table,
        total_rows: outcome.total,
        loaded_rows,
        dropped_rows: outcome.dropped,
        ambiguous_rows: outcome.ambiguous,
        unmatched_labels: outcome.unmatched_labels,
        dry_run: args.dry_run,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    let run_id = Uuid::new_v4();
    let summary_path = args.summary_json.clone();

    let summary = run(args, run_id)
        .instrument(info_span!("load", %run_id))
        .await?;

    info!(
        total = summary.total_rows,
        loaded = summary.loaded_rows,
        dropped = summary.dropped_rows,
        "Load complete"
    );

    if let Some(path) = summary_path {
        summary
            .write_json(&path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["loader"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_args_defaults() {
        let args = args(&[]);
        assert_eq!(args.input, PathBuf::from("data/temperaturas_limpias.csv"));
        assert_eq!(args.batch_size, 500);
        assert_eq!(args.target_table, "datos_meteorologicos");
        assert!(!args.dry_run);

        let options = args.read_options().unwrap();
        assert_eq!(options.delimiter, b',');
        assert_eq!(options.label_column, "provincia");
        assert_eq!(options.code_column, "codigo_prov");

        let reference = args.reference_table();
        assert_eq!(reference.table, "provincias");
        assert_eq!(reference.name_column, "nombre");
        assert_eq!(reference.code_column, "codigo_prov");
    }

    #[test]
    fn test_args_overrides() {
        let args = args(&[
            "--input", "t.csv", "--delimiter", ";", "--batch-size", "100", "--dry-run",
        ]);
        assert_eq!(args.input, PathBuf::from("t.csv"));
        assert_eq!(args.batch_size, 100);
        assert!(args.dry_run);
        assert_eq!(args.read_options().unwrap().delimiter, b';');
    }

    #[test]
    fn test_args_non_ascii_delimiter_rejected() {
        let args = args(&["--delimiter", "¦"]);
        assert!(args.read_options().is_err());
    }
}
