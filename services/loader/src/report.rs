//! Row filtering and run reporting.
//!
//! Unmatched rows are dropped here and counted. Dropping is the expected
//! path for labels with no province, so nothing in this module fails on
//! them; the count is always logged when non-zero.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::reconcile::ReconciledRecord;
use crate::records::{ColumnSpec, Value};

/// How many rows/labels to show in log previews
const PREVIEW_ROWS: usize = 5;

/// A row ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRow {
    pub line: usize,
    pub values: Vec<Value>,
    pub code: i64,
}

/// Result of dropping unresolved rows
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub rows: Vec<LoadRow>,
    pub total: usize,
    pub dropped: usize,
    /// Rows whose label matched more than one province (first one was used)
    pub ambiguous: usize,
    /// Distinct raw labels that matched nothing, sorted
    pub unmatched_labels: Vec<String>,
}

/// Keep resolved rows in input order and count the rest.
pub fn filter_resolved(records: Vec<ReconciledRecord>) -> FilterOutcome {
    let total = records.len();
    let mut rows = Vec::with_capacity(total);
    let mut ambiguous = 0;
    let mut unmatched: BTreeSet<String> = BTreeSet::new();

    for reconciled in records {
        if reconciled.ambiguous {
            ambiguous += 1;
        }
        match reconciled.code {
            Some(code) => rows.push(LoadRow {
                line: reconciled.record.line,
                values: reconciled.record.values,
                code,
            }),
            None => {
                unmatched.insert(reconciled.record.label.unwrap_or_default());
            }
        }
    }

    FilterOutcome {
        dropped: total - rows.len(),
        total,
        rows,
        ambiguous,
        unmatched_labels: unmatched.into_iter().collect(),
    }
}

impl FilterOutcome {
    /// Log counts, unmatched labels and a preview of the rows to load.
    pub fn log(&self, columns: &[ColumnSpec], code_column: &str) {
        info!(total = self.total, kept = self.rows.len(), "Reconciled rows");

        if self.dropped > 0 {
            warn!(
                dropped = self.dropped,
                remaining = self.rows.len(),
                "Dropped rows whose province matched no reference entry"
            );
            for label in self.unmatched_labels.iter().take(PREVIEW_ROWS) {
                warn!(label = %label, "Unmatched province label");
            }
            if self.unmatched_labels.len() > PREVIEW_ROWS {
                warn!("... and {} more labels", self.unmatched_labels.len() - PREVIEW_ROWS);
            }
        }

        if self.ambiguous > 0 {
            info!(
                ambiguous = self.ambiguous,
                "Rows whose label matched several provinces (first match used)"
            );
        }

        for spec in columns {
            info!(column = %spec.name, sql_type = spec.ty.sql_type(), "Column");
        }
        info!(column = %code_column, sql_type = "BIGINT", "Column");

        for row in self.rows.iter().take(PREVIEW_ROWS) {
            let values: Vec<String> = row.values.iter().map(Value::to_string).collect();
            info!(line = row.line, code = row.code, "  {}", values.join(" | "));
        }
        if self.rows.len() > PREVIEW_ROWS {
            info!("  ... and {} more", self.rows.len() - PREVIEW_ROWS);
        }
    }
}

/// Machine-readable record of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_path: PathBuf,
    pub input_sha256: String,
    pub target_table: String,
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub dropped_rows: usize,
    pub ambiguous_rows: usize,
    pub unmatched_labels: Vec<String>,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
