//! Province-reconciling loader for temperature records.
//!
//! Pipeline: read the measurements file, normalize each province label,
//! apply known overrides, look the label up by substring containment in
//! the reference table, drop rows that match nothing, and bulk-write the
//! rest.
//!
//! ```
//! use loader::reconcile::{reconcile, OverrideMap, ReferenceProvince};
//!
//! let reference = vec![
//!     ReferenceProvince { code: 7, name: Some("Illes Balears".into()) },
//!     ReferenceProvince { code: 38, name: Some("Santa Cruz de Tenerife".into()) },
//! ];
//! let overrides = OverrideMap::builtin();
//!
//! assert_eq!(reconcile("BALEARES", &reference, &overrides), Some(7));
//! assert_eq!(reconcile("STA. CRUZ DE TENERIFE", &reference, &overrides), Some(38));
//! assert_eq!(reconcile("Atlantis", &reference, &overrides), None);
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod normalize;
pub mod reconcile;
pub mod records;
pub mod report;

pub use error::{LoadError, Result};
pub use normalize::{normalize, normalize_label};
pub use reconcile::{reconcile, OverrideMap, ReconciledRecord, Reconciler, ReferenceProvince, Resolution};
pub use records::{ColumnSpec, ColumnType, InputTable, RawRecord, ReadOptions, Value};
pub use report::{filter_resolved, FilterOutcome, LoadRow, RunSummary};
