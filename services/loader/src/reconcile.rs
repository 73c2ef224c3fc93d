//! Province reconciliation.
//!
//! Maps a free-text province label to a reference province code:
//!
//! ```text
//! reconcile = lookup ∘ override ∘ normalize
//! ```
//!
//! The lookup is a literal substring search: the first reference entry
//! (in table order) whose normalized name contains the normalized label
//! wins. Ties are not scored. Loaded data depends on this ordering, so it
//! must stay stable.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{LoadError, Result};
use crate::normalize::normalize_label;
use crate::records::RawRecord;

/// Known label discrepancies between the measurement files and the
/// reference table. Keys and values are already normalized.
const BUILTIN_OVERRIDES: &[(&str, &str)] = &[
    ("sta cruz de tenerife", "santa cruz de tenerife"),
    ("baleares", "illes balears"),
];

// =============================================================================
// Reference data
// =============================================================================

/// A row of the reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceProvince {
    pub code: i64,
    pub name: Option<String>,
}

impl ReferenceProvince {
    /// Build a reference entry from the raw text of its code column.
    ///
    /// Integer text ("8") and integral decimal text ("8.0", as NUMERIC
    /// columns render) are accepted. Anything else is fatal.
    pub fn from_raw(name: Option<String>, raw_code: Option<&str>) -> Result<Self> {
        let coerced = raw_code.and_then(coerce_code);
        match coerced {
            Some(code) => Ok(Self { code, name }),
            None => Err(LoadError::CodeCoercion {
                name: name.unwrap_or_default(),
                value: raw_code.unwrap_or("NULL").to_string(),
            }),
        }
    }
}

/// Coerce a code to an exact non-negative integer.
///
/// Parsed as text only: a fractional part must be all zeros and the
/// integer part must fit in `i64`. No floating point is involved.
pub fn coerce_code(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let integral = match raw.split_once('.') {
        Some((int, frac)) => {
            if int.is_empty() || frac.is_empty() || !frac.bytes().all(|b| b == b'0') {
                return None;
            }
            int
        }
        None => raw,
    };
    let value: i64 = integral.parse().ok()?;
    (value >= 0).then_some(value)
}

/// Reference entry with its name pre-normalized for matching.
#[derive(Debug, Clone)]
struct NormalizedProvince {
    code: i64,
    name: Option<String>,
}

fn normalize_reference(reference: &[ReferenceProvince]) -> Vec<NormalizedProvince> {
    reference
        .iter()
        .map(|p| NormalizedProvince {
            code: p.code,
            name: p.name.as_deref().map(normalize_label),
        })
        .collect()
}

// =============================================================================
// Overrides
// =============================================================================

/// Normalized label -> normalized label substitutions applied before lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideMap {
    entries: BTreeMap<String, String>,
}

impl OverrideMap {
    /// The built-in corrections for known mismatches.
    pub fn builtin() -> Self {
        let mut map = Self::default();
        for (from, to) in BUILTIN_OVERRIDES {
            map.insert(from, to);
        }
        map
    }

    /// Add an entry. Both sides are normalized first.
    pub fn insert(&mut self, from: &str, to: &str) {
        self.entries.insert(normalize_label(from), normalize_label(to));
    }

    /// Extend with entries from a JSON object `{ "label": "target" }`.
    /// Entries apply in file order, so a later key that normalizes to the
    /// same label as an earlier one replaces it.
    pub fn extend_from_json(&mut self, json: &str) -> serde_json::Result<()> {
        let extra: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut parsed = Vec::with_capacity(extra.len());
        for (from, to) in extra {
            let to: String = serde_json::from_value(to)?;
            parsed.push((from, to));
        }
        for (from, to) in &parsed {
            self.insert(from, to);
        }
        Ok(())
    }

    /// Built-in overrides extended with the contents of `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut map = Self::builtin();
        map.extend_from_json(&json)
            .map_err(|source| LoadError::Overrides {
                path: path.display().to_string(),
                source,
            })?;
        Ok(map)
    }

    /// Substitute `label` if it is a key, otherwise return it unchanged.
    pub fn apply<'a>(&'a self, label: &'a str) -> &'a str {
        self.entries.get(label).map(String::as_str).unwrap_or(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Outcome of matching one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// `candidates` counts every entry containing the label; the code is
    /// always the first of them.
    Resolved { code: i64, candidates: usize },
    Unresolved,
}

impl Resolution {
    pub fn code(&self) -> Option<i64> {
        match self {
            Resolution::Resolved { code, .. } => Some(*code),
            Resolution::Unresolved => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Resolution::Resolved { candidates, .. } if *candidates > 1)
    }
}

/// First entry whose normalized name contains `label` as a literal substring.
///
/// An empty label is contained in every non-null name, so it resolves to the
/// first named entry and counts every named entry as a candidate.
fn lookup(label: &str, entries: &[NormalizedProvince]) -> Resolution {
    let mut matches = entries
        .iter()
        .filter(|e| e.name.as_deref().is_some_and(|name| name.contains(label)));

    match matches.next() {
        Some(first) => Resolution::Resolved {
            code: first.code,
            candidates: 1 + matches.count(),
        },
        None => Resolution::Unresolved,
    }
}

/// Resolve a single label against `reference`.
///
/// Returns `None` when no entry matches. That is a normal outcome.
pub fn reconcile(
    label: &str,
    reference: &[ReferenceProvince],
    overrides: &OverrideMap,
) -> Option<i64> {
    Reconciler::new(reference, overrides.clone())
        .resolve(Some(label))
        .code()
}

/// A record with its resolved code, or `None` if no province matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    pub record: RawRecord,
    pub code: Option<i64>,
    pub ambiguous: bool,
}

/// Reconciles many labels against one immutable reference snapshot.
///
/// Reference names are normalized once up front instead of per label.
#[derive(Debug, Clone)]
pub struct Reconciler {
    entries: Vec<NormalizedProvince>,
    overrides: OverrideMap,
}

impl Reconciler {
    pub fn new(reference: &[ReferenceProvince], overrides: OverrideMap) -> Self {
        Self {
            entries: normalize_reference(reference),
            overrides,
        }
    }

    pub fn resolve(&self, label: Option<&str>) -> Resolution {
        let Some(label) = label else {
            return Resolution::Unresolved;
        };
        let normalized = normalize_label(label);
        lookup(self.overrides.apply(&normalized), &self.entries)
    }

    /// Resolve every record, preserving input order.
    pub fn reconcile_all(&self, records: Vec<RawRecord>) -> Vec<ReconciledRecord> {
        records
            .into_iter()
            .map(|record| {
                let resolution = self.resolve(record.label.as_deref());
                ReconciledRecord {
                    code: resolution.code(),
                    ambiguous: resolution.is_ambiguous(),
                    record,
                }
            })
            .collect()
    }
}
