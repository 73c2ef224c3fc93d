//! Input file reading.
//!
//! Reads the measurements file into [`RawRecord`]s. The province label
//! column is split out; every other column is passed through with a type
//! inferred from its contents:
//! - all non-blank values parse as integers: `BIGINT`
//! - all non-blank values parse as numbers: `DOUBLE PRECISION`
//! - otherwise: `TEXT`
//!
//! Blank passthrough cells are `NULL`. A passthrough column named like the
//! code column is dropped, since the resolved code replaces it.
//!
//! The label cell is kept verbatim. Only a zero-length label is missing;
//! whitespace and punctuation are left for normalization to deal with.

use std::fmt;

use encoding_rs::Encoding;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{LoadError, Result};

/// Options for reading the input file
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub encoding: String,
    pub label_column: String,
    /// Output column for the resolved code
    pub code_column: String,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: "utf-8".to_string(),
            label_column: "provincia".to_string(),
            code_column: "codigo_prov".to_string(),
        }
    }
}

/// Storage type of a passthrough column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    BigInt,
    Double,
    Text,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
        }
    }

    /// Narrowest type that holds every value in `cells`.
    fn infer<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> Self {
        let mut ty = ColumnType::BigInt;
        for cell in cells.flatten() {
            if ty == ColumnType::BigInt && cell.parse::<i64>().is_err() {
                ty = ColumnType::Double;
            }
            if ty == ColumnType::Double && cell.parse::<f64>().is_err() {
                return ColumnType::Text;
            }
        }
        ty
    }

    fn convert(&self, cell: Option<String>) -> Value {
        let Some(cell) = cell else {
            return Value::Null;
        };
        match self {
            ColumnType::BigInt => match cell.parse() {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Text(cell),
            },
            ColumnType::Double => match cell.parse() {
                Ok(v) => Value::Float(v),
                Err(_) => Value::Text(cell),
            },
            ColumnType::Text => Value::Text(cell),
        }
    }
}

/// A passthrough column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

/// A single passthrough cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

/// One input row
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based line in the input file (header is line 1)
    pub line: usize,
    /// Province label as read; `None` only when the cell is empty
    pub label: Option<String>,
    /// Passthrough values, aligned with [`InputTable::columns`]
    pub values: Vec<Value>,
}

/// Parsed input file
#[derive(Debug, Clone)]
pub struct InputTable {
    pub columns: Vec<ColumnSpec>,
    pub records: Vec<RawRecord>,
}

/// Content fingerprint of the raw input bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Decode raw bytes using a WHATWG encoding label ("utf-8", "windows-1252",
/// "latin1", ...). A byte order mark overrides the label and is removed.
pub fn decode(bytes: &[u8], label: &str) -> Result<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| LoadError::UnknownEncoding(label.to_string()))?;

    let (text, actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(LoadError::MalformedInput {
            encoding: actual.name(),
        });
    }
    Ok(text.into_owned())
}

fn non_blank(cell: &str) -> Option<String> {
    if cell.is_empty() {
        None
    } else {
        Some(cell.to_string())
    }
}

/// Parse decoded CSV text.
///
/// Every row must have as many fields as the header; a malformed row fails
/// the whole read rather than being skipped.
pub fn parse_records(content: &str, options: &ReadOptions) -> Result<InputTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let label_idx = headers
        .iter()
        .position(|h| h == &options.label_column)
        .ok_or_else(|| LoadError::MissingColumn {
            column: options.label_column.clone(),
            found: headers.clone(),
        })?;

    let passthrough: Vec<usize> = (0..headers.len())
        .filter(|&i| i != label_idx && headers[i] != options.code_column)
        .collect();

    // (line, label, passthrough cells)
    let mut rows: Vec<(usize, Option<String>, Vec<Option<String>>)> = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        let record = result?;
        let label = non_blank(&record[label_idx]);
        let cells = passthrough
            .iter()
            .map(|&i| non_blank(record[i].trim()))
            .collect();
        rows.push((line_idx + 2, label, cells));
    }

    let columns: Vec<ColumnSpec> = passthrough
        .iter()
        .map(|&i| &headers[i])
        .enumerate()
        .map(|(col, name)| ColumnSpec {
            name: name.clone(),
            ty: ColumnType::infer(rows.iter().map(|(_, _, cells)| cells[col].as_deref())),
        })
        .collect();

    let records = rows
        .into_iter()
        .map(|(line, label, cells)| RawRecord {
            line,
            label,
            values: cells
                .into_iter()
                .zip(&columns)
                .map(|(cell, spec)| spec.ty.convert(cell))
                .collect(),
        })
        .collect();

    Ok(InputTable { columns, records })
}

/// Decode and parse raw file bytes.
pub fn read_records(bytes: &[u8], options: &ReadOptions) -> Result<InputTable> {
    let content = decode(bytes, &options.encoding)?;
    parse_records(&content, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(csv: &str) -> InputTable {
        parse_records(csv, &ReadOptions::default()).unwrap()
    }

    // -------------------------------------------------------------------------
    // COLUMN HANDLING
    // -------------------------------------------------------------------------

    #[test]
    fn test_label_column_split_out() {
        let table = parse("fecha,provincia,tmax\n2024-01-01,Soria,12\n");
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fecha", "tmax"]);
        assert_eq!(table.records[0].label.as_deref(), Some("Soria"));
        assert_eq!(
            table.records[0].values,
            vec![Value::Text("2024-01-01".into()), Value::Int(12)]
        );
    }

    #[test]
    fn test_missing_label_column() {
        let err = parse_records("fecha,tmax\n2024-01-01,12\n", &ReadOptions::default()).unwrap_err();
        match err {
            LoadError::MissingColumn { column, found } => {
                assert_eq!(column, "provincia");
                assert_eq!(found, vec!["fecha", "tmax"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_label_column_and_delimiter() {
        let options = ReadOptions {
            delimiter: b';',
            label_column: "prov".into(),
            ..ReadOptions::default()
        };
        let table = parse_records("prov;tmin\nLugo;-1,5\n", &options).unwrap();
        assert_eq!(table.records[0].label.as_deref(), Some("Lugo"));
        // Decimal comma is not a number
        assert_eq!(table.columns[0].ty, ColumnType::Text);
    }

    #[test]
    fn test_code_column_in_input_replaced() {
        let table = parse("provincia,codigo_prov,tmax\nSoria,99,12\n");
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tmax"]);
        assert_eq!(table.records[0].values, vec![Value::Int(12)]);
    }

    #[test]
    fn test_custom_code_column_replaced() {
        let options = ReadOptions {
            code_column: "prov_id".into(),
            ..ReadOptions::default()
        };
        let table = parse_records("prov_id,provincia,codigo_prov\n1,Soria,2\n", &options).unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["codigo_prov"]);
    }

    #[test]
    fn test_ragged_row_fails() {
        let result = parse_records("provincia,tmax\nSoria,12,extra\n", &ReadOptions::default());
        assert!(matches!(result, Err(LoadError::Csv(_))));
    }

    // -------------------------------------------------------------------------
    // TYPE INFERENCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_infer_integer_column() {
        let table = parse("provincia,altitud\nA,100\nB,-20\nC,\n");
        assert_eq!(table.columns[0].ty, ColumnType::BigInt);
        assert_eq!(table.records[2].values[0], Value::Null);
    }

    #[test]
    fn test_infer_float_column() {
        let table = parse("provincia,tmed\nA,10\nB,11.5\n");
        assert_eq!(table.columns[0].ty, ColumnType::Double);
        assert_eq!(table.records[0].values[0], Value::Float(10.0));
        assert_eq!(table.records[1].values[0], Value::Float(11.5));
    }

    #[test]
    fn test_infer_text_column() {
        let table = parse("provincia,estacion\nA,9434\nB,3195X\n");
        assert_eq!(table.columns[0].ty, ColumnType::Text);
        assert_eq!(table.records[0].values[0], Value::Text("9434".into()));
    }

    #[test]
    fn test_infer_all_blank_column() {
        let table = parse("provincia,nota\nA,\nB,\n");
        assert_eq!(table.columns[0].ty, ColumnType::BigInt);
        assert!(table.records.iter().all(|r| r.values[0] == Value::Null));
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(ColumnType::BigInt.sql_type(), "BIGINT");
        assert_eq!(ColumnType::Double.sql_type(), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Text.sql_type(), "TEXT");
    }

    // -------------------------------------------------------------------------
    // ROWS
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_label_is_none() {
        let table = parse("provincia,tmax\n,12\n\"\",13\n");
        assert_eq!(table.records[0].label, None);
        assert_eq!(table.records[1].label, None);
    }

    #[test]
    fn test_whitespace_label_kept() {
        let table = parse("provincia,tmax\n  ,13\n");
        assert_eq!(table.records[0].label.as_deref(), Some("  "));
    }

    #[test]
    fn test_line_numbers() {
        let table = parse("provincia,tmax\nA,1\nB,2\nC,3\n");
        let lines: Vec<usize> = table.records.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
    }

    #[test]
    fn test_whitespace_trimming() {
        let table = parse("provincia , tmax\n  Soria  ,  12  \n");
        assert_eq!(table.columns[0].name, "tmax");
        assert_eq!(table.records[0].label.as_deref(), Some("  Soria  "));
        assert_eq!(table.records[0].values[0], Value::Int(12));
    }

    #[test]
    fn test_header_only() {
        let table = parse("provincia,tmax\n");
        assert!(table.records.is_empty());
        assert_eq!(table.columns.len(), 1);
    }

    // -------------------------------------------------------------------------
    // DECODING
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_utf8_strips_bom() {
        let bytes = "\u{feff}provincia,tmax\nÁvila,9\n".as_bytes();
        let table = read_records(bytes, &ReadOptions::default()).unwrap();
        assert_eq!(table.records[0].label.as_deref(), Some("Ávila"));
    }

    #[test]
    fn test_decode_windows_1252() {
        // "Ávila" in windows-1252
        let bytes = b"provincia,tmax\n\xc1vila,9\n";
        let options = ReadOptions {
            encoding: "windows-1252".into(),
            ..ReadOptions::default()
        };
        let table = read_records(bytes, &options).unwrap();
        assert_eq!(table.records[0].label.as_deref(), Some("Ávila"));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let bytes = b"provincia,tmax\n\xc1vila,9\n";
        let err = read_records(bytes, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::MalformedInput { encoding: "UTF-8" }));
    }

    #[test]
    fn test_decode_unknown_label() {
        let err = decode(b"x", "klingon").unwrap_err();
        assert!(matches!(err, LoadError::UnknownEncoding(_)));
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            fingerprint(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fingerprint(b"a"), fingerprint(b"a"));
        assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
    }
}
