//! PostgreSQL access: connection, reference read and bulk write.
//!
//! One connection per run. The caller owns the handle and closes it;
//! dropping it on an error path releases it as well.

use sqlx::postgres::{PgConnection, Postgres};
use sqlx::{Connection, QueryBuilder};
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::error::Result;
use crate::reconcile::ReferenceProvince;
use crate::records::{ColumnSpec, ColumnType, Value};
use crate::report::LoadRow;

/// PostgreSQL caps bind parameters per statement at 65535
const MAX_BIND_PARAMS: usize = 65_535;

/// Source table and columns for the province reference
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    pub table: String,
    pub name_column: String,
    pub code_column: String,
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self {
            table: "provincias".to_string(),
            name_column: "nombre".to_string(),
            code_column: "codigo_prov".to_string(),
        }
    }
}

/// Destination table layout
#[derive(Debug, Clone)]
pub struct TargetTable {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    /// Appended after the passthrough columns
    pub code_column: String,
}

/// Open a connection.
pub async fn connect(config: &DbConfig) -> Result<PgConnection> {
    let options = config.connect_options()?;
    let conn = PgConnection::connect_with(&options).await?;
    Ok(conn)
}

/// Quote an identifier. `schema.table` is quoted per part.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a column name. Dots are part of the name.
fn quote_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn reference_query(reference: &ReferenceTable) -> String {
    format!(
        "SELECT {}::text, {}::text FROM {}",
        quote_column(&reference.name_column),
        quote_column(&reference.code_column),
        quote_ident(&reference.table),
    )
}

/// Load the whole reference table, in table order.
///
/// Codes are read as text and coerced, so INTEGER, BIGINT and NUMERIC code
/// columns all work and a non-integral code is reported by value.
pub async fn fetch_reference(
    conn: &mut PgConnection,
    reference: &ReferenceTable,
) -> Result<Vec<ReferenceProvince>> {
    let rows: Vec<(Option<String>, Option<String>)> =
        sqlx::query_as(&reference_query(reference))
            .fetch_all(&mut *conn)
            .await?;

    rows.into_iter()
        .map(|(name, code)| ReferenceProvince::from_raw(name, code.as_deref()))
        .collect()
}

/// `CREATE TABLE` statement for the destination.
pub fn create_table_sql(target: &TargetTable) -> String {
    let mut defs: Vec<String> = target
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_column(&c.name), c.ty.sql_type()))
        .collect();
    defs.push(format!("{} BIGINT NOT NULL", quote_column(&target.code_column)));

    format!("CREATE TABLE {} ({})", quote_ident(&target.table), defs.join(", "))
}

/// Drop and recreate the destination table.
pub async fn replace_table(conn: &mut PgConnection, target: &TargetTable) -> Result<()> {
    let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&target.table));
    sqlx::query(&drop_sql).execute(&mut *conn).await?;

    let create = create_table_sql(target);
    debug!(sql = %create, "Creating table");
    sqlx::query(&create).execute(&mut *conn).await?;
    Ok(())
}

/// Rows per statement, capped so a statement stays under the bind limit.
pub fn effective_batch_size(requested: usize, columns_per_row: usize) -> usize {
    let cap = MAX_BIND_PARAMS / columns_per_row.max(1);
    requested.clamp(1, cap.max(1))
}

fn push_value(
    row: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>,
    value: &Value,
    ty: ColumnType,
) {
    // NULLs carry the column's type so Postgres accepts them
    match (value, ty) {
        (Value::Null, ColumnType::BigInt) => row.push_bind(None::<i64>),
        (Value::Null, ColumnType::Double) => row.push_bind(None::<f64>),
        (Value::Null, ColumnType::Text) => row.push_bind(None::<String>),
        (Value::Int(v), _) => row.push_bind(*v),
        (Value::Float(v), _) => row.push_bind(*v),
        (Value::Text(v), _) => row.push_bind(v.clone()),
    };
}

/// Multi-row `INSERT` for one batch.
pub fn build_insert<'a>(target: &TargetTable, rows: &[LoadRow]) -> QueryBuilder<'a, Postgres> {
    let mut names: Vec<String> = target.columns.iter().map(|c| quote_column(&c.name)).collect();
    names.push(quote_column(&target.code_column));

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(&target.table),
        names.join(", ")
    ));

    builder.push_values(rows, |mut b, row| {
        for (value, spec) in row.values.iter().zip(&target.columns) {
            push_value(&mut b, value, spec.ty);
        }
        b.push_bind(row.code);
    });
    builder
}

/// Insert all rows in batches. Returns the number of rows written.
pub async fn insert_rows(
    conn: &mut PgConnection,
    target: &TargetTable,
    rows: &[LoadRow],
    batch_size: usize,
) -> Result<u64> {
    let batch_size = effective_batch_size(batch_size, target.columns.len() + 1);
    let batches = rows.len().div_ceil(batch_size);
    let mut inserted = 0u64;

    for (batch, chunk) in rows.chunks(batch_size).enumerate() {
        let mut builder = build_insert(target, chunk);
        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected();
        debug!(batch = batch + 1, batches, rows = chunk.len(), "Inserted batch");
    }

    info!(table = %target.table, rows = inserted, batch_size, "Insert complete");
    Ok(inserted)
}

/// Replace the destination table contents with `rows`.
pub async fn write_rows(
    conn: &mut PgConnection,
    target: &TargetTable,
    rows: &[LoadRow],
    batch_size: usize,
) -> Result<u64> {
    replace_table(conn, target).await?;
    if rows.is_empty() {
        return Ok(0);
    }
    insert_rows(conn, target, rows, batch_size).await
}
