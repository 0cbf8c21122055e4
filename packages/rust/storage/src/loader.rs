//! Batched bulk loading: flat upserts and JSONB aggregation.
//!
//! Two structurally different write paths:
//!
//! - **Flat**: each normalized row maps 1:1 to a target-table row. Conflicts
//!   on the natural key overwrite existing columns wholesale (last write
//!   wins), or — for tables without a natural key — a content hash column
//!   makes re-runs no-ops.
//! - **JSONB aggregation**: rows sharing the parcel key are grouped, their
//!   non-key columns become one JSON array element each, and the array is
//!   merged with whatever is already stored under that key.
//!
//! Geometry parameters are wrapped in `ST_GeomFromText($n, 4326)` rather than
//! bound as plain text: the store must parse WKT into its native type at
//! insert time.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, QueryBuilder};

use parcelpipe_shared::{
    ConflictPolicy, GeomValue, LoadMode, NormalizedRow, PipelineError, Result, SqlValue, TableSpec,
};

/// Grouping key for JSONB aggregation targets.
const JSONB_GROUP_KEY: &str = "pnu";

/// Summary of one bulk load call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOutcome {
    /// Rows (or aggregated groups) written to the store.
    pub written: u64,
    /// Number of batches flushed.
    pub batches: usize,
}

/// Load a batch of normalized rows into the spec's target table.
pub async fn bulk_load(
    pool: &PgPool,
    spec: &TableSpec,
    rows: &[NormalizedRow],
    mode: LoadMode,
) -> Result<LoadOutcome> {
    if rows.is_empty() {
        return Ok(LoadOutcome::default());
    }

    if spec.jsonb_column.is_some() {
        load_aggregated(pool, spec, rows, mode).await
    } else {
        load_flat(pool, spec, rows, mode).await
    }
}

// ---------------------------------------------------------------------------
// Flat path
// ---------------------------------------------------------------------------

async fn load_flat(
    pool: &PgPool,
    spec: &TableSpec,
    rows: &[NormalizedRow],
    mode: LoadMode,
) -> Result<LoadOutcome> {
    if mode == LoadMode::Truncate {
        truncate_table(pool, spec.table).await?;
    }

    let columns = column_names(spec, &rows[0]);
    let clause = conflict_clause(&spec.conflict, &columns);

    let mut outcome = LoadOutcome::default();
    for (batch_index, chunk) in rows.chunks(spec.batch_size.max(1)).enumerate() {
        let first_row = batch_index * spec.batch_size.max(1);

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} ({}) ",
            spec.table,
            columns.join(", ")
        ));
        qb.push_values(chunk, |mut b, row| {
            for (_, value) in &row.columns {
                push_value(&mut b, value);
            }
            if let ConflictPolicy::Dedup(_) = spec.conflict {
                b.push_bind(row_hash(row));
            }
        });
        qb.push(&clause);

        let result = qb.build().execute(pool).await.map_err(|e| {
            PipelineError::LoadConflict {
                table: spec.table.to_string(),
                first_row,
                last_row: first_row + chunk.len(),
                message: e.to_string(),
            }
        })?;

        outcome.written += result.rows_affected();
        outcome.batches += 1;
    }

    tracing::debug!(
        table = spec.table,
        rows = rows.len(),
        written = outcome.written,
        batches = outcome.batches,
        "flat load complete"
    );
    Ok(outcome)
}

fn column_names(spec: &TableSpec, first: &NormalizedRow) -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = first.columns.iter().map(|(c, _)| *c).collect();
    if let ConflictPolicy::Dedup(hash_col) = spec.conflict {
        columns.push(hash_col);
    }
    columns
}

fn push_value<'args>(
    b: &mut sqlx::query_builder::Separated<'_, 'args, Postgres, &'static str>,
    value: &SqlValue,
) {
    match value {
        SqlValue::Text(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Int(v) => {
            b.push_bind(*v);
        }
        SqlValue::Float(v) => {
            b.push_bind(*v);
        }
        SqlValue::Date(v) => {
            b.push_bind(*v);
        }
        SqlValue::Json(v) => {
            b.push_bind(v.clone());
        }
        SqlValue::Geometry(GeomValue::None) => {
            b.push("NULL");
        }
        SqlValue::Geometry(GeomValue::Wkt(wkt)) => {
            b.push("ST_GeomFromText(");
            b.push_bind_unseparated(wkt.clone());
            b.push_unseparated(", 4326)");
        }
        SqlValue::Geometry(GeomValue::Binary(bytes)) => {
            b.push("ST_GeomFromWKB(");
            b.push_bind_unseparated(bytes.clone());
            b.push_unseparated(", 4326)");
        }
    }
}

/// Build the `ON CONFLICT` suffix for a conflict policy and column set.
pub fn conflict_clause(policy: &ConflictPolicy, columns: &[&str]) -> String {
    match policy {
        ConflictPolicy::Upsert(keys) => {
            let updates: Vec<String> = columns
                .iter()
                .filter(|&&c| !keys.contains(&c))
                .map(|&c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            if updates.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", "))
            } else {
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    keys.join(", "),
                    updates.join(", ")
                )
            }
        }
        ConflictPolicy::Dedup(hash_col) => {
            format!(" ON CONFLICT ({hash_col}) DO NOTHING")
        }
    }
}

/// SHA-256 content hash of a row's canonical (key-sorted) JSON rendering.
pub fn row_hash(row: &NormalizedRow) -> String {
    let canonical: std::collections::BTreeMap<&str, serde_json::Value> = row
        .columns
        .iter()
        .map(|(c, v)| (*c, v.to_json()))
        .collect();
    let payload = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// JSONB aggregation path
// ---------------------------------------------------------------------------

/// How incoming JSONB elements combine with what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Append incoming elements, skipping any already present by value.
    Append,
    /// Discard the stored array and keep only the incoming elements.
    Replace,
}

async fn load_aggregated(
    pool: &PgPool,
    spec: &TableSpec,
    rows: &[NormalizedRow],
    mode: LoadMode,
) -> Result<LoadOutcome> {
    let jsonb_column = spec.jsonb_column.expect("aggregation path requires column");
    let groups = group_by_key(rows, JSONB_GROUP_KEY);
    if groups.is_empty() {
        return Ok(LoadOutcome::default());
    }

    // A full reload of an aggregation target must not truncate the parent
    // table; it replaces the arrays instead.
    let merge_mode = match mode {
        LoadMode::Upsert => MergeMode::Append,
        LoadMode::Truncate => MergeMode::Replace,
    };

    let existing = match merge_mode {
        MergeMode::Append => {
            let keys: Vec<String> = groups.iter().map(|(k, _)| k.clone()).collect();
            fetch_existing_arrays(pool, spec.table, jsonb_column, &keys).await?
        }
        MergeMode::Replace => HashMap::new(),
    };

    let mut outcome = LoadOutcome::default();
    for chunk in groups.chunks(spec.batch_size.max(1)) {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} ({JSONB_GROUP_KEY}, {jsonb_column}) ",
            spec.table
        ));
        qb.push_values(chunk, |mut b, (key, elements)| {
            let merged = merge_elements(existing.get(key), elements, merge_mode);
            b.push_bind(key.clone());
            b.push_bind(merged);
        });
        qb.push(format!(
            " ON CONFLICT ({JSONB_GROUP_KEY}) DO UPDATE SET {jsonb_column} = EXCLUDED.{jsonb_column}"
        ));

        let result =
            qb.build()
                .execute(pool)
                .await
                .map_err(|e| PipelineError::LoadConflict {
                    table: spec.table.to_string(),
                    first_row: outcome.written as usize,
                    last_row: outcome.written as usize + chunk.len(),
                    message: e.to_string(),
                })?;

        outcome.written += result.rows_affected();
        outcome.batches += 1;
    }

    tracing::debug!(
        table = spec.table,
        column = jsonb_column,
        groups = groups.len(),
        "jsonb aggregation load complete"
    );
    Ok(outcome)
}

async fn fetch_existing_arrays(
    pool: &PgPool,
    table: &str,
    column: &str,
    keys: &[String],
) -> Result<HashMap<String, serde_json::Value>> {
    let sql = format!(
        "SELECT {JSONB_GROUP_KEY}, {column} FROM {table} WHERE {JSONB_GROUP_KEY} = ANY($1)"
    );
    let rows: Vec<(String, Option<serde_json::Value>)> = sqlx::query_as(&sql)
        .bind(keys)
        .fetch_all(pool)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    Ok(rows
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect())
}

/// Group rows by a key column, preserving first-seen group order and input
/// order within each group. Non-key columns become one JSON object per row.
pub fn group_by_key(rows: &[NormalizedRow], key: &str) -> Vec<(String, Vec<serde_json::Value>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<serde_json::Value>> = HashMap::new();

    for row in rows {
        let Some(SqlValue::Text(Some(key_value))) = row.get(key) else {
            continue;
        };
        let element: serde_json::Map<String, serde_json::Value> = row
            .columns
            .iter()
            .filter(|(c, _)| *c != key)
            .map(|(c, v)| (c.to_string(), v.to_json()))
            .collect();

        if !groups.contains_key(key_value) {
            order.push(key_value.clone());
        }
        groups
            .entry(key_value.clone())
            .or_default()
            .push(serde_json::Value::Object(element));
    }

    order
        .into_iter()
        .map(|k| {
            let elements = groups.remove(&k).unwrap_or_default();
            (k, elements)
        })
        .collect()
}

/// Merge incoming array elements with a stored array. Append mode keeps
/// stored elements and appends only incoming elements not already present by
/// value, so re-running a source file never double-counts.
pub fn merge_elements(
    existing: Option<&serde_json::Value>,
    incoming: &[serde_json::Value],
    mode: MergeMode,
) -> serde_json::Value {
    let mut merged: Vec<serde_json::Value> = match (mode, existing) {
        (MergeMode::Append, Some(serde_json::Value::Array(items))) => items.clone(),
        _ => Vec::new(),
    };

    for element in incoming {
        if !merged.contains(element) {
            merged.push(element.clone());
        }
    }

    serde_json::Value::Array(merged)
}

// ---------------------------------------------------------------------------
// Truncate
// ---------------------------------------------------------------------------

pub(crate) async fn truncate_table(pool: &PgPool, table: &str) -> Result<()> {
    tracing::info!(table, "truncating before full reload");
    sqlx::query(&format!("TRUNCATE TABLE {table} CASCADE"))
        .execute(pool)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
    Ok(())
}
