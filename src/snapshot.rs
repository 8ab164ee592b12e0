// 🗄️ Snapshot store - the merged feature table materialized in SQLite
// Lets the server load the table without re-running the pipeline, and keeps a
// log of pipeline runs.

use crate::error::{PipelineError, Result};
use crate::pipeline::MergeReport;
use crate::table::{FeatureRow, FeatureTable};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One row of the pipeline run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fingerprint: String,
    pub entities: usize,
    pub report: MergeReport,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL so readers never block on a snapshot being replaced
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Feature table (long format: one row per entity × column)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_columns (
            position INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_values (
            entity_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            value REAL,
            PRIMARY KEY (entity_id, position)
        )",
        [],
    )?;

    // ==========================================================================
    // Pipeline run log
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            entities INTEGER NOT NULL,
            report_json TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_started ON pipeline_runs(started_at)",
        [],
    )?;

    Ok(())
}

/// Open (or create) a snapshot database
pub fn open_snapshot(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Replace the stored table wholesale and log the run, in one transaction
pub fn save_feature_table(conn: &Connection, table: &FeatureTable, report: &MergeReport) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    tx.execute("DELETE FROM feature_values", [])?;
    tx.execute("DELETE FROM feature_columns", [])?;

    {
        let mut insert_column =
            tx.prepare_cached("INSERT INTO feature_columns (position, name) VALUES (?1, ?2)")?;
        for (position, name) in table.columns().iter().enumerate() {
            insert_column.execute(params![position as i64, name])?;
        }

        let mut insert_value = tx.prepare_cached(
            "INSERT INTO feature_values (entity_id, position, value) VALUES (?1, ?2, ?3)",
        )?;
        for row in table.rows() {
            for (position, value) in row.values.iter().enumerate() {
                insert_value.execute(params![row.id, position as i64, value])?;
            }
        }
    }

    tx.execute(
        "INSERT OR REPLACE INTO pipeline_runs (
            run_id, started_at, finished_at, fingerprint, entities, report_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.run_id,
            report.started_at.to_rfc3339(),
            report.finished_at.to_rfc3339(),
            table.schema_fingerprint(),
            table.len() as i64,
            serde_json::to_string(report)?,
        ],
    )?;

    tx.commit()?;
    info!(entities = table.len(), run_id = %report.run_id, "saved feature table snapshot");
    Ok(table.len())
}

/// Reconstitute the stored table
pub fn load_feature_table(conn: &Connection) -> Result<FeatureTable> {
    let columns: Vec<String> = conn
        .prepare("SELECT name FROM feature_columns ORDER BY position")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    if columns.is_empty() {
        return Err(PipelineError::data_integrity("snapshot holds no feature table"));
    }

    let mut by_id: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT entity_id, position, value FROM feature_values")?;
    let cells = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<f64>>(2)?,
        ))
    })?;

    for cell in cells {
        let (id, position, value) = cell?;
        let slot = usize::try_from(position)
            .ok()
            .filter(|&p| p < columns.len())
            .ok_or_else(|| {
                PipelineError::data_integrity(format!(
                    "snapshot value for id {} has position {} outside {} columns",
                    id,
                    position,
                    columns.len()
                ))
            })?;
        by_id.entry(id).or_insert_with(|| vec![None; columns.len()])[slot] = value;
    }

    let rows = by_id
        .into_iter()
        .map(|(id, values)| FeatureRow { id, values })
        .collect();

    FeatureTable::new(columns, rows)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::data_integrity(format!("bad timestamp '{}' in run log: {}", raw, e)))
}

/// Most recently started pipeline run, if any
pub fn latest_run(conn: &Connection) -> Result<Option<PipelineRun>> {
    let raw = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, fingerprint, entities, report_json
             FROM pipeline_runs
             ORDER BY started_at DESC, id DESC
             LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((run_id, started_at, finished_at, fingerprint, entities, report_json)) = raw else {
        return Ok(None);
    };

    Ok(Some(PipelineRun {
        run_id,
        started_at: parse_timestamp(&started_at)?,
        finished_at: parse_timestamp(&finished_at)?,
        fingerprint,
        entities: entities.max(0) as usize,
        report: serde_json::from_str(&report_json)?,
    }))
}
