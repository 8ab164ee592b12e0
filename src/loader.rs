// 📂 Record Loader - three raw CSV sources into untyped tables
// Customers, non-customers and events share an `id` column; everything else is
// coerced later by the normalizer.

use crate::error::{PipelineError, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceKind - which of the three inputs a table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Customers,
    NonCustomers,
    Events,
}

impl SourceKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceKind::Customers => "customers",
            SourceKind::NonCustomers => "noncustomers",
            SourceKind::Events => "events",
        }
    }

    /// Columns a source must carry before normalization can start
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Customers => &[
                "id",
                "CLOSEDATE",
                "MRR",
                "EMPLOYEE_RANGE",
                "INDUSTRY",
                "ALEXA_RANK",
            ],
            SourceKind::NonCustomers => &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"],
            SourceKind::Events => &["id", "WHEN_TIMESTAMP"],
        }
    }
}

/// RawRow - one CSV record, cells kept as strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    /// Line in the original file (1-indexed, header is line 1)
    pub line_number: usize,
    pub cells: Vec<String>,
}

/// RawSourceTable - untyped tabular input, discarded after normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceTable {
    pub kind: SourceKind,
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawSourceTable {
    /// Build a table from in-memory headers/rows (used by tests and callers
    /// that already hold the data)
    pub fn from_rows(kind: SourceKind, headers: &[&str], rows: &[Vec<&str>]) -> Self {
        RawSourceTable {
            kind,
            source_file: format!("<memory:{}>", kind.name()),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, cells)| RawRow {
                    line_number: i + 2,
                    cells: cells.iter().map(|c| c.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// Position of a column by exact header name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Fail with a data-integrity error when a required column is absent
    pub fn require_columns(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .kind
            .required_columns()
            .iter()
            .copied()
            .filter(|col| self.column_index(col).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::data_integrity(format!(
                "{} source '{}' is missing required columns: {}",
                self.kind.name(),
                self.source_file,
                missing.join(", ")
            )))
        }
    }

    /// Cell text by row and column, empty string for short rows
    pub fn cell<'a>(&'a self, row: &'a RawRow, col: usize) -> &'a str {
        row.cells.get(col).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// File locations of the three sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePaths {
    pub customers: PathBuf,
    pub noncustomers: PathBuf,
    pub events: PathBuf,
}

impl Default for SourcePaths {
    fn default() -> Self {
        SourcePaths {
            customers: PathBuf::from("data/customers.csv"),
            noncustomers: PathBuf::from("data/noncustomers.csv"),
            events: PathBuf::from("data/actions.csv"),
        }
    }
}

/// The three raw inputs of one pipeline run
#[derive(Debug, Clone)]
pub struct RawSources {
    pub customers: RawSourceTable,
    pub noncustomers: RawSourceTable,
    pub events: RawSourceTable,
}

// ============================================================================
// LOADING
// ============================================================================

/// Read one CSV file into a RawSourceTable
pub fn load_table(kind: SourceKind, file_path: &Path) -> Result<RawSourceTable> {
    let file = File::open(file_path).map_err(|e| {
        PipelineError::data_integrity(format!(
            "failed to open {} source {}: {}",
            kind.name(),
            file_path.display(),
            e
        ))
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            PipelineError::data_integrity(format!(
                "failed to parse CSV line {} in {}: {}",
                line_num + 2,
                file_path.display(),
                e
            ))
        })?;

        rows.push(RawRow {
            line_number: line_num + 2, // 1-indexed + header row
            cells: record.iter().map(|c| c.to_string()).collect(),
        });
    }

    let table = RawSourceTable {
        kind,
        source_file: file_path.display().to_string(),
        headers,
        rows,
    };
    table.require_columns()?;

    info!(
        source = kind.name(),
        rows = table.len(),
        columns = table.headers.len(),
        "loaded raw source"
    );
    Ok(table)
}

/// Read all three sources
pub fn load_sources(paths: &SourcePaths) -> Result<RawSources> {
    Ok(RawSources {
        customers: load_table(SourceKind::Customers, &paths.customers)?,
        noncustomers: load_table(SourceKind::NonCustomers, &paths.noncustomers)?,
        events: load_table(SourceKind::Events, &paths.events)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
