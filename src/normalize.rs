// 🧹 Per-Source Normalizer
// Type-coerces and null-fills each raw table independently:
//   - dates → NaiveDateTime (unparseable = null)
//   - numerics → f64 (unparseable = null)
//   - categoricals → "Unknown" when missing
//   - event action counts → 0 when missing

use crate::error::Result;
use crate::loader::{RawSourceTable, SourceKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Columns with dedicated handling; never treated as generic numerics
const ENTITY_RESERVED: &[&str] = &[
    "id",
    "CLOSEDATE",
    "MRR",
    "EMPLOYEE_RANGE",
    "INDUSTRY",
    "IS_CUSTOMER",
];
const EVENT_RESERVED: &[&str] = &["id", "WHEN_TIMESTAMP"];

// ============================================================================
// NORMALIZED TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Population {
    Customer,
    NonCustomer,
}

impl Population {
    /// IS_CUSTOMER label value
    pub fn label(&self) -> u8 {
        match self {
            Population::Customer => 1,
            Population::NonCustomer => 0,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Population::Customer => "customers",
            Population::NonCustomer => "noncustomers",
        }
    }
}

/// One customer or non-customer row after coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    pub population: Population,
    /// Only customers carry a close date
    pub close_date: Option<NaiveDateTime>,
    /// Non-customers get 0 by convention
    pub mrr: Option<f64>,
    pub industry: String,
    pub employee_range: String,
    /// Aligned with `EntityTable::numeric_columns`
    pub numerics: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTable {
    pub population: Population,
    /// ALEXA_RANK first, then any other numeric columns in header order
    pub numeric_columns: Vec<String>,
    pub records: Vec<EntityRecord>,
    /// Rows dropped because `id` was not an integer
    pub skipped_rows: usize,
}

impl EntityTable {
    pub fn numeric(&self, record: &EntityRecord, column: &str) -> Option<f64> {
        self.numeric_columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| record.numerics.get(i).copied().flatten())
    }
}

/// One behavioral event after coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub when: Option<NaiveDateTime>,
    /// Aligned with `EventTable::count_columns`; missing counts are 0
    pub counts: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTable {
    pub count_columns: Vec<String>,
    pub records: Vec<EventRecord>,
    pub skipped_rows: usize,
}

// ============================================================================
// COERCION HELPERS
// ============================================================================

/// Parse an entity id; integral floats like "12.0" are accepted
pub fn parse_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Some(v as i64),
        _ => None,
    }
}

/// Parse a number; empty, garbage and NaN are null, infinities are kept
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_nan() => None,
        Ok(v) => Some(v),
        Err(_) => None,
    }
}

/// Parse a date or timestamp (supports ISO dates/timestamps, RFC 3339 and MM/DD/YYYY)
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }

    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

fn category(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        UNKNOWN_CATEGORY.to_string()
    } else {
        raw.to_string()
    }
}

/// A column is numeric when every non-empty cell parses as a number
fn is_numeric_column(table: &RawSourceTable, col: usize) -> bool {
    table.rows.iter().all(|row| {
        let cell = table.cell(row, col).trim();
        cell.is_empty() || cell.parse::<f64>().is_ok()
    })
}

/// Extra numeric columns (header order), excluding `reserved`
fn numeric_extras(table: &RawSourceTable, reserved: &[&str]) -> Vec<(String, usize)> {
    let mut extras = Vec::new();
    for (idx, name) in table.headers.iter().enumerate() {
        if reserved.contains(&name.as_str()) {
            continue;
        }
        if is_numeric_column(table, idx) {
            extras.push((name.clone(), idx));
        } else {
            warn!(
                source = table.kind.name(),
                column = %name,
                "dropping non-numeric column"
            );
        }
    }
    extras
}

// ============================================================================
// NORMALIZERS
// ============================================================================

fn normalize_entities(table: &RawSourceTable, population: Population) -> Result<EntityTable> {
    table.require_columns()?;

    let id_col = table.column_index("id").unwrap_or_default();
    let industry_col = table.column_index("INDUSTRY");
    let employee_col = table.column_index("EMPLOYEE_RANGE");
    let close_col = table.column_index("CLOSEDATE");
    let mrr_col = table.column_index("MRR");

    // ALEXA_RANK is always numeric (coerced); other extras only if they look numeric
    let mut numeric: Vec<(String, usize)> = Vec::new();
    if let Some(idx) = table.column_index("ALEXA_RANK") {
        numeric.push(("ALEXA_RANK".to_string(), idx));
    }
    let mut reserved = ENTITY_RESERVED.to_vec();
    reserved.push("ALEXA_RANK");
    numeric.extend(numeric_extras(table, &reserved));

    let mut records = Vec::with_capacity(table.len());
    let mut skipped_rows = 0;

    for row in &table.rows {
        let Some(id) = parse_id(table.cell(row, id_col)) else {
            skipped_rows += 1;
            continue;
        };

        let (close_date, mrr) = match population {
            Population::Customer => (
                close_col.and_then(|c| parse_datetime(table.cell(row, c))),
                mrr_col.and_then(|c| parse_number(table.cell(row, c))),
            ),
            Population::NonCustomer => (None, Some(0.0)),
        };

        records.push(EntityRecord {
            id,
            population,
            close_date,
            mrr,
            industry: category(industry_col.map(|c| table.cell(row, c)).unwrap_or("")),
            employee_range: category(employee_col.map(|c| table.cell(row, c)).unwrap_or("")),
            numerics: numeric
                .iter()
                .map(|(_, idx)| parse_number(table.cell(row, *idx)))
                .collect(),
        });
    }

    if skipped_rows > 0 {
        warn!(
            source = population.name(),
            skipped_rows, "rows skipped: id is not an integer"
        );
    }
    info!(source = population.name(), rows = records.len(), "normalized entities");

    Ok(EntityTable {
        population,
        numeric_columns: numeric.into_iter().map(|(name, _)| name).collect(),
        records,
        skipped_rows,
    })
}

/// Coerce CLOSEDATE, MRR, ALEXA_RANK and fill missing categoricals
pub fn normalize_customers(table: &RawSourceTable) -> Result<EntityTable> {
    normalize_entities(table, Population::Customer)
}

/// Coerce ALEXA_RANK, fill missing categoricals and set MRR = 0
pub fn normalize_noncustomers(table: &RawSourceTable) -> Result<EntityTable> {
    normalize_entities(table, Population::NonCustomer)
}

/// Coerce WHEN_TIMESTAMP and fill missing action counts with 0
pub fn normalize_events(table: &RawSourceTable) -> Result<EventTable> {
    debug_assert_eq!(table.kind, SourceKind::Events);
    table.require_columns()?;

    let id_col = table.column_index("id").unwrap_or_default();
    let when_col = table.column_index("WHEN_TIMESTAMP").unwrap_or_default();
    let counts = numeric_extras(table, EVENT_RESERVED);

    let mut records = Vec::with_capacity(table.len());
    let mut skipped_rows = 0;

    for row in &table.rows {
        let Some(id) = parse_id(table.cell(row, id_col)) else {
            skipped_rows += 1;
            continue;
        };

        records.push(EventRecord {
            id,
            when: parse_datetime(table.cell(row, when_col)),
            counts: counts
                .iter()
                .map(|(_, idx)| parse_number(table.cell(row, *idx)).unwrap_or(0.0))
                .collect(),
        });
    }

    if skipped_rows > 0 {
        warn!(source = "events", skipped_rows, "rows skipped: id is not an integer");
    }
    info!(source = "events", rows = records.len(), "normalized events");

    Ok(EventTable {
        count_columns: counts.into_iter().map(|(name, _)| name).collect(),
        records,
        skipped_rows,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SourceKind;

    #[test]
    fn test_parse_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert_eq!(parse_datetime("2023-06-01"), Some(expected));
        assert_eq!(parse_datetime("06/01/2023"), Some(expected));
        assert_eq!(parse_datetime("2023-06-01 00:00:00"), Some(expected));
        assert_eq!(parse_datetime("2023-06-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn test_parse_number_and_id() {
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), Some(f64::INFINITY));

        assert_eq!(parse_id("7"), Some(7));
        assert_eq!(parse_id("7.0"), Some(7));
        assert_eq!(parse_id("7.5"), None);
        assert_eq!(parse_id("x7"), None);
    }

    #[test]
    fn test_normalize_customers_fills_and_coerces() {
        let raw = RawSourceTable::from_rows(
            SourceKind::Customers,
            &["id", "CLOSEDATE", "MRR", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK", "SEGMENT"],
            &[
                vec!["1", "2023-06-01", "100", "11 to 50", "Tech", "5000", "enterprise"],
                vec!["2", "garbage", "n/a", "", "", "", "smb"],
                vec!["bad-id", "2023-06-01", "1", "", "", "", ""],
            ],
        );

        let table = normalize_customers(&raw).unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.skipped_rows, 1);
        // SEGMENT is text, so it is dropped
        assert_eq!(table.numeric_columns, vec!["ALEXA_RANK".to_string()]);

        let first = &table.records[0];
        assert_eq!(first.mrr, Some(100.0));
        assert_eq!(table.numeric(first, "ALEXA_RANK"), Some(5000.0));
        assert!(first.close_date.is_some());

        let second = &table.records[1];
        assert_eq!(second.close_date, None);
        assert_eq!(second.mrr, None);
        assert_eq!(second.industry, UNKNOWN_CATEGORY);
        assert_eq!(second.employee_range, UNKNOWN_CATEGORY);
        assert_eq!(table.numeric(second, "ALEXA_RANK"), None);
    }

    #[test]
    fn test_noncustomers_get_zero_mrr() {
        let raw = RawSourceTable::from_rows(
            SourceKind::NonCustomers,
            &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"],
            &[vec!["10", "1", "Retail", "12"]],
        );

        let table = normalize_noncustomers(&raw).unwrap();
        let record = &table.records[0];
        assert_eq!(record.population, Population::NonCustomer);
        assert_eq!(record.mrr, Some(0.0));
        assert_eq!(record.close_date, None);
        assert_eq!(record.population.label(), 0);
    }

    #[test]
    fn test_normalize_events_fills_missing_counts() {
        let raw = RawSourceTable::from_rows(
            SourceKind::Events,
            &["id", "WHEN_TIMESTAMP", "clicks", "logins", "note"],
            &[
                vec!["1", "2023-01-01", "5", "", "hello"],
                vec!["1", "2023-07-01 10:00:00", "", "2", ""],
            ],
        );

        let table = normalize_events(&raw).unwrap();
        assert_eq!(table.count_columns, vec!["clicks".to_string(), "logins".to_string()]);
        assert_eq!(table.records[0].counts, vec![5.0, 0.0]);
        assert_eq!(table.records[1].counts, vec![0.0, 2.0]);
        assert!(table.records[1].when.is_some());
    }
}
