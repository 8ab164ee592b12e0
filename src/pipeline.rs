// 🔗 Feature-merge pipeline
// Loader → Normalizer → Temporal Join & Labeling → Encoder + Aggregator
// Each stage fully consumes its input before the next starts.

use crate::aggregate::aggregate;
use crate::encoding::encode;
use crate::error::{PipelineError, Result};
use crate::join::{join_customers, join_noncustomers, JoinStats};
use crate::loader::{load_sources, RawSources, SourcePaths};
use crate::normalize::{normalize_customers, normalize_events, normalize_noncustomers};
use crate::table::FeatureTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Rows dropped during normalization because their id was unusable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkippedRows {
    pub customers: usize,
    pub noncustomers: usize,
    pub events: usize,
}

/// Row-count metrics of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub customers_loaded: usize,
    pub noncustomers_loaded: usize,
    pub events_loaded: usize,
    pub skipped_rows: SkippedRows,
    pub customer_join: JoinStats,
    pub noncustomer_join: JoinStats,
    pub entities_merged: usize,
    pub columns: usize,
    pub schema_fingerprint: String,
}

impl MergeReport {
    /// Conditions worth a warning that did not abort the run
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let skipped = &self.skipped_rows;
        if skipped.customers + skipped.noncustomers + skipped.events > 0 {
            warnings.push(format!(
                "rows with unusable ids skipped: customers={}, noncustomers={}, events={}",
                skipped.customers, skipped.noncustomers, skipped.events
            ));
        }

        for (name, stats) in [
            ("customers", &self.customer_join),
            ("noncustomers", &self.noncustomer_join),
        ] {
            if stats.collapsed() {
                warnings.push(format!(
                    "{} join produced zero rows from {} entities",
                    name, stats.entities
                ));
            } else if stats.entities_without_rows > 0 {
                warnings.push(format!(
                    "{} {} without admissible events were excluded",
                    stats.entities_without_rows, name
                ));
            }
        }

        warnings
    }

    pub fn summary(&self) -> String {
        format!(
            "Pipeline run {}: {} customers + {} noncustomers + {} events → {} entities × {} columns",
            self.run_id,
            self.customers_loaded,
            self.noncustomers_loaded,
            self.events_loaded,
            self.entities_merged,
            self.columns
        )
    }
}

/// Merged table together with the metrics of the run that built it
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: FeatureTable,
    pub report: MergeReport,
}

/// Build the merged feature table from already-loaded sources
pub fn build_feature_table(sources: &RawSources) -> Result<PipelineOutput> {
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();

    let customers = normalize_customers(&sources.customers)?;
    let noncustomers = normalize_noncustomers(&sources.noncustomers)?;
    let events = normalize_events(&sources.events)?;

    let encoding = encode(&customers, &noncustomers)?;

    let customer_rows = join_customers(&customers, &events)?;
    let noncustomer_rows = join_noncustomers(&noncustomers, &events)?;

    if customer_rows.rows.is_empty() && noncustomer_rows.rows.is_empty() {
        return Err(PipelineError::data_integrity(format!(
            "join collapsed to zero rows ({} customers, {} noncustomers, {} events); \
             check that ids share a type across sources",
            customers.records.len(),
            noncustomers.records.len(),
            events.records.len()
        )));
    }

    let table = aggregate(&[&customer_rows, &noncustomer_rows], &encoding)?;

    let report = MergeReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        customers_loaded: sources.customers.len(),
        noncustomers_loaded: sources.noncustomers.len(),
        events_loaded: sources.events.len(),
        skipped_rows: SkippedRows {
            customers: customers.skipped_rows,
            noncustomers: noncustomers.skipped_rows,
            events: events.skipped_rows,
        },
        customer_join: customer_rows.stats,
        noncustomer_join: noncustomer_rows.stats,
        entities_merged: table.len(),
        columns: table.schema().len(),
        schema_fingerprint: table.schema_fingerprint(),
    };

    for warning in report.warnings() {
        warn!(run_id = %report.run_id, "{}", warning);
    }
    info!(run_id = %report.run_id, "{}", report.summary());

    Ok(PipelineOutput { table, report })
}

/// Load the three CSV sources and build the merged table
pub fn run_pipeline(paths: &SourcePaths) -> Result<PipelineOutput> {
    let sources = load_sources(paths)?;
    build_feature_table(&sources)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{RawSourceTable, SourceKind};
    use std::io::Write;
    use tempfile::TempDir;

    const CUSTOMER_HEADERS: &[&str] =
        &["id", "CLOSEDATE", "MRR", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"];
    const NONCUSTOMER_HEADERS: &[&str] = &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"];

    fn sources(
        customers: &[Vec<&str>],
        noncustomers: &[Vec<&str>],
        events: &[Vec<&str>],
    ) -> RawSources {
        RawSources {
            customers: RawSourceTable::from_rows(SourceKind::Customers, CUSTOMER_HEADERS, customers),
            noncustomers: RawSourceTable::from_rows(
                SourceKind::NonCustomers,
                NONCUSTOMER_HEADERS,
                noncustomers,
            ),
            events: RawSourceTable::from_rows(
                SourceKind::Events,
                &["id", "WHEN_TIMESTAMP", "clicks"],
                events,
            ),
        }
    }

    #[test]
    fn test_close_date_scenario() {
        let output = build_feature_table(&sources(
            &[vec!["1", "2023-06-01", "100", "", "Tech", ""]],
            &[],
            &[vec!["1", "2023-01-01", "5"], vec!["1", "2023-07-01", "9"]],
        ))
        .unwrap();

        let table = &output.table;
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.id, 1);
        assert_eq!(table.value(row, "clicks"), Some(5.0));
        assert_eq!(table.value(row, "IS_CUSTOMER"), Some(1.0));
        assert_eq!(table.value(row, "INDUSTRY_Tech"), Some(1.0));

        assert_eq!(output.report.customer_join.removed_by_temporal_filter, 1);
        assert_eq!(output.report.entities_merged, 1);
        assert_eq!(output.report.schema_fingerprint, table.schema_fingerprint());
    }

    #[test]
    fn test_single_population_entities_appear_once() {
        let output = build_feature_table(&sources(
            &[
                vec!["1", "2023-06-01", "100", "1", "Tech", "10"],
                vec!["2", "2023-06-01", "200", "2", "Retail", "20"],
            ],
            &[vec!["3", "1", "Tech", "30"], vec!["4", "", "", ""]],
            &[
                vec!["1", "2023-01-01", "5"],
                vec!["1", "2023-02-01", "6"],
                vec!["2", "2023-03-01", "1"],
                vec!["3", "2023-01-01", "2"],
                vec!["3", "2023-08-01", "4"],
                vec!["4", "2024-01-01", "8"],
            ],
        ))
        .unwrap();

        let ids: Vec<i64> = output.table.rows().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let indicator_cols: Vec<&String> = output
            .table
            .columns()
            .iter()
            .filter(|c| c.starts_with("INDUSTRY_") || c.starts_with("EMPLOYEE_RANGE_"))
            .collect();
        for row in output.table.rows() {
            let set: f64 = indicator_cols
                .iter()
                .map(|c| output.table.value(row, c).expect("indicator populated"))
                .sum();
            // exactly one INDUSTRY and one EMPLOYEE_RANGE indicator per row
            assert_eq!(set, 2.0);
        }
        assert!(output.report.warnings().is_empty());
    }

    #[test]
    fn test_customers_only_and_noncustomers_only_share_indicator_schema() {
        let customers_only = build_feature_table(&sources(
            &[
                vec!["1", "2023-06-01", "1", "1", "Tech", ""],
                vec!["2", "2023-06-01", "1", "2", "Retail", ""],
            ],
            &[],
            &[vec!["1", "2023-01-01", "1"], vec!["2", "2023-01-01", "1"]],
        ))
        .unwrap();

        let noncustomers_only = build_feature_table(&sources(
            &[],
            &[vec!["1", "2", "Retail", ""], vec!["2", "1", "Tech", ""]],
            &[vec!["1", "2023-01-01", "1"], vec!["2", "2023-01-01", "1"]],
        ))
        .unwrap();

        assert_eq!(
            customers_only.table.columns(),
            noncustomers_only.table.columns()
        );
    }

    #[test]
    fn test_zero_row_collapse_is_fatal() {
        let err = build_feature_table(&sources(
            &[vec!["1", "2023-06-01", "1", "", "", ""]],
            &[vec!["2", "", "", ""]],
            &[vec!["99", "2023-01-01", "1"]],
        ))
        .unwrap_err();

        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn test_partial_collapse_is_a_warning() {
        let output = build_feature_table(&sources(
            &[vec!["1", "2023-06-01", "1", "", "", ""]],
            &[vec!["2", "", "", ""]],
            &[vec!["2", "2023-01-01", "1"]],
        ))
        .unwrap();

        assert_eq!(output.table.len(), 1);
        let warnings = output.report.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("customers join produced zero rows"));
    }

    #[test]
    fn test_run_pipeline_from_csv_files() {
        let dir = TempDir::new().unwrap();
        let write = |name: &str, lines: &[&str]| {
            let path = dir.path().join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            for line in lines {
                writeln!(file, "{}", line).unwrap();
            }
            path
        };

        let paths = SourcePaths {
            customers: write(
                "customers.csv",
                &[
                    "id,CLOSEDATE,MRR,EMPLOYEE_RANGE,INDUSTRY,ALEXA_RANK",
                    "1,2023-06-01,100,11 to 50,Tech,5000",
                ],
            ),
            noncustomers: write(
                "noncustomers.csv",
                &["id,EMPLOYEE_RANGE,INDUSTRY,ALEXA_RANK", "2,,Retail,"],
            ),
            events: write(
                "actions.csv",
                &[
                    "id,WHEN_TIMESTAMP,clicks,logins",
                    "1,2023-01-01 09:00:00,5,",
                    "2,2023-01-01 09:00:00,1,3",
                ],
            ),
        };

        let output = run_pipeline(&paths).unwrap();
        assert_eq!(output.table.len(), 2);
        assert_eq!(
            output.table.schema(),
            vec![
                "id",
                "ALEXA_RANK",
                "clicks",
                "logins",
                "MRR",
                "IS_CUSTOMER",
                "INDUSTRY_Retail",
                "INDUSTRY_Tech",
                "EMPLOYEE_RANGE_11 to 50",
                "EMPLOYEE_RANGE_Unknown",
            ]
        );
    }
}
