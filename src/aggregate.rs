// ➗ Aggregator
// Collapses (entity, event) rows to one row per entity by column-wise mean,
// then left-joins the categorical indicators on id.

use crate::encoding::CategoricalEncoding;
use crate::error::{PipelineError, Result};
use crate::join::JoinedTable;
use crate::table::{FeatureRow, FeatureTable, LABEL_COLUMN, MRR_COLUMN};
use std::collections::BTreeMap;
use tracing::info;

/// Per-entity running state; values are kept so the mean can be computed in a
/// fixed order
struct Accumulator {
    values: Vec<Vec<f64>>,
    mrr: Option<f64>,
    label: u8,
}

impl Accumulator {
    fn new(width: usize, mrr: Option<f64>, label: u8) -> Self {
        Accumulator {
            values: vec![Vec::new(); width],
            mrr,
            label,
        }
    }

    /// Null-skipping mean. Values are sorted first so any permutation of the
    /// input rows yields bit-identical results.
    fn means(&mut self) -> Vec<Option<f64>> {
        self.values
            .iter_mut()
            .map(|col| {
                if col.is_empty() {
                    return None;
                }
                col.sort_by(|a, b| a.total_cmp(b));
                Some(col.iter().sum::<f64>() / col.len() as f64)
            })
            .collect()
    }
}

/// Append names from `extra` not already in `base`, returning the position of
/// each `extra` name in the merged list
fn union_columns(base: &mut Vec<String>, extra: &[String]) -> Vec<usize> {
    extra
        .iter()
        .map(|name| match base.iter().position(|c| c == name) {
            Some(pos) => pos,
            None => {
                base.push(name.clone());
                base.len() - 1
            }
        })
        .collect()
}

/// Mean-aggregate the joined populations and attach indicators
pub fn aggregate(joined: &[&JoinedTable], encoding: &CategoricalEncoding) -> Result<FeatureTable> {
    let mut entity_columns: Vec<String> = Vec::new();
    let mut count_columns: Vec<String> = Vec::new();
    let entity_maps: Vec<Vec<usize>> = joined
        .iter()
        .map(|t| union_columns(&mut entity_columns, &t.entity_columns))
        .collect();
    let count_maps: Vec<Vec<usize>> = joined
        .iter()
        .map(|t| union_columns(&mut count_columns, &t.count_columns))
        .collect();

    let offset = entity_columns.len();
    let width = offset + count_columns.len();

    let mut by_id: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for (t_idx, table) in joined.iter().enumerate() {
        for row in &table.rows {
            let acc = by_id
                .entry(row.id)
                .or_insert_with(|| Accumulator::new(width, row.mrr, row.is_customer));

            for (value, &pos) in row.entity_values.iter().zip(&entity_maps[t_idx]) {
                if let Some(v) = value {
                    acc.values[pos].push(*v);
                }
            }
            for (value, &pos) in row.counts.iter().zip(&count_maps[t_idx]) {
                acc.values[offset + pos].push(*value);
            }
        }
    }

    let mut columns: Vec<String> = entity_columns;
    columns.extend(count_columns);
    columns.push(MRR_COLUMN.to_string());
    columns.push(LABEL_COLUMN.to_string());
    columns.extend(encoding.columns.iter().cloned());

    let mut rows = Vec::with_capacity(by_id.len());
    let mut missing_indicators = Vec::new();

    for (id, mut acc) in by_id {
        let Some(indicators) = encoding.indicators(id) else {
            missing_indicators.push(id);
            continue;
        };

        let mut values = acc.means();
        values.push(acc.mrr);
        values.push(Some(f64::from(acc.label)));
        values.extend(indicators.iter().map(|&b| Some(f64::from(b))));

        rows.push(FeatureRow { id, values });
    }

    if !missing_indicators.is_empty() {
        return Err(PipelineError::data_integrity(format!(
            "{} aggregated entities have no categorical indicator row: {:?}",
            missing_indicators.len(),
            missing_indicators
        )));
    }

    info!(entities = rows.len(), columns = columns.len() + 1, "aggregated feature table");
    FeatureTable::new(columns, rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode;
    use crate::join::{join_customers, join_noncustomers};
    use crate::loader::{RawSourceTable, SourceKind};
    use crate::normalize::{normalize_customers, normalize_events, normalize_noncustomers};

    const CUSTOMER_HEADERS: &[&str] =
        &["id", "CLOSEDATE", "MRR", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"];
    const NONCUSTOMER_HEADERS: &[&str] = &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"];

    fn build(events: &[Vec<&str>]) -> FeatureTable {
        let customers = normalize_customers(&RawSourceTable::from_rows(
            SourceKind::Customers,
            CUSTOMER_HEADERS,
            &[vec!["1", "2023-06-01", "100", "11 to 50", "Tech", "5000"]],
        ))
        .unwrap();
        let noncustomers = normalize_noncustomers(&RawSourceTable::from_rows(
            SourceKind::NonCustomers,
            NONCUSTOMER_HEADERS,
            &[vec!["2", "", "Retail", ""]],
        ))
        .unwrap();
        let events = normalize_events(&RawSourceTable::from_rows(
            SourceKind::Events,
            &["id", "WHEN_TIMESTAMP", "clicks"],
            events,
        ))
        .unwrap();

        let encoding = encode(&customers, &noncustomers).unwrap();
        let c = join_customers(&customers, &events).unwrap();
        let n = join_noncustomers(&noncustomers, &events).unwrap();
        aggregate(&[&c, &n], &encoding).unwrap()
    }

    #[test]
    fn test_mean_aggregation_and_indicators() {
        let table = build(&[
            vec!["1", "2023-01-01", "5"],
            vec!["1", "2023-07-01", "9"],
            vec!["2", "2023-01-01", "1"],
            vec!["2", "2023-02-01", "2"],
        ]);

        assert_eq!(table.len(), 2);
        let c = &table.rows()[0];
        assert_eq!(c.id, 1);
        assert_eq!(table.value(c, "clicks"), Some(5.0));
        assert_eq!(table.value(c, "MRR"), Some(100.0));
        assert_eq!(table.value(c, "IS_CUSTOMER"), Some(1.0));
        assert_eq!(table.value(c, "INDUSTRY_Tech"), Some(1.0));
        assert_eq!(table.value(c, "INDUSTRY_Retail"), Some(0.0));
        assert_eq!(table.value(c, "ALEXA_RANK"), Some(5000.0));

        let n = &table.rows()[1];
        assert_eq!(table.value(n, "clicks"), Some(1.5));
        assert_eq!(table.value(n, "MRR"), Some(0.0));
        assert_eq!(table.value(n, "IS_CUSTOMER"), Some(0.0));
        // ALEXA_RANK was empty for every joined row
        assert_eq!(table.value(n, "ALEXA_RANK"), None);

        // indicators are fully populated for every row
        for row in table.rows() {
            for col in table.columns().iter().filter(|c| c.starts_with("INDUSTRY_") || c.starts_with("EMPLOYEE_RANGE_")) {
                assert!(table.value(row, col).is_some());
            }
        }
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let forward = build(&[
            vec!["2", "2023-01-01", "0.1"],
            vec!["2", "2023-01-02", "0.2"],
            vec!["2", "2023-01-03", "0.3"],
            vec!["1", "2023-01-01", "1"],
        ]);
        let reversed = build(&[
            vec!["1", "2023-01-01", "1"],
            vec!["2", "2023-01-03", "0.3"],
            vec!["2", "2023-01-02", "0.2"],
            vec!["2", "2023-01-01", "0.1"],
        ]);

        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_missing_indicator_row_is_reported() {
        let customers = normalize_customers(&RawSourceTable::from_rows(
            SourceKind::Customers,
            CUSTOMER_HEADERS,
            &[vec!["1", "2023-06-01", "100", "1", "Tech", ""]],
        ))
        .unwrap();
        let empty = normalize_noncustomers(&RawSourceTable::from_rows(
            SourceKind::NonCustomers,
            NONCUSTOMER_HEADERS,
            &[],
        ))
        .unwrap();
        let events = normalize_events(&RawSourceTable::from_rows(
            SourceKind::Events,
            &["id", "WHEN_TIMESTAMP"],
            &[vec!["1", "2023-01-01"]],
        ))
        .unwrap();

        // encoding built from a population that lacks id=1
        let encoding = encode(&empty, &empty.clone()).unwrap();
        let joined = join_customers(&customers, &events).unwrap();

        let err = aggregate(&[&joined], &encoding).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
        assert!(err.to_string().contains("[1]"));
    }
}
