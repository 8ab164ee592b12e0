// ⏰ Temporal Join & Labeling
//
// Customers join events on `id` and keep only rows where
//   CLOSEDATE > WHEN_TIMESTAMP   (strict; null on either side never passes)
// Non-customers join events on `id` with no temporal filter.
// Every joined row carries IS_CUSTOMER (1 / 0).

use crate::error::{PipelineError, Result};
use crate::normalize::{EntityTable, EventTable, Population};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

// ============================================================================
// TYPES
// ============================================================================

/// Which admissibility rule applies to a population's events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalFilter {
    /// Event must happen strictly before the entity's close date
    BeforeCloseDate,
    /// Every matching event counts
    Unfiltered,
}

impl TemporalFilter {
    pub fn for_population(population: Population) -> Self {
        match population {
            Population::Customer => TemporalFilter::BeforeCloseDate,
            Population::NonCustomer => TemporalFilter::Unfiltered,
        }
    }

    pub fn admits(&self, close_date: Option<NaiveDateTime>, when: Option<NaiveDateTime>) -> bool {
        match self {
            TemporalFilter::Unfiltered => true,
            TemporalFilter::BeforeCloseDate => match (close_date, when) {
                (Some(close), Some(when)) => close > when,
                _ => false,
            },
        }
    }
}

/// One (entity, event) pair that survived the join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub id: i64,
    pub is_customer: u8,
    pub mrr: Option<f64>,
    /// Aligned with `JoinedTable::entity_columns`
    pub entity_values: Vec<Option<f64>>,
    /// Aligned with `JoinedTable::count_columns`
    pub counts: Vec<f64>,
    pub when: Option<NaiveDateTime>,
}

/// Row-count metrics for one population's join
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinStats {
    pub entities: usize,
    /// Pairs produced by the id match, before the temporal filter
    pub matched_rows: usize,
    pub removed_by_temporal_filter: usize,
    pub kept_rows: usize,
    /// Entities with no admissible event; absent from the merged table
    pub entities_without_rows: usize,
}

impl JoinStats {
    /// Input existed but nothing survived
    pub fn collapsed(&self) -> bool {
        self.entities > 0 && self.kept_rows == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedTable {
    pub population: Population,
    pub entity_columns: Vec<String>,
    pub count_columns: Vec<String>,
    pub rows: Vec<JoinedRow>,
    pub stats: JoinStats,
}

// ============================================================================
// JOIN
// ============================================================================

/// Reject event columns that would shadow an entity column after the join
pub fn check_column_collisions(entities: &EntityTable, events: &EventTable) -> Result<()> {
    let reserved = ["id", "MRR", "IS_CUSTOMER", "INDUSTRY", "EMPLOYEE_RANGE", "CLOSEDATE"];
    for column in &events.count_columns {
        if reserved.contains(&column.as_str()) || entities.numeric_columns.contains(column) {
            return Err(PipelineError::data_integrity(format!(
                "event column '{}' collides with a {} column",
                column,
                entities.population.name()
            )));
        }
    }
    Ok(())
}

/// Join one population onto the events by id and tag it with IS_CUSTOMER
pub fn join_population(entities: &EntityTable, events: &EventTable) -> Result<JoinedTable> {
    check_column_collisions(entities, events)?;

    let filter = TemporalFilter::for_population(entities.population);

    let mut by_id: HashMap<i64, Vec<usize>> = HashMap::new();
    for (idx, event) in events.records.iter().enumerate() {
        by_id.entry(event.id).or_default().push(idx);
    }

    let mut stats = JoinStats {
        entities: entities.records.len(),
        ..JoinStats::default()
    };
    let mut rows = Vec::new();

    for entity in &entities.records {
        let matches = by_id.get(&entity.id).map(|v| v.as_slice()).unwrap_or(&[]);
        stats.matched_rows += matches.len();

        let mut kept_for_entity = 0;
        for &event_idx in matches {
            let event = &events.records[event_idx];
            if !filter.admits(entity.close_date, event.when) {
                stats.removed_by_temporal_filter += 1;
                continue;
            }

            rows.push(JoinedRow {
                id: entity.id,
                is_customer: entity.population.label(),
                mrr: entity.mrr,
                entity_values: entity.numerics.clone(),
                counts: event.counts.clone(),
                when: event.when,
            });
            kept_for_entity += 1;
        }

        if kept_for_entity == 0 {
            stats.entities_without_rows += 1;
        }
    }
    stats.kept_rows = rows.len();

    if stats.collapsed() {
        warn!(
            population = entities.population.name(),
            entities = stats.entities,
            matched = stats.matched_rows,
            "join produced zero rows; check id types across sources"
        );
    } else if stats.entities_without_rows > 0 {
        warn!(
            population = entities.population.name(),
            dropped_entities = stats.entities_without_rows,
            "entities without admissible events are excluded"
        );
    }
    info!(
        population = entities.population.name(),
        matched = stats.matched_rows,
        removed_by_temporal_filter = stats.removed_by_temporal_filter,
        kept = stats.kept_rows,
        "joined events"
    );

    Ok(JoinedTable {
        population: entities.population,
        entity_columns: entities.numeric_columns.clone(),
        count_columns: events.count_columns.clone(),
        rows,
        stats,
    })
}

/// Customers: events strictly before CLOSEDATE, IS_CUSTOMER = 1
pub fn join_customers(customers: &EntityTable, events: &EventTable) -> Result<JoinedTable> {
    join_population(customers, events)
}

/// Non-customers: every matching event, IS_CUSTOMER = 0
pub fn join_noncustomers(noncustomers: &EntityTable, events: &EventTable) -> Result<JoinedTable> {
    join_population(noncustomers, events)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{RawSourceTable, SourceKind};
    use crate::normalize::{normalize_customers, normalize_events, normalize_noncustomers};

    fn customers() -> EntityTable {
        normalize_customers(&RawSourceTable::from_rows(
            SourceKind::Customers,
            &["id", "CLOSEDATE", "MRR", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"],
            &[
                vec!["1", "2023-06-01", "100", "11 to 50", "Tech", "5000"],
                vec!["2", "", "50", "1", "Retail", ""],
            ],
        ))
        .unwrap()
    }

    fn events() -> EventTable {
        normalize_events(&RawSourceTable::from_rows(
            SourceKind::Events,
            &["id", "WHEN_TIMESTAMP", "clicks"],
            &[
                vec!["1", "2023-01-01", "5"],
                vec!["1", "2023-07-01", "9"],
                vec!["1", "2023-06-01", "7"],
                vec!["2", "2023-01-01", "3"],
                vec!["3", "2023-01-01", "4"],
            ],
        ))
        .unwrap()
    }

    #[test]
    fn test_customer_join_is_strictly_before_close_date() {
        let joined = join_customers(&customers(), &events()).unwrap();

        // Only the 2023-01-01 event for id=1 survives; the event on the close date
        // itself and the one after it are excluded. id=2 has no close date.
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].id, 1);
        assert_eq!(joined.rows[0].counts, vec![5.0]);
        assert_eq!(joined.rows[0].is_customer, 1);

        assert_eq!(joined.stats.matched_rows, 4);
        assert_eq!(joined.stats.removed_by_temporal_filter, 3);
        assert_eq!(joined.stats.entities_without_rows, 1);
    }

    #[test]
    fn test_noncustomer_join_has_no_filter() {
        let noncustomers = normalize_noncustomers(&RawSourceTable::from_rows(
            SourceKind::NonCustomers,
            &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"],
            &[vec!["3", "", "Tech", "10"]],
        ))
        .unwrap();

        let joined = join_noncustomers(&noncustomers, &events()).unwrap();
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].is_customer, 0);
        assert_eq!(joined.rows[0].mrr, Some(0.0));
        assert_eq!(joined.stats.removed_by_temporal_filter, 0);
    }

    #[test]
    fn test_mismatched_ids_collapse_silently() {
        let noncustomers = normalize_noncustomers(&RawSourceTable::from_rows(
            SourceKind::NonCustomers,
            &["id", "EMPLOYEE_RANGE", "INDUSTRY", "ALEXA_RANK"],
            &[vec!["77", "", "", ""]],
        ))
        .unwrap();

        let joined = join_noncustomers(&noncustomers, &events()).unwrap();
        assert!(joined.rows.is_empty());
        assert!(joined.stats.collapsed());
    }

    #[test]
    fn test_event_column_collision_is_rejected() {
        let events = normalize_events(&RawSourceTable::from_rows(
            SourceKind::Events,
            &["id", "WHEN_TIMESTAMP", "ALEXA_RANK"],
            &[vec!["1", "2023-01-01", "1"]],
        ))
        .unwrap();

        let err = join_customers(&customers(), &events).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn test_filter_rejects_null_timestamps() {
        let filter = TemporalFilter::BeforeCloseDate;
        let close = crate::normalize::parse_datetime("2023-06-01");
        assert!(!filter.admits(close, None));
        assert!(!filter.admits(None, close));
        assert!(TemporalFilter::Unfiltered.admits(None, None));
    }
}
