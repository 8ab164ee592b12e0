// 🏷️ Categorical Encoder
// One-hot expansion of INDUSTRY and EMPLOYEE_RANGE over the union of the
// customer and non-customer populations, so the indicator schema does not
// depend on the label or on the temporal filter.

use crate::error::{PipelineError, Result};
use crate::normalize::{EntityRecord, EntityTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoricalField {
    Industry,
    EmployeeRange,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 2] =
        [CategoricalField::Industry, CategoricalField::EmployeeRange];

    /// Source column name, also used as the indicator prefix
    pub fn column(&self) -> &'static str {
        match self {
            CategoricalField::Industry => "INDUSTRY",
            CategoricalField::EmployeeRange => "EMPLOYEE_RANGE",
        }
    }

    pub fn value<'a>(&self, record: &'a EntityRecord) -> &'a str {
        match self {
            CategoricalField::Industry => &record.industry,
            CategoricalField::EmployeeRange => &record.employee_range,
        }
    }

    pub fn indicator_name(&self, value: &str) -> String {
        format!("{}_{}", self.column(), value)
    }
}

/// Indicator columns plus one 0/1 row per entity id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub columns: Vec<String>,
    rows: BTreeMap<i64, Vec<u8>>,
}

impl CategoricalEncoding {
    pub fn indicators(&self, id: i64) -> Option<&[u8]> {
        self.rows.get(&id).map(|v| v.as_slice())
    }

    pub fn entity_count(&self) -> usize {
        self.rows.len()
    }
}

/// Fail if an id appears twice within or across the populations
fn check_unique_ids(populations: &[&EntityTable]) -> Result<()> {
    let mut seen: HashMap<i64, &str> = HashMap::new();
    for table in populations {
        for record in &table.records {
            if let Some(previous) = seen.insert(record.id, table.population.name()) {
                return Err(PipelineError::data_integrity(format!(
                    "entity id {} appears in {} and {}; ids must be unique across populations",
                    record.id,
                    previous,
                    table.population.name()
                )));
            }
        }
    }
    Ok(())
}

/// Encode the union of both populations
pub fn encode(customers: &EntityTable, noncustomers: &EntityTable) -> Result<CategoricalEncoding> {
    let populations = [customers, noncustomers];
    check_unique_ids(&populations)?;

    let all_records = || populations.iter().flat_map(|t| t.records.iter());

    // Sorted vocabulary per field; BTreeSet keeps the column order stable
    let mut columns = Vec::new();
    let mut offsets: Vec<BTreeMap<&str, usize>> = Vec::new();
    for field in CategoricalField::ALL {
        let vocabulary: BTreeSet<&str> = all_records().map(|r| field.value(r)).collect();
        let mut positions = BTreeMap::new();
        for value in vocabulary {
            positions.insert(value, columns.len());
            columns.push(field.indicator_name(value));
        }
        offsets.push(positions);
    }

    let mut rows = BTreeMap::new();
    for record in all_records() {
        let mut row = vec![0u8; columns.len()];
        for (field, positions) in CategoricalField::ALL.iter().zip(&offsets) {
            if let Some(&pos) = positions.get(field.value(record)) {
                row[pos] = 1;
            }
        }
        rows.insert(record.id, row);
    }

    info!(
        indicator_columns = columns.len(),
        entities = rows.len(),
        "encoded categorical fields"
    );

    Ok(CategoricalEncoding { columns, rows })
}

// ============================================================================
// TESTS
// ============================================================================
