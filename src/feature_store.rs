// 🗂️ Feature Store View
// Read-only, id-indexed view over the merged table. Built once per pipeline run
// and shared by every request.

use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::table::FeatureTable;
use std::collections::{HashMap, HashSet};

/// Rows matched by one lookup
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Matched ids, in request order
    pub ids: Vec<i64>,
    /// Requested ids with no row in the table
    pub unknown: Vec<i64>,
    /// Feature frame for `ids` (id and label dropped)
    pub frame: Frame,
}

#[derive(Debug, Clone)]
pub struct FeatureStore {
    table: FeatureTable,
    index: HashMap<i64, usize>,
}

impl FeatureStore {
    pub fn new(table: FeatureTable) -> Self {
        let index = table
            .rows()
            .iter()
            .enumerate()
            .map(|(pos, row)| (row.id, pos))
            .collect();
        FeatureStore { table, index }
    }

    pub fn table(&self) -> &FeatureTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    /// Feature columns handed to the model, in table order
    pub fn feature_columns(&self) -> Vec<String> {
        self.table.feature_columns()
    }

    /// Select rows whose id is in `ids`.
    ///
    /// Duplicate ids collapse to their first occurrence. An empty request or a
    /// request matching nothing is a validation error.
    pub fn lookup(&self, ids: &[i64]) -> Result<Lookup> {
        if ids.is_empty() {
            return Err(PipelineError::validation("ids must not be empty"));
        }

        let mut matched = Vec::new();
        let mut positions = Vec::new();
        let mut unknown = Vec::new();

        for id in dedup_preserving_order(ids) {
            match self.index.get(&id) {
                Some(&pos) => {
                    matched.push(id);
                    positions.push(pos);
                }
                None => unknown.push(id),
            }
        }

        if matched.is_empty() {
            return Err(PipelineError::validation(format!(
                "no matching IDs found for {:?}",
                unknown
            )));
        }

        let frame = self.table.feature_frame(&positions)?;
        Ok(Lookup {
            ids: matched,
            unknown,
            frame,
        })
    }
}

/// Drop repeated ids, keeping the first occurrence of each
pub fn dedup_preserving_order(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use crate::table::{FeatureRow, LABEL_COLUMN};

    fn store() -> FeatureStore {
        let table = FeatureTable::new(
            vec!["clicks".into(), LABEL_COLUMN.into()],
            vec![
                FeatureRow { id: 10, values: vec![Some(1.0), Some(1.0)] },
                FeatureRow { id: 20, values: vec![Some(2.0), Some(0.0)] },
                FeatureRow { id: 30, values: vec![None, Some(0.0)] },
            ],
        )
        .unwrap();
        FeatureStore::new(table)
    }

    #[test]
    fn test_lookup_keeps_request_order_and_dedups() {
        let lookup = store().lookup(&[30, 10, 30, 999]).unwrap();
        assert_eq!(lookup.ids, vec![30, 10]);
        assert_eq!(lookup.unknown, vec![999]);
        assert_eq!(lookup.frame.n_rows(), 2);
        assert_eq!(
            lookup.frame.column("clicks").unwrap().data,
            ColumnData::Numeric(vec![None, Some(1.0)])
        );
        assert!(lookup.frame.column(LABEL_COLUMN).is_none());
    }

    #[test]
    fn test_unknown_ids_are_a_validation_error() {
        let err = store().lookup(&[999]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("no matching IDs"));
    }

    #[test]
    fn test_empty_request_is_rejected() {
        assert!(matches!(
            store().lookup(&[]).unwrap_err(),
            PipelineError::Validation(_)
        ));
    }

    #[test]
    fn test_dedup_preserving_order() {
        assert_eq!(dedup_preserving_order(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
