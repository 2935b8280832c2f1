//! # In-Memory Backend
//!
//! `BTreeMap` tables behind a single `RwLock`. A batch holds the write lock
//! for its whole execution, which gives the same all-or-nothing behaviour
//! as a redb write transaction.

use super::{
    Backend, ExecuteOutcome, Mutation, MutationBatch, PartitionRows, RowKey, SortRange, Table,
};
use crate::CorvidError;
use std::collections::BTreeMap;
use std::sync::RwLock;

type Rows = BTreeMap<RowKey, Vec<u8>>;

/// Volatile backend for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<Table, Rows>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CorvidError {
    CorvidError::BackendUnavailable("memory backend lock poisoned".to_string())
}

/// Collect one partition's rows from a table.
fn scan(rows: Option<&Rows>, scope: &str, partition: &str, range: SortRange) -> PartitionRows {
    let Some(rows) = rows else {
        return Vec::new();
    };

    let Some((low, high)) = range.inclusive_bounds() else {
        return Vec::new();
    };

    let iter = rows
        .range(RowKey::new(scope, partition, low)..=RowKey::new(scope, partition, high))
        .map(|(k, v)| (k.sort, v.clone()));
    let limit = range.limit.unwrap_or(usize::MAX);
    if range.reverse {
        iter.rev().take(limit).collect()
    } else {
        iter.take(limit).collect()
    }
}

impl Backend for MemoryBackend {
    fn execute(&self, batch: MutationBatch) -> Result<ExecuteOutcome, CorvidError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        for (index, precondition) in batch.preconditions().iter().enumerate() {
            let actual = tables
                .get(&precondition.table)
                .and_then(|rows| rows.get(&precondition.key))
                .cloned();
            if actual != precondition.expected {
                return Ok(ExecuteOutcome::PreconditionFailed { index, actual });
            }
        }

        for mutation in batch.mutations() {
            match mutation {
                Mutation::Put { table, key, value } => {
                    tables
                        .entry(*table)
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                Mutation::Delete { table, key } => {
                    if let Some(rows) = tables.get_mut(table) {
                        rows.remove(key);
                    }
                }
            }
        }
        Ok(ExecuteOutcome::Applied)
    }

    fn get(&self, table: Table, key: &RowKey) -> Result<Option<Vec<u8>>, CorvidError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    fn range(
        &self,
        table: Table,
        scope: &str,
        partition: &str,
        range: SortRange,
    ) -> Result<PartitionRows, CorvidError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(scan(tables.get(&table), scope, partition, range))
    }

    fn range_many(
        &self,
        table: Table,
        scope: &str,
        partitions: &[String],
        range: SortRange,
    ) -> Result<Vec<Result<PartitionRows, CorvidError>>, CorvidError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let rows = tables.get(&table);
        Ok(partitions
            .iter()
            .map(|partition| Ok(scan(rows, scope, partition, range)))
            .collect())
    }

    fn row_count(&self, table: Table) -> Result<u64, CorvidError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(&table).map_or(0, |rows| rows.len() as u64))
    }
}
