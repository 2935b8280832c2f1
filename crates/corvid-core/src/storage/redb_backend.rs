//! # redb-backed Row Store
//!
//! A disk-backed [`Backend`] using the redb embedded database, providing:
//! - ACID transactions (a [`MutationBatch`] is one write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//! - Zero configuration
//!
//! Every table shares one key layout, `(scope, partition, sort)`, so a
//! partition read is a single contiguous B-tree range.

use super::{
    Backend, ExecuteOutcome, Mutation, MutationBatch, PartitionRows, RowKey, SortRange, Table,
    unavailable,
};
use crate::CorvidError;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};
use std::path::Path;

type RowTable = TableDefinition<'static, (&'static str, &'static str, u64), &'static [u8]>;

/// Stage markers: (tenant, entity key, version) -> stage
const LOG: RowTable = TableDefinition::new("mvcc_log");

/// Entity snapshots: (tenant, entity key, version) -> serialized snapshot
const ENTITY: RowTable = TableDefinition::new("mvcc_entity");

/// Edges: (tenant, source/edge, sequence) -> serialized edge
const EDGE: RowTable = TableDefinition::new("graph_edge");

/// Edge existence: (tenant, source/edge/target, 0) -> serialized edge
const EDGE_INDEX: RowTable = TableDefinition::new("graph_edge_index");

/// Search documents: (tenant, index scope, document number) -> serialized document
const SEARCH: RowTable = TableDefinition::new("search_document");

fn definition(table: Table) -> RowTable {
    match table {
        Table::Log => LOG,
        Table::Entity => ENTITY,
        Table::Edge => EDGE,
        Table::EdgeIndex => EDGE_INDEX,
        Table::Search => SEARCH,
    }
}

/// A disk-backed row store using redb.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CorvidError> {
        let db = Database::create(path.as_ref()).map_err(unavailable)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(unavailable)?;
        for table in Table::ALL {
            let _ = write_txn
                .open_table(definition(table))
                .map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;

        tracing::debug!(path = %path.as_ref().display(), "opened redb backend");
        Ok(Self { db })
    }

    fn scan(
        read_txn: &ReadTransaction,
        table: Table,
        scope: &str,
        partition: &str,
        range: SortRange,
    ) -> Result<PartitionRows, CorvidError> {
        let Some((low, high)) = range.inclusive_bounds() else {
            return Ok(Vec::new());
        };
        let rows = read_txn
            .open_table(definition(table))
            .map_err(unavailable)?;
        let iter = rows
            .range((scope, partition, low)..=(scope, partition, high))
            .map_err(unavailable)?;
        let limit = range.limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        if range.reverse {
            for entry in iter.rev().take(limit) {
                let (key, value) = entry.map_err(unavailable)?;
                out.push((key.value().2, value.value().to_vec()));
            }
        } else {
            for entry in iter.take(limit) {
                let (key, value) = entry.map_err(unavailable)?;
                out.push((key.value().2, value.value().to_vec()));
            }
        }
        Ok(out)
    }
}

impl Backend for RedbBackend {
    fn execute(&self, batch: MutationBatch) -> Result<ExecuteOutcome, CorvidError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;

        for (index, precondition) in batch.preconditions().iter().enumerate() {
            let actual = {
                let rows = write_txn
                    .open_table(definition(precondition.table))
                    .map_err(unavailable)?;
                let key = &precondition.key;
                rows.get((key.scope.as_str(), key.partition.as_str(), key.sort))
                    .map_err(unavailable)?
                    .map(|v| v.value().to_vec())
            };
            if actual != precondition.expected {
                write_txn.abort().map_err(unavailable)?;
                return Ok(ExecuteOutcome::PreconditionFailed { index, actual });
            }
        }

        for mutation in batch.mutations() {
            match mutation {
                Mutation::Put { table, key, value } => {
                    let mut rows = write_txn
                        .open_table(definition(*table))
                        .map_err(unavailable)?;
                    rows.insert(
                        (key.scope.as_str(), key.partition.as_str(), key.sort),
                        value.as_slice(),
                    )
                    .map_err(unavailable)?;
                }
                Mutation::Delete { table, key } => {
                    let mut rows = write_txn
                        .open_table(definition(*table))
                        .map_err(unavailable)?;
                    rows.remove((key.scope.as_str(), key.partition.as_str(), key.sort))
                        .map_err(unavailable)?;
                }
            }
        }

        write_txn.commit().map_err(unavailable)?;
        Ok(ExecuteOutcome::Applied)
    }

    fn get(&self, table: Table, key: &RowKey) -> Result<Option<Vec<u8>>, CorvidError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let rows = read_txn
            .open_table(definition(table))
            .map_err(unavailable)?;
        let value = rows
            .get((key.scope.as_str(), key.partition.as_str(), key.sort))
            .map_err(unavailable)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    fn range(
        &self,
        table: Table,
        scope: &str,
        partition: &str,
        range: SortRange,
    ) -> Result<PartitionRows, CorvidError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        Self::scan(&read_txn, table, scope, partition, range)
    }

    fn range_many(
        &self,
        table: Table,
        scope: &str,
        partitions: &[String],
        range: SortRange,
    ) -> Result<Vec<Result<PartitionRows, CorvidError>>, CorvidError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        Ok(partitions
            .iter()
            .map(|partition| Self::scan(&read_txn, table, scope, partition, range))
            .collect())
    }

    fn row_count(&self, table: Table) -> Result<u64, CorvidError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let rows = read_txn
            .open_table(definition(table))
            .map_err(unavailable)?;
        rows.len().map_err(unavailable)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(partition: &str, sort: u64) -> RowKey {
        RowKey::new("tenant", partition, sort)
    }

    #[test]
    fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let backend = RedbBackend::open(temp.path().join("test.redb")).expect("open db");

        let outcome = backend
            .execute(MutationBatch::new().put(Table::Entity, key("a", 1), vec![1, 2]))
            .expect("execute");
        assert_eq!(outcome, ExecuteOutcome::Applied);
        assert_eq!(
            backend.get(Table::Entity, &key("a", 1)).expect("get"),
            Some(vec![1, 2])
        );
        assert_eq!(backend.row_count(Table::Entity).expect("count"), 1);
        assert_eq!(backend.row_count(Table::Log).expect("count"), 0);
    }

    #[test]
    fn precondition_failure_rolls_back_whole_batch() {
        let temp = tempdir().expect("temp dir");
        let backend = RedbBackend::open(temp.path().join("test.redb")).expect("open db");

        let _ = backend
            .execute(MutationBatch::new().put(Table::Log, key("a", 1), vec![0]))
            .expect("seed");

        let batch = MutationBatch::new()
            .expect(Table::Log, key("a", 1), Some(vec![1]))
            .put(Table::Log, key("a", 1), vec![2])
            .put(Table::Entity, key("a", 1), vec![9]);
        let outcome = backend.execute(batch).expect("execute");

        assert_eq!(
            outcome,
            ExecuteOutcome::PreconditionFailed {
                index: 0,
                actual: Some(vec![0])
            }
        );
        assert_eq!(
            backend.get(Table::Log, &key("a", 1)).expect("get"),
            Some(vec![0])
        );
        assert_eq!(backend.row_count(Table::Entity).expect("count"), 0);
    }

    #[test]
    fn range_bounds_and_order() {
        let temp = tempdir().expect("temp dir");
        let backend = RedbBackend::open(temp.path().join("test.redb")).expect("open db");

        let mut batch = MutationBatch::new();
        for sort in 1..=5u64 {
            batch = batch.put(Table::Edge, key("src", sort), vec![sort as u8]);
        }
        batch = batch.put(Table::Edge, key("other", 3), vec![0]);
        let _ = backend.execute(batch).expect("execute");

        let page = backend
            .range(Table::Edge, "tenant", "src", SortRange::all().after(2).limit(2))
            .expect("range");
        assert_eq!(page, vec![(3, vec![3]), (4, vec![4])]);

        let bounded = backend
            .range(Table::Edge, "tenant", "src", SortRange::all().up_to(4).reversed().limit(1))
            .expect("range");
        assert_eq!(bounded, vec![(4, vec![4])]);
    }

    #[test]
    fn delete_removes_row() {
        let temp = tempdir().expect("temp dir");
        let backend = RedbBackend::open(temp.path().join("test.redb")).expect("open db");

        let _ = backend
            .execute(MutationBatch::new().put(Table::EdgeIndex, key("e", 0), vec![1]))
            .expect("put");
        let _ = backend
            .execute(MutationBatch::new().delete(Table::EdgeIndex, key("e", 0)))
            .expect("delete");
        assert_eq!(backend.get(Table::EdgeIndex, &key("e", 0)).expect("get"), None);
    }

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let backend = RedbBackend::open(&db_path).expect("open db");
            let _ = backend
                .execute(MutationBatch::new().put(Table::Log, key("a", 7), vec![7]))
                .expect("execute");
        }

        let backend = RedbBackend::open(&db_path).expect("reopen db");
        assert_eq!(
            backend.get(Table::Log, &key("a", 7)).expect("get"),
            Some(vec![7])
        );
    }

    #[test]
    fn range_many_shares_one_snapshot() {
        let temp = tempdir().expect("temp dir");
        let backend = RedbBackend::open(temp.path().join("test.redb")).expect("open db");
        let _ = backend
            .execute(
                MutationBatch::new()
                    .put(Table::Entity, key("a", 1), vec![1])
                    .put(Table::Entity, key("b", 2), vec![2]),
            )
            .expect("execute");

        let results = backend
            .range_many(
                Table::Entity,
                "tenant",
                &["a".to_string(), "b".to_string(), "c".to_string()],
                SortRange::all(),
            )
            .expect("range_many");
        let sizes: Vec<usize> = results
            .iter()
            .map(|r| r.as_ref().map(Vec::len).unwrap_or(usize::MAX))
            .collect();
        assert_eq!(sizes, vec![1, 1, 0]);
    }

    #[test]
    fn rows_survive_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let backend = RedbBackend::open(&db_path).expect("open db");
            let _ = backend
                .execute(MutationBatch::new().put(Table::Search, key("s", 1), vec![1]))
                .expect("execute");
        }
        let backend = RedbBackend::open(&db_path).expect("reopen db");
        assert_eq!(backend.row_count(Table::Search).expect("count"), 1);
    }
}
