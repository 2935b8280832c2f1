//! # Versioned Backend
//!
//! The row store every other component is written against.
//!
//! Rows live in a handful of tables and are addressed by a three-part key:
//! `(scope, partition, sort)`. The scope is the tenant, the partition is
//! the thing being versioned or traversed (an entity, an edge list, a
//! search scope), and the sort component orders rows inside the partition
//! (versions, edge sequence numbers, document numbers).
//!
//! Writes are never executed piecemeal. Stores *prepare* a
//! [`MutationBatch`], callers may [`MutationBatch::merge`] several of them,
//! and [`Backend::execute`] applies the result atomically: every
//! precondition is checked and every mutation applied in one transaction,
//! or nothing is.
//!
//! Two implementations are provided:
//! - [`MemoryBackend`]: `BTreeMap` tables (fast, volatile)
//! - [`RedbBackend`]: redb database (ACID, crash-safe, persistent)

mod memory;
mod redb_backend;

pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;

use crate::CorvidError;
use std::fmt;
use std::ops::Bound;

// =============================================================================
// KEYS
// =============================================================================

/// The tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Stage markers, partition = entity, sort = version.
    Log,
    /// Entity snapshots, partition = entity, sort = version.
    Entity,
    /// Edges in insertion order, partition = source + edge name, sort = sequence.
    Edge,
    /// Edge existence, partition = source + edge name + target.
    EdgeIndex,
    /// Search documents, partition = index scope, sort = document number.
    Search,
}

impl Table {
    /// Every table, in a fixed order.
    pub const ALL: [Table; 5] = [
        Table::Log,
        Table::Entity,
        Table::Edge,
        Table::EdgeIndex,
        Table::Search,
    ];

    /// Storage name of the table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Log => "mvcc_log",
            Self::Entity => "mvcc_entity",
            Self::Edge => "graph_edge",
            Self::EdgeIndex => "graph_edge_index",
            Self::Search => "search_document",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of one row.
///
/// Field order matters: rows sort by scope, then partition, then sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub scope: String,
    pub partition: String,
    pub sort: u64,
}

impl RowKey {
    #[must_use]
    pub fn new(scope: impl Into<String>, partition: impl Into<String>, sort: u64) -> Self {
        Self {
            scope: scope.into(),
            partition: partition.into(),
            sort,
        }
    }
}

/// Bounds on the sort component of a partition read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortRange {
    pub start: Bound<u64>,
    pub end: Bound<u64>,
    /// Newest (highest sort key) first.
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl Default for SortRange {
    fn default() -> Self {
        Self::all()
    }
}

impl SortRange {
    /// The whole partition in ascending order.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }

    /// Only sort keys strictly greater than `sort`.
    #[must_use]
    pub const fn after(mut self, sort: u64) -> Self {
        self.start = Bound::Excluded(sort);
        self
    }

    /// Only sort keys greater than or equal to `sort`.
    #[must_use]
    pub const fn starting_at(mut self, sort: u64) -> Self {
        self.start = Bound::Included(sort);
        self
    }

    /// Only sort keys less than or equal to `sort`.
    #[must_use]
    pub const fn up_to(mut self, sort: u64) -> Self {
        self.end = Bound::Included(sort);
        self
    }

    #[must_use]
    pub const fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The bounds as an inclusive `(low, high)` pair, or `None` when no sort
    /// key can satisfy them.
    #[must_use]
    pub fn inclusive_bounds(&self) -> Option<(u64, u64)> {
        let low = match self.start {
            Bound::Included(s) => s,
            Bound::Excluded(s) => s.checked_add(1)?,
            Bound::Unbounded => 0,
        };
        let high = match self.end {
            Bound::Included(e) => e,
            Bound::Excluded(e) => e.checked_sub(1)?,
            Bound::Unbounded => u64::MAX,
        };
        (low <= high).then_some((low, high))
    }

    /// Whether `sort` falls within the bounds.
    #[must_use]
    pub fn contains(&self, sort: u64) -> bool {
        let above = match self.start {
            Bound::Included(s) => sort >= s,
            Bound::Excluded(s) => sort > s,
            Bound::Unbounded => true,
        };
        let below = match self.end {
            Bound::Included(e) => sort <= e,
            Bound::Excluded(e) => sort < e,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Rows of one partition: `(sort, value)` pairs in the requested order.
pub type PartitionRows = Vec<(u64, Vec<u8>)>;

// =============================================================================
// MUTATIONS
// =============================================================================

/// A single row write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put {
        table: Table,
        key: RowKey,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: RowKey,
    },
}

/// A row state that must hold for a batch to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub table: Table,
    pub key: RowKey,
    /// Expected current value; `None` means the row must not exist.
    pub expected: Option<Vec<u8>>,
}

/// A prepared, not yet executed, set of row writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[must_use = "a prepared batch does nothing until it is executed"]
pub struct MutationBatch {
    preconditions: Vec<Precondition>,
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row put.
    pub fn put(mut self, table: Table, key: RowKey, value: Vec<u8>) -> Self {
        self.mutations.push(Mutation::Put { table, key, value });
        self
    }

    /// Add a row delete.
    pub fn delete(mut self, table: Table, key: RowKey) -> Self {
        self.mutations.push(Mutation::Delete { table, key });
        self
    }

    /// Require `key` to currently hold `expected`.
    pub fn expect(mut self, table: Table, key: RowKey, expected: Option<Vec<u8>>) -> Self {
        self.preconditions.push(Precondition {
            table,
            key,
            expected,
        });
        self
    }

    /// Append another batch's preconditions and mutations to this one.
    ///
    /// The merged batch executes as a single atomic unit.
    pub fn merge(mut self, other: MutationBatch) -> Self {
        self.preconditions.extend(other.preconditions);
        self.mutations.extend(other.mutations);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.preconditions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    #[must_use]
    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

/// Result of executing a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ExecuteOutcome {
    /// Every mutation was applied.
    Applied,
    /// Nothing was applied because a precondition did not hold.
    PreconditionFailed {
        /// Index into [`MutationBatch::preconditions`].
        index: usize,
        /// The value actually found.
        actual: Option<Vec<u8>>,
    },
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// A versioned row store with atomic batch execution.
///
/// Implementations must be safe to share between threads; the engine does
/// no locking of its own around backend calls.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Check every precondition and apply every mutation atomically.
    fn execute(&self, batch: MutationBatch) -> Result<ExecuteOutcome, CorvidError>;

    /// Point read.
    fn get(&self, table: Table, key: &RowKey) -> Result<Option<Vec<u8>>, CorvidError>;

    /// Ordered read of one partition.
    fn range(
        &self,
        table: Table,
        scope: &str,
        partition: &str,
        range: SortRange,
    ) -> Result<PartitionRows, CorvidError>;

    /// Ordered read of many partitions with the same bounds.
    ///
    /// The outer error means the read could not start at all; inner errors
    /// are scoped to one partition. Implementations should serve the whole
    /// call from a single read transaction. The default issues one
    /// [`Backend::range`] per partition.
    fn range_many(
        &self,
        table: Table,
        scope: &str,
        partitions: &[String],
        range: SortRange,
    ) -> Result<Vec<Result<PartitionRows, CorvidError>>, CorvidError> {
        Ok(partitions
            .iter()
            .map(|partition| self.range(table, scope, partition, range))
            .collect())
    }

    /// Total number of rows in a table.
    fn row_count(&self, table: Table) -> Result<u64, CorvidError>;
}

/// Map any backend-specific error to [`CorvidError::BackendUnavailable`].
pub(crate) fn unavailable(e: impl fmt::Display) -> CorvidError {
    CorvidError::BackendUnavailable(e.to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_order() {
        let a = MutationBatch::new().put(Table::Log, RowKey::new("s", "p", 1), vec![1]);
        let b = MutationBatch::new()
            .expect(Table::Log, RowKey::new("s", "p", 1), None)
            .put(Table::Entity, RowKey::new("s", "p", 1), vec![2]);

        let merged = a.merge(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.preconditions().len(), 1);
        assert!(matches!(
            merged.mutations()[0],
            Mutation::Put {
                table: Table::Log,
                ..
            }
        ));
    }

    #[test]
    fn empty_batch() {
        assert!(MutationBatch::new().is_empty());
    }

    #[test]
    fn sort_range_contains() {
        let r = SortRange::all().after(5).up_to(10);
        assert!(!r.contains(5));
        assert!(r.contains(6));
        assert!(r.contains(10));
        assert!(!r.contains(11));
        assert!(SortRange::all().starting_at(5).contains(5));
    }

    #[test]
    fn inclusive_bounds_detects_empty_ranges() {
        assert_eq!(SortRange::all().inclusive_bounds(), Some((0, u64::MAX)));
        assert_eq!(SortRange::all().after(5).up_to(5).inclusive_bounds(), None);
        assert_eq!(SortRange::all().after(u64::MAX).inclusive_bounds(), None);
        assert_eq!(
            SortRange::all().after(1).up_to(3).inclusive_bounds(),
            Some((2, 3))
        );
    }

    #[test]
    fn row_keys_sort_by_partition_then_sort() {
        let a = RowKey::new("t", "a", 9);
        let b = RowKey::new("t", "b", 1);
        let c = RowKey::new("t", "b", 2);
        assert!(a < b);
        assert!(b < c);
    }
}
