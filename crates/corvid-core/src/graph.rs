//! # Graph Store
//!
//! Directed, named edges between entity ids.
//!
//! Two kinds of edge exist:
//! - Collection membership: tenant root -> member, named by the collection.
//! - Connections: entity -> entity, named by the connection.
//!
//! Edges of one `(source, name)` pair are kept in insertion order under a
//! sequence number taken from the shared [`VersionAllocator`], so a page of
//! edges can be resumed from the last sequence seen. A second table maps
//! `(source, name, target)` to the edge for existence checks.

use crate::serialization::{decode, encode};
use crate::storage::{Backend, MutationBatch, RowKey, SortRange, Table};
use crate::types::validate_name;
use crate::version::VersionAllocator;
use crate::primitives::{KEY_SEPARATOR, MAX_NAME_LENGTH};
use crate::{CollectionContext, CorvidError, Id};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// EDGE TYPES
// =============================================================================

/// Name of an edge list hanging off a source id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeName {
    /// Membership of a collection; the source is the tenant root.
    Collection(String),
    /// A named relationship between two entities.
    Connection(String),
}

impl EdgeName {
    /// The collection or connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Collection(name) | Self::Connection(name) => name,
        }
    }

    /// `"collection"` or `"connection"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Collection(_) => "collection",
            Self::Connection(_) => "connection",
        }
    }

    pub fn validate(&self) -> Result<(), CorvidError> {
        validate_name(self.kind(), self.name(), MAX_NAME_LENGTH)
    }

    /// Row key segment: `kind:name`.
    #[must_use]
    pub fn to_key(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }
}

impl fmt::Display for EdgeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// One directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: Id,
    pub name: EdgeName,
    pub target: Id,
    /// Insertion order within `(source, name)`.
    pub sequence: u64,
}

fn list_partition(source: &Id, name: &EdgeName) -> String {
    format!("{}{}{}", source.to_key(), KEY_SEPARATOR, name.to_key())
}

fn index_partition(source: &Id, name: &EdgeName, target: &Id) -> String {
    format!(
        "{}{}{}",
        list_partition(source, name),
        KEY_SEPARATOR,
        target.to_key()
    )
}

// =============================================================================
// GRAPH STORE
// =============================================================================

/// Edges on a [`Backend`], scoped by tenant.
#[derive(Debug, Clone)]
pub struct GraphStore {
    backend: Arc<dyn Backend>,
    allocator: Arc<VersionAllocator>,
}

impl GraphStore {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, allocator: Arc<VersionAllocator>) -> Self {
        Self { backend, allocator }
    }

    fn index_key(context: &CollectionContext, source: &Id, name: &EdgeName, target: &Id) -> RowKey {
        RowKey::new(context.scope_key(), index_partition(source, name, target), 0)
    }

    /// Prepare a new edge.
    ///
    /// Returns an empty batch when the edge already exists. The batch
    /// requires the edge to still be absent when executed, so two racing
    /// connects of the same edge store it once.
    pub fn connect(
        &self,
        context: &CollectionContext,
        source: &Id,
        name: &EdgeName,
        target: &Id,
    ) -> Result<MutationBatch, CorvidError> {
        source.validate()?;
        target.validate()?;
        name.validate()?;

        if self.edge_exists(context, source, name, target)?.is_some() {
            return Ok(MutationBatch::new());
        }

        let edge = Edge {
            source: source.clone(),
            name: name.clone(),
            target: target.clone(),
            sequence: self.allocator.allocate().value(),
        };
        let bytes = encode(&edge)?;
        let index_key = Self::index_key(context, source, name, target);

        Ok(MutationBatch::new()
            .expect(Table::EdgeIndex, index_key.clone(), None)
            .put(
                Table::Edge,
                RowKey::new(context.scope_key(), list_partition(source, name), edge.sequence),
                bytes.clone(),
            )
            .put(Table::EdgeIndex, index_key, bytes))
    }

    /// Prepare the removal of an edge. Empty when there is nothing to remove.
    pub fn disconnect(
        &self,
        context: &CollectionContext,
        source: &Id,
        name: &EdgeName,
        target: &Id,
    ) -> Result<MutationBatch, CorvidError> {
        let Some(edge) = self.edge_exists(context, source, name, target)? else {
            return Ok(MutationBatch::new());
        };
        Ok(MutationBatch::new()
            .delete(
                Table::Edge,
                RowKey::new(context.scope_key(), list_partition(source, name), edge.sequence),
            )
            .delete(Table::EdgeIndex, Self::index_key(context, source, name, target)))
    }

    /// Edges of `(source, name)` in insertion order.
    ///
    /// `after` resumes from a previously seen sequence; `inclusive` decides
    /// whether that sequence itself is returned again.
    pub fn load_edges(
        &self,
        context: &CollectionContext,
        source: &Id,
        name: &EdgeName,
        after: Option<u64>,
        inclusive: bool,
        limit: usize,
    ) -> Result<Vec<Edge>, CorvidError> {
        let range = match after {
            Some(sequence) if inclusive => SortRange::all().starting_at(sequence),
            Some(sequence) => SortRange::all().after(sequence),
            None => SortRange::all(),
        };
        self.backend
            .range(
                Table::Edge,
                &context.scope_key(),
                &list_partition(source, name),
                range.limit(limit),
            )?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    /// The edge `source -name-> target`, if present.
    pub fn edge_exists(
        &self,
        context: &CollectionContext,
        source: &Id,
        name: &EdgeName,
        target: &Id,
    ) -> Result<Option<Edge>, CorvidError> {
        self.backend
            .get(Table::EdgeIndex, &Self::index_key(context, source, name, target))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExecuteOutcome, MemoryBackend};
    use uuid::Uuid;

    fn setup() -> (GraphStore, Arc<dyn Backend>, CollectionContext) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let store = GraphStore::new(Arc::clone(&backend), Arc::new(VersionAllocator::new()));
        (store, backend, CollectionContext::new(Uuid::new_v4(), "things"))
    }

    fn link(store: &GraphStore, backend: &Arc<dyn Backend>, ctx: &CollectionContext, s: &Id, n: &EdgeName, t: &Id) {
        let batch = store.connect(ctx, s, n, t).expect("prepare");
        assert_eq!(backend.execute(batch).expect("execute"), ExecuteOutcome::Applied);
    }

    #[test]
    fn edges_come_back_in_insertion_order() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let name = EdgeName::Connection("likes".to_string());
        let targets: Vec<Id> = (0..5).map(|_| Id::generate("thing")).collect();
        for target in &targets {
            link(&store, &backend, &ctx, &source, &name, target);
        }

        let edges = store
            .load_edges(&ctx, &source, &name, None, false, 100)
            .expect("load");
        let loaded: Vec<Id> = edges.into_iter().map(|e| e.target).collect();
        assert_eq!(loaded, targets);
    }

    #[test]
    fn paging_inclusive_and_exclusive() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let name = EdgeName::Connection("likes".to_string());
        for _ in 0..4 {
            link(&store, &backend, &ctx, &source, &name, &Id::generate("thing"));
        }
        let all = store
            .load_edges(&ctx, &source, &name, None, false, 100)
            .expect("load");
        let mark = all[1].sequence;

        let exclusive = store
            .load_edges(&ctx, &source, &name, Some(mark), false, 100)
            .expect("load");
        assert_eq!(exclusive, all[2..].to_vec());

        let inclusive = store
            .load_edges(&ctx, &source, &name, Some(mark), true, 2)
            .expect("load");
        assert_eq!(inclusive, all[1..3].to_vec());
    }

    #[test]
    fn connect_is_idempotent() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let target = Id::generate("thing");
        let name = EdgeName::Connection("likes".to_string());
        link(&store, &backend, &ctx, &source, &name, &target);

        let again = store.connect(&ctx, &source, &name, &target).expect("prepare");
        assert!(again.is_empty());
        assert_eq!(backend.row_count(Table::Edge).expect("count"), 1);
    }

    #[test]
    fn racing_connects_store_one_edge() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let target = Id::generate("thing");
        let name = EdgeName::Connection("likes".to_string());

        let first = store.connect(&ctx, &source, &name, &target).expect("prepare");
        let second = store.connect(&ctx, &source, &name, &target).expect("prepare");
        assert_eq!(backend.execute(first).expect("execute"), ExecuteOutcome::Applied);
        assert!(matches!(
            backend.execute(second).expect("execute"),
            ExecuteOutcome::PreconditionFailed { .. }
        ));
        assert_eq!(backend.row_count(Table::Edge).expect("count"), 1);
    }

    #[test]
    fn disconnect_removes_both_rows() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let target = Id::generate("thing");
        let name = EdgeName::Collection("people".to_string());
        link(&store, &backend, &ctx, &source, &name, &target);

        let batch = store.disconnect(&ctx, &source, &name, &target).expect("prepare");
        let _ = backend.execute(batch).expect("execute");
        assert!(store.edge_exists(&ctx, &source, &name, &target).expect("exists").is_none());
        assert_eq!(backend.row_count(Table::Edge).expect("count"), 0);
    }

    #[test]
    fn names_do_not_collide_across_kinds() {
        let (store, backend, ctx) = setup();
        let source = Id::generate("person");
        let target = Id::generate("thing");
        link(&store, &backend, &ctx, &source, &EdgeName::Collection("x".into()), &target);

        assert!(
            store
                .edge_exists(&ctx, &source, &EdgeName::Connection("x".into()), &target)
                .expect("exists")
                .is_none()
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (store, _, ctx) = setup();
        let name = EdgeName::Connection("a/b".to_string());
        assert!(matches!(
            store.connect(&ctx, &Id::generate("p"), &name, &Id::generate("t")),
            Err(CorvidError::Validation(_))
        ));
    }
}
