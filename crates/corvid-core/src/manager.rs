//! # Entity Manager
//!
//! The facade the rest of the system talks to. It ties the write pipeline,
//! the graph store and the read pipelines together behind entity-level
//! operations.
//!
//! ## Membership
//!
//! Collections are edges, not tables. Creating an entity in a collection
//! writes the entity and then connects it from the tenant root under the
//! collection's name. Entity rows themselves are tenant-wide, so the same
//! id can be read from any collection context of its tenant.
//!
//! ## Storage Backends
//!
//! - `Memory`: [`MemoryBackend`] (fast, volatile)
//! - `Redb`: [`RedbBackend`] (ACID, persistent)

use crate::config::{BackendKind, CorvidConfig, PipelineConfig};
use crate::graph::{EdgeName, GraphStore};
use crate::index::{DocumentIndex, IndexScope, SearchIndex};
use crate::pipeline::{FilterFactory, PipelineResults, ReadStores};
use crate::primitives::MAX_RESULT_LIMIT;
use crate::storage::{Backend, ExecuteOutcome, MemoryBackend, MutationBatch, RedbBackend, Table};
use crate::version::VersionAllocator;
use crate::write::WritePipeline;
use crate::{CollectionContext, CorvidError, Entity, Id, MvccEntity, MvccLogEntry, Version};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Row counts per table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStatus {
    pub rows: BTreeMap<&'static str, u64>,
}

/// Entity-level operations over one backend.
#[derive(Debug, Clone)]
pub struct EntityManager {
    backend: Arc<dyn Backend>,
    writes: WritePipeline,
    graph: GraphStore,
    stores: ReadStores,
    factory: FilterFactory,
}

impl EntityManager {
    /// Create a manager over `backend`, with a fresh version allocator.
    pub fn new(
        backend: Arc<dyn Backend>,
        index: Arc<dyn SearchIndex>,
        config: PipelineConfig,
    ) -> Result<Self, CorvidError> {
        Self::with_allocator(backend, index, Arc::new(VersionAllocator::new()), config)
    }

    /// Create a manager sharing an existing allocator.
    pub fn with_allocator(
        backend: Arc<dyn Backend>,
        index: Arc<dyn SearchIndex>,
        allocator: Arc<VersionAllocator>,
        config: PipelineConfig,
    ) -> Result<Self, CorvidError> {
        config.validate()?;
        let stores = ReadStores::new(
            Arc::clone(&backend),
            Arc::clone(&allocator),
            Arc::clone(&index),
        );
        Ok(Self {
            writes: WritePipeline::new(Arc::clone(&backend), Arc::clone(&allocator), index),
            graph: GraphStore::new(Arc::clone(&backend), allocator),
            factory: FilterFactory::new(stores.clone(), config),
            stores,
            backend,
        })
    }

    /// Open the backend named by `config`, indexed by a [`DocumentIndex`]
    /// stored in the same backend.
    pub fn open(config: &CorvidConfig) -> Result<Self, CorvidError> {
        config.validate()?;
        let backend: Arc<dyn Backend> = match config.storage.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Redb => Arc::new(RedbBackend::open(&config.storage.path)?),
        };
        let allocator = Arc::new(VersionAllocator::new());
        let index: Arc<dyn SearchIndex> = Arc::new(DocumentIndex::new(
            Arc::clone(&backend),
            Arc::clone(&allocator),
        ));
        tracing::debug!(backend = ?config.storage.backend, "store opened");
        Self::with_allocator(backend, index, allocator, config.pipeline.clone())
    }

    #[must_use]
    pub fn factory(&self) -> &FilterFactory {
        &self.factory
    }

    #[must_use]
    pub fn writes(&self) -> &WritePipeline {
        &self.writes
    }

    #[must_use]
    pub fn stores(&self) -> &ReadStores {
        &self.stores
    }

    /// Execute a prepared batch. False when it was empty or a precondition
    /// did not hold.
    fn apply(&self, batch: MutationBatch) -> Result<bool, CorvidError> {
        if batch.is_empty() {
            return Ok(false);
        }
        Ok(matches!(self.backend.execute(batch)?, ExecuteOutcome::Applied))
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write a new version of `entity` and make it a member of the
    /// context's collection.
    pub fn create(
        &self,
        context: &CollectionContext,
        entity: Entity,
    ) -> Result<MvccEntity, CorvidError> {
        let committed = self.writes.write(context, entity)?;
        let membership = EdgeName::Collection(context.collection().to_string());
        let added = self.apply(self.graph.connect(
            context,
            &context.tenant_root(),
            &membership,
            committed.id(),
        )?)?;
        tracing::info!(
            id = %committed.id(),
            version = %committed.version(),
            collection = %context.collection(),
            added,
            "entity saved"
        );
        Ok(committed)
    }

    /// Write a new version of an entity that must already be live.
    pub fn update(
        &self,
        context: &CollectionContext,
        entity: Entity,
    ) -> Result<MvccEntity, CorvidError> {
        if self.get(context, &entity.id)?.is_none() {
            return Err(CorvidError::Validation(format!(
                "{} has no live version to update",
                entity.id
            )));
        }
        self.create(context, entity)
    }

    /// Tombstone `id` and drop it from the context's collection.
    pub fn delete(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<MvccEntity, CorvidError> {
        let tombstone = self.writes.delete(context, id)?;
        let membership = EdgeName::Collection(context.collection().to_string());
        self.apply(
            self.graph
                .disconnect(context, &context.tenant_root(), &membership, id)?,
        )?;
        tracing::info!(id = %id, version = %tombstone.version(), "entity deleted");
        Ok(tombstone)
    }

    /// Connect `source -connection-> target` and index the target's live
    /// snapshot under the connection. Returns true if the edge is new.
    ///
    /// Connecting an existing edge again refreshes the index entry.
    pub fn connect(
        &self,
        context: &CollectionContext,
        source: &Id,
        connection: &str,
        target: &Id,
    ) -> Result<bool, CorvidError> {
        let name = EdgeName::Connection(connection.to_string());
        let added = self.apply(self.graph.connect(context, source, &name, target)?)?;

        match self.get(context, target)? {
            Some(snapshot) => self.stores.index.index(
                &IndexScope::connection(context, source, connection),
                &snapshot,
            )?,
            None => tracing::debug!(target = %target, "connected to an entity with no live version"),
        }
        tracing::debug!(source = %source, connection, target = %target, added, "connected");
        Ok(added)
    }

    /// Remove `source -connection-> target`. Returns true if it existed.
    pub fn disconnect(
        &self,
        context: &CollectionContext,
        source: &Id,
        connection: &str,
        target: &Id,
    ) -> Result<bool, CorvidError> {
        let name = EdgeName::Connection(connection.to_string());
        self.apply(self.graph.disconnect(context, source, &name, target)?)
    }

    // =========================================================================
    // POINT READS
    // =========================================================================

    /// The newest live snapshot of `id`.
    pub fn get(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        Ok(self
            .stores
            .entities
            .load_latest(context, id)?
            .filter(|snapshot| !snapshot.is_deleted()))
    }

    /// The snapshot at exactly `version`, tombstones included.
    pub fn get_version(
        &self,
        context: &CollectionContext,
        id: &Id,
        version: Version,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        self.stores.entities.load(context, id, version)
    }

    /// Every logged version of `id`, oldest first.
    pub fn history(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Vec<MvccLogEntry>, CorvidError> {
        self.stores.logs.load_history(context, id)
    }

    /// Every target of `source -connection->`, in connection order.
    pub fn connection_targets(
        &self,
        context: &CollectionContext,
        source: &Id,
        connection: &str,
    ) -> Result<Vec<Id>, CorvidError> {
        let name = EdgeName::Connection(connection.to_string());
        let mut targets = Vec::new();
        let mut after = None;
        loop {
            let edges = self
                .graph
                .load_edges(context, source, &name, after, false, MAX_RESULT_LIMIT)?;
            let full = edges.len() == MAX_RESULT_LIMIT;
            after = edges.last().map(|edge| edge.sequence);
            targets.extend(edges.into_iter().map(|edge| edge.target));
            if !full {
                return Ok(targets);
            }
        }
    }

    // =========================================================================
    // PAGED READS
    // =========================================================================

    /// A page of the context's collection.
    pub fn get_collection(
        &self,
        context: &CollectionContext,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PipelineResults, CorvidError> {
        self.factory
            .collection_scan(context, None)?
            .run(cursor, limit)
    }

    /// A page of the entities `source` connects to.
    pub fn get_connections(
        &self,
        context: &CollectionContext,
        source: &Id,
        connection: &str,
        connected_type: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PipelineResults, CorvidError> {
        self.factory
            .connection_scan(context, source.clone(), connection, connected_type)?
            .run(cursor, limit)
    }

    /// A page of verified search hits in the context's collection.
    pub fn search_collection(
        &self,
        context: &CollectionContext,
        query: &str,
        entity_type: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PipelineResults, CorvidError> {
        self.factory
            .search_collection_scan(context, query, entity_type)?
            .run(cursor, limit)
    }

    /// A page of verified search hits among `source`'s connections.
    pub fn search_connections(
        &self,
        context: &CollectionContext,
        source: &Id,
        connection: &str,
        query: &str,
        connected_type: Option<&str>,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PipelineResults, CorvidError> {
        self.factory
            .search_connection_scan(context, source.clone(), connection, query, connected_type)?
            .run(cursor, limit)
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    pub fn status(&self) -> Result<StoreStatus, CorvidError> {
        let mut rows = BTreeMap::new();
        for table in Table::ALL {
            rows.insert(table.name(), self.backend.row_count(table)?);
        }
        Ok(StoreStatus { rows })
    }
}

// =============================================================================
// TESTS
// =============================================================================
