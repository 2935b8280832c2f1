//! # Write Pipeline
//!
//! The staged MVCC write protocol:
//!
//! ```text
//! START ──> WRITE ──> COMMIT ──> COMPLETE
//!   │         │          │
//!   └─────────┴──────────┴──> ROLLBACK (nothing visible)
//! ```
//!
//! - **Start** allocates a version above anything logged for the id and
//!   records it ACTIVE.
//! - **Write** stores the body at that version, still ACTIVE.
//! - **Commit** moves the log entry and the entity row to their settled
//!   stage in one atomic batch, guarded by "log entry is still ACTIVE".
//! - **Complete** marks the log entry COMPLETE and indexes the body. It runs
//!   after the commit is durable and its failures are only logged.
//!
//! A failure before commit leaves an ACTIVE orphan that no reader trusts,
//! so rollback needs no cleanup. Retries are the caller's job and always
//! restart from Start with a fresh version.

use crate::index::{IndexScope, SearchIndex};
use crate::serialization::{EntityStore, LogStore};
use crate::storage::{Backend, ExecuteOutcome, Table};
use crate::version::VersionAllocator;
use crate::{CollectionContext, CorvidError, Entity, Id, MvccEntity, MvccLogEntry, Stage, Version};
use std::sync::Arc;

/// Runs writes and deletes through the staged protocol.
#[derive(Debug, Clone)]
pub struct WritePipeline {
    backend: Arc<dyn Backend>,
    allocator: Arc<VersionAllocator>,
    logs: LogStore,
    entities: EntityStore,
    index: Arc<dyn SearchIndex>,
}

impl WritePipeline {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        allocator: Arc<VersionAllocator>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            logs: LogStore::new(Arc::clone(&backend)),
            entities: EntityStore::new(Arc::clone(&backend)),
            backend,
            allocator,
            index,
        }
    }

    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Store a new version of `entity` and return the committed snapshot.
    pub fn write(
        &self,
        context: &CollectionContext,
        entity: Entity,
    ) -> Result<MvccEntity, CorvidError> {
        let started = self.start(context, &entity.id)?;
        let written = self.write_entity(context, &started, Some(entity))?;
        let committed = self.commit(context, &written)?;
        self.complete(context, &committed);
        Ok(committed)
    }

    /// Store a tombstone version of `id` and return it.
    pub fn delete(&self, context: &CollectionContext, id: &Id) -> Result<MvccEntity, CorvidError> {
        let started = self.start(context, id)?;
        let written = self.write_entity(context, &started, None)?;
        let committed = self.commit(context, &written)?;
        self.complete(context, &committed);
        Ok(committed)
    }

    // =========================================================================
    // STAGES
    // =========================================================================

    /// START: allocate a version and log it ACTIVE.
    pub fn start(&self, context: &CollectionContext, id: &Id) -> Result<MvccLogEntry, CorvidError> {
        context.validate()?;
        id.validate()?;

        let version = match self.logs.max_version(context, id)? {
            Some(highest) => self.allocator.allocate_after(highest),
            None => self.allocator.allocate(),
        };
        let entry = MvccLogEntry::new(id.clone(), version, Stage::Active);

        let batch = self
            .logs
            .write(context, &entry)?
            .expect(Table::Log, LogStore::row_key(context, id, version), None);
        if let ExecuteOutcome::PreconditionFailed { actual, .. } = self.backend.execute(batch)? {
            return Err(self.rejected(id, version, actual.as_deref()));
        }

        tracing::debug!(id = %id, version = %version, "write started");
        Ok(entry)
    }

    /// WRITE: store the body (or a tombstone when `None`) at the started
    /// version. The row is ACTIVE and invisible.
    ///
    /// Guarded by "log entry is still ACTIVE", so a settled version can
    /// never be overwritten.
    pub fn write_entity(
        &self,
        context: &CollectionContext,
        started: &MvccLogEntry,
        entity: Option<Entity>,
    ) -> Result<MvccEntity, CorvidError> {
        if started.stage() != Stage::Active {
            return Err(CorvidError::Validation(format!(
                "{} at {} is {}, expected {}",
                started.id(),
                started.version(),
                started.stage(),
                Stage::Active
            )));
        }
        if started.version() == Version(0) {
            return Err(CorvidError::Validation(format!(
                "{} has no allocated version",
                started.id()
            )));
        }
        if let Some(entity) = &entity {
            if entity.id != *started.id() {
                return Err(CorvidError::Validation(format!(
                    "body of {} written under {}",
                    entity.id,
                    started.id()
                )));
            }
        }

        let snapshot = MvccEntity::new(
            started.id().clone(),
            started.version(),
            Stage::Active,
            entity,
        );
        let id = snapshot.id();
        let version = snapshot.version();
        let batch = self
            .logs
            .require_stage(context, id, version, Stage::Active)?
            .merge(self.entities.write(context, &snapshot)?);
        if let ExecuteOutcome::PreconditionFailed { actual, .. } = self.backend.execute(batch)? {
            return Err(self.rejected(id, version, actual.as_deref()));
        }

        tracing::debug!(id = %snapshot.id(), version = %snapshot.version(), "entity written");
        Ok(snapshot)
    }

    /// COMMIT: settle the log entry and the entity row together.
    ///
    /// Fails with `WriteConflict` if the version was already settled and
    /// with `Validation` if it was never started.
    pub fn commit(
        &self,
        context: &CollectionContext,
        written: &MvccEntity,
    ) -> Result<MvccEntity, CorvidError> {
        let stage = if written.is_deleted() {
            Stage::Deleted
        } else {
            Stage::Committed
        };
        let id = written.id();
        let version = written.version();
        let settled = written.with_stage(stage);

        let batch = self
            .logs
            .require_stage(context, id, version, Stage::Active)?
            .merge(
                self.logs
                    .write(context, &MvccLogEntry::new(id.clone(), version, stage))?,
            )
            .merge(self.entities.write(context, &settled)?);

        match self.backend.execute(batch) {
            Ok(ExecuteOutcome::Applied) => {
                tracing::debug!(id = %id, version = %version, stage = %stage, "committed");
                Ok(settled)
            }
            Ok(ExecuteOutcome::PreconditionFailed { actual, .. }) => {
                let err = self.rejected(id, version, actual.as_deref());
                tracing::error!(id = %id, version = %version, error = %err, "commit rejected");
                Err(err)
            }
            Err(err) => {
                tracing::error!(id = %id, version = %version, error = %err, "commit failed");
                Err(err)
            }
        }
    }

    /// COMPLETE: best-effort post-commit work.
    ///
    /// Tombstones stay DELETED and are not indexed.
    pub fn complete(&self, context: &CollectionContext, committed: &MvccEntity) {
        if committed.stage() != Stage::Committed {
            return;
        }
        if let Err(err) = self.mark_complete(context, committed) {
            tracing::warn!(
                id = %committed.id(),
                version = %committed.version(),
                error = %err,
                "post-commit work failed, version stays COMMITTED"
            );
        }
    }

    fn mark_complete(
        &self,
        context: &CollectionContext,
        committed: &MvccEntity,
    ) -> Result<(), CorvidError> {
        let id = committed.id();
        let version = committed.version();

        self.index
            .index(&IndexScope::collection(context, context.collection()), committed)?;

        let batch = self
            .logs
            .require_stage(context, id, version, Stage::Committed)?
            .merge(
                self.logs
                    .write(context, &MvccLogEntry::new(id.clone(), version, Stage::Complete))?,
            );
        if let ExecuteOutcome::PreconditionFailed { actual, .. } = self.backend.execute(batch)? {
            return Err(self.rejected(id, version, actual.as_deref()));
        }

        tracing::debug!(id = %id, version = %version, "complete");
        Ok(())
    }

    /// Map a failed log precondition to the error the caller sees.
    fn rejected(&self, id: &Id, version: Version, actual: Option<&[u8]>) -> CorvidError {
        let Some(bytes) = actual else {
            return CorvidError::Validation(format!("{} at {} was never started", id, version));
        };
        match LogStore::decode_stage(bytes) {
            Ok(stage) => CorvidError::WriteConflict {
                id: id.clone(),
                version,
                stage,
            },
            Err(err) => err,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DocumentIndex;
    use crate::storage::MemoryBackend;
    use uuid::Uuid;

    fn setup() -> (WritePipeline, CollectionContext) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let allocator = Arc::new(VersionAllocator::new());
        let index = Arc::new(DocumentIndex::new(Arc::clone(&backend), Arc::clone(&allocator)));
        let pipeline = WritePipeline::new(backend, allocator, index);
        (pipeline, CollectionContext::new(Uuid::new_v4(), "things"))
    }

    fn thing(id: &Id, name: &str) -> Entity {
        Entity::new(id.clone()).with_property("name", name)
    }

    #[test]
    fn write_commits_and_completes() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let committed = pipeline.write(&ctx, thing(&id, "a")).expect("write");
        assert_eq!(committed.stage(), Stage::Committed);

        let latest = pipeline
            .entities
            .load_latest(&ctx, &id)
            .expect("load")
            .expect("present");
        assert_eq!(latest.version(), committed.version());
        assert_eq!(latest.entity(), committed.entity());

        let log = pipeline.logs.load_latest(&ctx, &id).expect("log").expect("present");
        assert_eq!(log.stage(), Stage::Complete);
    }

    #[test]
    fn versions_increase_per_id() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let v1 = pipeline.write(&ctx, thing(&id, "a")).expect("write").version();
        let v2 = pipeline.write(&ctx, thing(&id, "b")).expect("write").version();
        assert!(v2 > v1);
    }

    #[test]
    fn unfinished_write_is_invisible() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let started = pipeline.start(&ctx, &id).expect("start");
        let _ = pipeline
            .write_entity(&ctx, &started, Some(thing(&id, "a")))
            .expect("write");

        assert!(pipeline.entities.load_latest(&ctx, &id).expect("load").is_none());
        assert!(
            pipeline
                .entities
                .load(&ctx, &id, started.version())
                .expect("load")
                .is_none()
        );
    }

    #[test]
    fn second_commit_conflicts() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let started = pipeline.start(&ctx, &id).expect("start");
        let written = pipeline
            .write_entity(&ctx, &started, Some(thing(&id, "a")))
            .expect("write");
        let _ = pipeline.commit(&ctx, &written).expect("commit");

        assert!(matches!(
            pipeline.commit(&ctx, &written),
            Err(CorvidError::WriteConflict {
                stage: Stage::Committed,
                ..
            })
        ));
    }

    #[test]
    fn write_after_commit_conflicts() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let started = pipeline.start(&ctx, &id).expect("start");
        let written = pipeline
            .write_entity(&ctx, &started, Some(thing(&id, "a")))
            .expect("write");
        let committed = pipeline.commit(&ctx, &written).expect("commit");

        assert!(matches!(
            pipeline.write_entity(&ctx, &started, Some(thing(&id, "x"))),
            Err(CorvidError::WriteConflict {
                stage: Stage::Committed,
                ..
            })
        ));
        let stored = pipeline
            .entities
            .load(&ctx, &id, committed.version())
            .expect("load")
            .expect("present");
        assert_eq!(stored, committed);
    }

    #[test]
    fn write_without_start_is_validation_error() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let orphan = MvccLogEntry::new(id.clone(), Version(42), Stage::Active);
        assert!(matches!(
            pipeline.write_entity(&ctx, &orphan, Some(thing(&id, "a"))),
            Err(CorvidError::Validation(_))
        ));
    }

    #[test]
    fn commit_without_start_is_validation_error() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let orphan = MvccEntity::new(id.clone(), Version(42), Stage::Active, Some(thing(&id, "a")));
        assert!(matches!(
            pipeline.commit(&ctx, &orphan),
            Err(CorvidError::Validation(_))
        ));
    }

    #[test]
    fn write_rejects_mismatched_body() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let started = pipeline.start(&ctx, &id).expect("start");
        let other = Id::generate("thing");
        assert!(matches!(
            pipeline.write_entity(&ctx, &started, Some(thing(&other, "a"))),
            Err(CorvidError::Validation(_))
        ));
    }

    #[test]
    fn delete_writes_tombstone() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let _ = pipeline.write(&ctx, thing(&id, "a")).expect("write");
        let tombstone = pipeline.delete(&ctx, &id).expect("delete");
        assert_eq!(tombstone.stage(), Stage::Deleted);

        let latest = pipeline
            .entities
            .load_latest(&ctx, &id)
            .expect("load")
            .expect("present");
        assert!(latest.is_deleted());
        let log = pipeline.logs.load_latest(&ctx, &id).expect("log").expect("present");
        assert_eq!(log.stage(), Stage::Deleted);
    }

    #[test]
    fn start_respects_logged_versions() {
        let (pipeline, ctx) = setup();
        let id = Id::generate("thing");
        let first = pipeline.write(&ctx, thing(&id, "a")).expect("write");

        // a fresh allocator (as after a restart) still moves past the log
        let fresh = WritePipeline::new(
            Arc::clone(&pipeline.backend),
            Arc::new(VersionAllocator::with_clock(|| 0)),
            Arc::clone(&pipeline.index),
        );
        let second = fresh.write(&ctx, thing(&id, "b")).expect("write");
        assert!(second.version() > first.version());
    }

    #[test]
    fn invalid_id_is_rejected_at_start() {
        let (pipeline, ctx) = setup();
        assert!(matches!(
            pipeline.start(&ctx, &Id::new("thing", Uuid::nil())),
            Err(CorvidError::Validation(_))
        ));
    }
}
