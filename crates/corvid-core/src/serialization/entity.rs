//! # Entity Store
//!
//! One row per `(id, version)` holding the stage and the serialized body.
//! Every read here applies the visibility rule: ACTIVE rows are never
//! returned, not even by an exact-version read.

use super::{decode, encode, latest_settled, latest_settled_many};
use crate::storage::{Backend, MutationBatch, RowKey, Table};
use crate::{CollectionContext, CorvidError, Entity, Id, MvccEntity, Stage, Version};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored form of a snapshot; id and version live in the row key.
#[derive(Debug, Serialize, Deserialize)]
struct EntityRow {
    stage: Stage,
    entity: Option<Entity>,
}

fn decode_row(id: &Id, version: Version, bytes: &[u8]) -> Result<MvccEntity, CorvidError> {
    let row: EntityRow = decode(bytes)?;
    if let Some(entity) = &row.entity {
        if entity.id != *id {
            return Err(CorvidError::DeserializationError(format!(
                "row for {} carries body of {}",
                id, entity.id
            )));
        }
    }
    Ok(MvccEntity::new(id.clone(), version, row.stage, row.entity))
}

/// Entity snapshots on a [`Backend`].
#[derive(Debug, Clone)]
pub struct EntityStore {
    backend: Arc<dyn Backend>,
}

impl EntityStore {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub(crate) fn row_key(context: &CollectionContext, id: &Id, version: Version) -> RowKey {
        RowKey::new(context.scope_key(), id.to_key(), version.value())
    }

    /// Prepare the row for `snapshot`. Nothing is written until executed.
    pub fn write(
        &self,
        context: &CollectionContext,
        snapshot: &MvccEntity,
    ) -> Result<MutationBatch, CorvidError> {
        if let Some(entity) = snapshot.entity() {
            if entity.id != *snapshot.id() {
                return Err(CorvidError::Validation(format!(
                    "snapshot {} carries body of {}",
                    snapshot.id(),
                    entity.id
                )));
            }
        }
        let row = EntityRow {
            stage: snapshot.stage(),
            entity: snapshot.entity().cloned(),
        };
        Ok(MutationBatch::new().put(
            Table::Entity,
            Self::row_key(context, snapshot.id(), snapshot.version()),
            encode(&row)?,
        ))
    }

    /// The snapshot at exactly `version`, if it is settled.
    pub fn load(
        &self,
        context: &CollectionContext,
        id: &Id,
        version: Version,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        let Some(bytes) = self
            .backend
            .get(Table::Entity, &Self::row_key(context, id, version))?
        else {
            return Ok(None);
        };
        let snapshot = decode_row(id, version, &bytes)?;
        Ok(snapshot.stage().is_settled().then_some(snapshot))
    }

    /// The newest settled snapshot, tombstones included.
    pub fn load_latest(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        self.load_settled(context, id, None)
    }

    /// The newest settled snapshot at or below `max_version`.
    pub fn load_bounded(
        &self,
        context: &CollectionContext,
        id: &Id,
        max_version: Version,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        self.load_settled(context, id, Some(max_version))
    }

    fn load_settled(
        &self,
        context: &CollectionContext,
        id: &Id,
        bound: Option<Version>,
    ) -> Result<Option<MvccEntity>, CorvidError> {
        latest_settled(
            self.backend.as_ref(),
            Table::Entity,
            &context.scope_key(),
            &id.to_key(),
            bound,
            |sort, bytes| decode_row(id, Version(sort), bytes),
            |snapshot| snapshot.stage().is_settled(),
        )
    }

    /// Newest settled snapshot for each id, in input order, from one bulk
    /// read. A row that fails to decode only fails its own slot.
    pub fn load_latest_many(
        &self,
        context: &CollectionContext,
        ids: &[Id],
        bound: Option<Version>,
    ) -> Result<Vec<Result<Option<MvccEntity>, CorvidError>>, CorvidError> {
        let partitions: Vec<String> = ids.iter().map(Id::to_key).collect();
        latest_settled_many(
            self.backend.as_ref(),
            Table::Entity,
            &context.scope_key(),
            &partitions,
            bound,
            |partition, sort, bytes| decode_row(&Id::from_key(partition)?, Version(sort), bytes),
            |snapshot| snapshot.stage().is_settled(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExecuteOutcome, MemoryBackend};
    use uuid::Uuid;

    fn setup() -> (EntityStore, CollectionContext) {
        let store = EntityStore::new(Arc::new(MemoryBackend::new()));
        (store, CollectionContext::new(Uuid::new_v4(), "things"))
    }

    fn body(id: &Id, name: &str) -> Entity {
        Entity::new(id.clone()).with_property("name", name)
    }

    fn put(store: &EntityStore, context: &CollectionContext, snapshot: &MvccEntity) {
        let batch = store.write(context, snapshot).expect("prepare");
        assert_eq!(store.backend.execute(batch).expect("execute"), ExecuteOutcome::Applied);
    }

    #[test]
    fn exact_and_latest_reads() {
        let (store, context) = setup();
        let id = Id::generate("thing");
        let v1 = MvccEntity::new(id.clone(), Version(1), Stage::Committed, Some(body(&id, "one")));
        let v2 = MvccEntity::new(id.clone(), Version(2), Stage::Complete, Some(body(&id, "two")));
        put(&store, &context, &v1);
        put(&store, &context, &v2);

        assert_eq!(store.load_latest(&context, &id).expect("load"), Some(v2));
        assert_eq!(store.load(&context, &id, Version(1)).expect("load"), Some(v1.clone()));
        assert_eq!(store.load_bounded(&context, &id, Version(1)).expect("load"), Some(v1));
    }

    #[test]
    fn active_rows_are_invisible() {
        let (store, context) = setup();
        let id = Id::generate("thing");
        put(
            &store,
            &context,
            &MvccEntity::new(id.clone(), Version(7), Stage::Active, Some(body(&id, "draft"))),
        );

        assert!(store.load(&context, &id, Version(7)).expect("load").is_none());
        assert!(store.load_latest(&context, &id).expect("load").is_none());
    }

    #[test]
    fn tombstone_is_latest() {
        let (store, context) = setup();
        let id = Id::generate("thing");
        put(
            &store,
            &context,
            &MvccEntity::new(id.clone(), Version(1), Stage::Committed, Some(body(&id, "x"))),
        );
        put(&store, &context, &MvccEntity::tombstone(id.clone(), Version(2)));

        let latest = store.load_latest(&context, &id).expect("load").expect("present");
        assert!(latest.is_deleted());
        assert_eq!(latest.version(), Version(2));
    }

    #[test]
    fn mismatched_body_is_rejected() {
        let (store, context) = setup();
        let id = Id::generate("thing");
        let other = Id::generate("thing");
        let snapshot = MvccEntity::new(id, Version(1), Stage::Committed, Some(body(&other, "x")));
        assert!(matches!(
            store.write(&context, &snapshot),
            Err(CorvidError::Validation(_))
        ));
    }

    #[test]
    fn bulk_load_keeps_input_order() {
        let (store, context) = setup();
        let ids: Vec<Id> = (0..5).map(|_| Id::generate("thing")).collect();
        for (i, id) in ids.iter().enumerate() {
            if i != 2 {
                put(
                    &store,
                    &context,
                    &MvccEntity::new(id.clone(), Version(i as u64 + 1), Stage::Committed, Some(body(id, "x"))),
                );
            }
        }

        let loaded = store.load_latest_many(&context, &ids, None).expect("bulk");
        assert_eq!(loaded.len(), 5);
        for (i, (slot, id)) in loaded.iter().zip(&ids).enumerate() {
            let found = slot.as_ref().expect("item");
            if i == 2 {
                assert!(found.is_none());
            } else {
                assert_eq!(found.as_ref().map(MvccEntity::id), Some(id));
            }
        }
    }

    #[test]
    fn corrupt_row_fails_only_its_slot() {
        let (store, context) = setup();
        let good = Id::generate("thing");
        let bad = Id::generate("thing");
        put(
            &store,
            &context,
            &MvccEntity::new(good.clone(), Version(1), Stage::Committed, Some(body(&good, "x"))),
        );
        let _ = store
            .backend
            .execute(MutationBatch::new().put(
                Table::Entity,
                EntityStore::row_key(&context, &bad, Version(1)),
                vec![0xff, 0xff, 0xff],
            ))
            .expect("execute");

        let loaded = store
            .load_latest_many(&context, &[bad, good], None)
            .expect("bulk");
        assert!(loaded[0].is_err());
        assert!(matches!(loaded[1], Ok(Some(_))));
    }
}
