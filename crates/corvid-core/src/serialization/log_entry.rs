//! # Log Store
//!
//! One row per `(id, version)` holding the stage that version last entered.
//! The write pipeline moves a row ACTIVE -> COMMITTED/DELETED -> COMPLETE;
//! readers only trust settled rows.
//!
//! Unlike the entity store, exact-version and history reads here return
//! rows in any stage: the log is the record of the state machine itself.

use super::{decode, encode, latest_settled, latest_settled_many};
use crate::storage::{Backend, MutationBatch, RowKey, SortRange, Table};
use crate::{CollectionContext, CorvidError, Id, MvccLogEntry, Stage, Version};
use std::sync::Arc;

/// Stage markers on a [`Backend`].
#[derive(Debug, Clone)]
pub struct LogStore {
    backend: Arc<dyn Backend>,
}

impl LogStore {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub(crate) fn row_key(context: &CollectionContext, id: &Id, version: Version) -> RowKey {
        RowKey::new(context.scope_key(), id.to_key(), version.value())
    }

    pub(crate) fn encode_stage(stage: Stage) -> Result<Vec<u8>, CorvidError> {
        encode(&stage)
    }

    pub(crate) fn decode_stage(bytes: &[u8]) -> Result<Stage, CorvidError> {
        decode(bytes)
    }

    /// Prepare the row for `entry`. Nothing is written until executed.
    pub fn write(
        &self,
        context: &CollectionContext,
        entry: &MvccLogEntry,
    ) -> Result<MutationBatch, CorvidError> {
        Ok(MutationBatch::new().put(
            Table::Log,
            Self::row_key(context, entry.id(), entry.version()),
            Self::encode_stage(entry.stage())?,
        ))
    }

    /// Prepare a precondition: `(id, version)` must currently be in `stage`.
    pub fn require_stage(
        &self,
        context: &CollectionContext,
        id: &Id,
        version: Version,
        stage: Stage,
    ) -> Result<MutationBatch, CorvidError> {
        Ok(MutationBatch::new().expect(
            Table::Log,
            Self::row_key(context, id, version),
            Some(Self::encode_stage(stage)?),
        ))
    }

    /// The entry at exactly `version`, whatever its stage.
    pub fn load(
        &self,
        context: &CollectionContext,
        id: &Id,
        version: Version,
    ) -> Result<Option<MvccLogEntry>, CorvidError> {
        self.backend
            .get(Table::Log, &Self::row_key(context, id, version))?
            .map(|bytes| {
                Self::decode_stage(&bytes).map(|stage| MvccLogEntry::new(id.clone(), version, stage))
            })
            .transpose()
    }

    /// The newest settled entry.
    pub fn load_latest(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Option<MvccLogEntry>, CorvidError> {
        self.load_settled(context, id, None)
    }

    /// The newest settled entry at or below `max_version`.
    pub fn load_bounded(
        &self,
        context: &CollectionContext,
        id: &Id,
        max_version: Version,
    ) -> Result<Option<MvccLogEntry>, CorvidError> {
        self.load_settled(context, id, Some(max_version))
    }

    fn load_settled(
        &self,
        context: &CollectionContext,
        id: &Id,
        bound: Option<Version>,
    ) -> Result<Option<MvccLogEntry>, CorvidError> {
        latest_settled(
            self.backend.as_ref(),
            Table::Log,
            &context.scope_key(),
            &id.to_key(),
            bound,
            |sort, bytes| {
                Self::decode_stage(bytes)
                    .map(|stage| MvccLogEntry::new(id.clone(), Version(sort), stage))
            },
            |entry| entry.stage().is_settled(),
        )
    }

    /// Newest settled entry for each id, in input order, from one bulk read.
    pub fn load_latest_many(
        &self,
        context: &CollectionContext,
        ids: &[Id],
        bound: Option<Version>,
    ) -> Result<Vec<Result<Option<MvccLogEntry>, CorvidError>>, CorvidError> {
        let partitions: Vec<String> = ids.iter().map(Id::to_key).collect();
        latest_settled_many(
            self.backend.as_ref(),
            Table::Log,
            &context.scope_key(),
            &partitions,
            bound,
            |partition, sort, bytes| {
                let id = Id::from_key(partition)?;
                Self::decode_stage(bytes).map(|stage| MvccLogEntry::new(id, Version(sort), stage))
            },
            |entry| entry.stage().is_settled(),
        )
    }

    /// Every entry for `id`, oldest first, whatever its stage.
    pub fn load_history(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Vec<MvccLogEntry>, CorvidError> {
        self.backend
            .range(Table::Log, &context.scope_key(), &id.to_key(), SortRange::all())?
            .into_iter()
            .map(|(sort, bytes)| {
                Self::decode_stage(&bytes)
                    .map(|stage| MvccLogEntry::new(id.clone(), Version(sort), stage))
            })
            .collect()
    }

    /// Highest version ever logged for `id`, settled or not.
    pub fn max_version(
        &self,
        context: &CollectionContext,
        id: &Id,
    ) -> Result<Option<Version>, CorvidError> {
        let newest = self.backend.range(
            Table::Log,
            &context.scope_key(),
            &id.to_key(),
            SortRange::all().reversed().limit(1),
        )?;
        Ok(newest.first().map(|(sort, _)| Version(*sort)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ExecuteOutcome, MemoryBackend};
    use uuid::Uuid;

    fn setup() -> (LogStore, CollectionContext, Id) {
        let store = LogStore::new(Arc::new(MemoryBackend::new()));
        let context = CollectionContext::new(Uuid::new_v4(), "things");
        (store, context, Id::generate("thing"))
    }

    fn record(store: &LogStore, context: &CollectionContext, id: &Id, version: u64, stage: Stage) {
        let batch = store
            .write(context, &MvccLogEntry::new(id.clone(), Version(version), stage))
            .expect("prepare");
        let outcome = store.backend.execute(batch).expect("execute");
        assert_eq!(outcome, ExecuteOutcome::Applied);
    }

    #[test]
    fn write_is_only_prepared() {
        let (store, context, id) = setup();
        let _batch = store
            .write(&context, &MvccLogEntry::new(id.clone(), Version(1), Stage::Active))
            .expect("prepare");
        assert!(store.load(&context, &id, Version(1)).expect("load").is_none());
    }

    #[test]
    fn latest_skips_active_entries() {
        let (store, context, id) = setup();
        record(&store, &context, &id, 1, Stage::Committed);
        record(&store, &context, &id, 2, Stage::Active);

        let latest = store.load_latest(&context, &id).expect("load").expect("present");
        assert_eq!(latest.version(), Version(1));
        assert_eq!(store.max_version(&context, &id).expect("max"), Some(Version(2)));
    }

    #[test]
    fn latest_pages_past_many_orphans() {
        let (store, context, id) = setup();
        record(&store, &context, &id, 1, Stage::Complete);
        for version in 2..30 {
            record(&store, &context, &id, version, Stage::Active);
        }

        let latest = store.load_latest(&context, &id).expect("load").expect("present");
        assert_eq!(latest.version(), Version(1));

        let many = store
            .load_latest_many(&context, std::slice::from_ref(&id), None)
            .expect("bulk");
        let found = many[0].as_ref().expect("item").as_ref().expect("present");
        assert_eq!(found.version(), Version(1));
    }

    #[test]
    fn bounded_load() {
        let (store, context, id) = setup();
        record(&store, &context, &id, 10, Stage::Committed);
        record(&store, &context, &id, 20, Stage::Committed);

        let bounded = store
            .load_bounded(&context, &id, Version(15))
            .expect("load")
            .expect("present");
        assert_eq!(bounded.version(), Version(10));
        assert!(store.load_bounded(&context, &id, Version(5)).expect("load").is_none());
    }

    #[test]
    fn history_is_ascending() {
        let (store, context, id) = setup();
        record(&store, &context, &id, 3, Stage::Committed);
        record(&store, &context, &id, 1, Stage::Complete);
        record(&store, &context, &id, 2, Stage::Active);

        let versions: Vec<u64> = store
            .load_history(&context, &id)
            .expect("history")
            .iter()
            .map(|e| e.version().value())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn tenants_are_isolated() {
        let (store, context, id) = setup();
        record(&store, &context, &id, 1, Stage::Committed);
        let other = CollectionContext::new(Uuid::new_v4(), "things");
        assert!(store.load_latest(&other, &id).expect("load").is_none());
    }
}
