//! # Collection Archive
//!
//! A portable postcard snapshot of one collection: the live body of every
//! member plus the named connections leaving those members.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [ArchiveHeader (postcard)] [CollectionArchive (postcard)]
//! ```
//!
//! Importing re-creates every entity under the target context with its
//! original id, so importing over existing entities adds new versions
//! rather than replacing history. Connections are restored after every
//! entity exists. [`retype_archive`] moves an archive onto another entity
//! type before import.

use crate::manager::EntityManager;
use crate::primitives::MAX_RESULT_LIMIT;
use crate::serialization::{decode, encode};
use crate::{CollectionContext, CorvidError, Entity, Id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FORMAT
// =============================================================================

/// Magic bytes for collection archives.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"CRVX";

/// Current archive format version.
pub const ARCHIVE_VERSION: u8 = 1;

/// Maximum entity count accepted on import.
pub const MAX_IMPORT_ENTITY_COUNT: u64 = 1_000_000;

/// Maximum connection count accepted on import.
pub const MAX_IMPORT_CONNECTION_COUNT: u64 = 10_000_000;

/// Header written in front of every archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub entity_count: u64,
    pub connection_count: u64,
    /// Checksum of the data section.
    pub checksum: u64,
}

impl ArchiveHeader {
    #[must_use]
    pub fn new(entity_count: u64, connection_count: u64, checksum: u64) -> Self {
        Self {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            entity_count,
            connection_count,
            checksum,
        }
    }

    /// Check magic and version.
    ///
    /// Messages stay generic so a rejected file reveals nothing about the
    /// expected layout.
    pub fn validate(&self) -> Result<(), CorvidError> {
        if self.magic != ARCHIVE_MAGIC {
            return Err(CorvidError::DeserializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != ARCHIVE_VERSION {
            return Err(CorvidError::DeserializationError(
                "Unsupported file version".to_string(),
            ));
        }
        if self.entity_count > MAX_IMPORT_ENTITY_COUNT {
            return Err(CorvidError::DeserializationError(format!(
                "Entity count {} exceeds maximum allowed {}",
                self.entity_count, MAX_IMPORT_ENTITY_COUNT
            )));
        }
        if self.connection_count > MAX_IMPORT_CONNECTION_COUNT {
            return Err(CorvidError::DeserializationError(format!(
                "Connection count {} exceeds maximum allowed {}",
                self.connection_count, MAX_IMPORT_CONNECTION_COUNT
            )));
        }
        Ok(())
    }
}

/// One exported connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchivedConnection {
    pub source: Id,
    pub connection: String,
    pub target: Id,
}

/// The data section of an archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionArchive {
    /// Name of the exported collection.
    pub collection: String,
    /// Member bodies in collection order.
    pub entities: Vec<Entity>,
    /// Connections sorted by (source, connection, target).
    pub connections: Vec<ArchivedConnection>,
}

/// Deterministic rotate-xor checksum.
///
/// Detects accidental corruption only. Use [`archive_hash`] (feature
/// `crypto-hash`) where tampering matters.
#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    data.iter()
        .fold(0u64, |hash, &byte| hash.rotate_left(5) ^ u64::from(byte))
}

/// What an import wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub entities: usize,
    /// Connections that did not already exist.
    pub connections: usize,
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Snapshot the live members of the context's collection and the listed
/// connections leaving them.
pub fn export_collection(
    manager: &EntityManager,
    context: &CollectionContext,
    connections: &[String],
) -> Result<CollectionArchive, CorvidError> {
    let mut entities = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = manager.get_collection(context, cursor.as_deref(), MAX_RESULT_LIMIT)?;
        entities.extend(
            page.results
                .into_entities()
                .into_iter()
                .filter_map(|snapshot| snapshot.into_entity()),
        );
        match page.cursor {
            Some(next) if page.has_more => cursor = Some(next),
            _ => break,
        }
    }

    let mut archived = Vec::new();
    for entity in &entities {
        for connection in connections {
            for target in manager.connection_targets(context, &entity.id, connection)? {
                archived.push(ArchivedConnection {
                    source: entity.id.clone(),
                    connection: connection.clone(),
                    target,
                });
            }
        }
    }
    archived.sort();

    tracing::info!(
        collection = %context.collection(),
        entities = entities.len(),
        connections = archived.len(),
        "collection exported"
    );
    Ok(CollectionArchive {
        collection: context.collection().to_string(),
        entities,
        connections: archived,
    })
}

/// Write every archived entity and connection under `context`.
pub fn import_archive(
    manager: &EntityManager,
    context: &CollectionContext,
    archive: &CollectionArchive,
) -> Result<ImportSummary, CorvidError> {
    let mut summary = ImportSummary::default();
    for entity in &archive.entities {
        manager.create(context, entity.clone())?;
        summary.entities += 1;
    }
    for connection in &archive.connections {
        if manager.connect(
            context,
            &connection.source,
            &connection.connection,
            &connection.target,
        )? {
            summary.connections += 1;
        }
    }
    tracing::info!(
        collection = %context.collection(),
        from = %archive.collection,
        entities = summary.entities,
        connections = summary.connections,
        "archive imported"
    );
    Ok(summary)
}

/// Rewrite every archived entity under `entity_type`, keeping its uuid.
///
/// Connections between archived entities follow their endpoints; endpoints
/// outside the archive keep their ids.
pub fn retype_archive(
    archive: &CollectionArchive,
    entity_type: &str,
) -> Result<CollectionArchive, CorvidError> {
    let mut renamed = BTreeMap::new();
    let mut entities = Vec::with_capacity(archive.entities.len());
    for entity in &archive.entities {
        let id = Id::new(entity_type, entity.id.uuid());
        id.validate()?;
        renamed.insert(entity.id.clone(), id.clone());
        entities.push(Entity {
            id,
            properties: entity.properties.clone(),
        });
    }

    let rename = |id: &Id| renamed.get(id).cloned().unwrap_or_else(|| id.clone());
    let mut connections: Vec<ArchivedConnection> = archive
        .connections
        .iter()
        .map(|c| ArchivedConnection {
            source: rename(&c.source),
            connection: c.connection.clone(),
            target: rename(&c.target),
        })
        .collect();
    connections.sort();
    connections.dedup();

    Ok(CollectionArchive {
        collection: archive.collection.clone(),
        entities,
        connections,
    })
}

/// Serialize an archive with its header.
pub fn encode_archive(archive: &CollectionArchive) -> Result<Vec<u8>, CorvidError> {
    let data = encode(archive)?;
    let header = ArchiveHeader::new(
        archive.entities.len() as u64,
        archive.connections.len() as u64,
        checksum(&data),
    );
    let header_bytes = encode(&header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| CorvidError::SerializationError("Header too large".to_string()))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data.len());
    result.extend_from_slice(&header_len.to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data);
    Ok(result)
}

/// Parse and verify an archive.
pub fn decode_archive(bytes: &[u8]) -> Result<CollectionArchive, CorvidError> {
    let (len_bytes, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| CorvidError::DeserializationError("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    let (header_bytes, data) = rest.split_at_checked(header_len).ok_or_else(|| {
        CorvidError::DeserializationError("Data too short for header".to_string())
    })?;

    let header: ArchiveHeader = decode(header_bytes)?;
    header.validate()?;

    let computed = checksum(data);
    if computed != header.checksum {
        return Err(CorvidError::DeserializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    let archive: CollectionArchive = decode(data)?;
    if archive.entities.len() as u64 != header.entity_count {
        return Err(CorvidError::DeserializationError(
            "Entity count mismatch".to_string(),
        ));
    }
    if archive.connections.len() as u64 != header.connection_count {
        return Err(CorvidError::DeserializationError(
            "Connection count mismatch".to_string(),
        ));
    }
    Ok(archive)
}

// =============================================================================
// CRYPTOGRAPHIC HASH
// =============================================================================

/// BLAKE3 hash of encoded archive bytes, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn archive_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Whether `bytes` hash to `expected`.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn verify_archive_hash(bytes: &[u8], expected: &str) -> bool {
    archive_hash(bytes) == expected
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::index::{DocumentIndex, SearchIndex};
    use crate::storage::{Backend, MemoryBackend};
    use crate::version::VersionAllocator;
    use std::sync::Arc;
    use uuid::Uuid;

    fn manager() -> EntityManager {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let allocator = Arc::new(VersionAllocator::new());
        let index: Arc<dyn SearchIndex> =
            Arc::new(DocumentIndex::new(Arc::clone(&backend), Arc::clone(&allocator)));
        EntityManager::with_allocator(backend, index, allocator, PipelineConfig::default())
            .expect("manager")
    }

    fn sample() -> CollectionArchive {
        let a = Entity::new(Id::generate("cat")).with_property("name", "a");
        let b = Entity::new(Id::generate("cat")).with_property("name", "b");
        CollectionArchive {
            collection: "cats".to_string(),
            connections: vec![ArchivedConnection {
                source: a.id.clone(),
                connection: "likes".to_string(),
                target: b.id.clone(),
            }],
            entities: vec![a, b],
        }
    }

    #[test]
    fn encoded_archive_decodes() {
        let archive = sample();
        let bytes = encode_archive(&archive).expect("encode");
        assert_eq!(decode_archive(&bytes).expect("decode"), archive);
    }

    #[test]
    fn corrupted_data_fails_checksum() {
        let mut bytes = encode_archive(&sample()).expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(decode_archive(&bytes).is_err());
    }

    #[test]
    fn short_and_foreign_input_rejected() {
        assert!(decode_archive(&[]).is_err());
        assert!(decode_archive(&[200, 0, 0, 0, 1]).is_err());

        let mut header = ArchiveHeader::new(0, 0, 0);
        header.magic = *b"KREX";
        assert!(header.validate().is_err());
    }

    #[test]
    fn oversized_counts_rejected() {
        let header = ArchiveHeader::new(MAX_IMPORT_ENTITY_COUNT + 1, 0, 0);
        assert!(header.validate().is_err());
    }

    #[test]
    fn export_then_import_into_another_tenant() {
        let source = manager();
        let ctx = CollectionContext::new(Uuid::new_v4(), "cats");
        let a = source
            .create(&ctx, Entity::new(Id::generate("cat")).with_property("name", "a"))
            .expect("a");
        let b = source
            .create(&ctx, Entity::new(Id::generate("cat")).with_property("name", "b"))
            .expect("b");
        source.connect(&ctx, a.id(), "likes", b.id()).expect("connect");

        let archive = export_collection(&source, &ctx, &["likes".to_string()]).expect("export");
        assert_eq!(archive.entities.len(), 2);
        assert_eq!(archive.connections.len(), 1);

        let bytes = encode_archive(&archive).expect("encode");
        let target = manager();
        let other = CollectionContext::new(Uuid::new_v4(), "imported");
        let summary =
            import_archive(&target, &other, &decode_archive(&bytes).expect("decode")).expect("import");
        assert_eq!(summary, ImportSummary { entities: 2, connections: 1 });

        let page = target.get_collection(&other, None, 10).expect("page");
        assert_eq!(page.results.ids(), vec![a.id().clone(), b.id().clone()]);
        assert_eq!(
            target.connection_targets(&other, a.id(), "likes").expect("targets"),
            vec![b.id().clone()]
        );
    }

    #[test]
    fn import_over_existing_adds_versions() {
        let manager = manager();
        let ctx = CollectionContext::new(Uuid::new_v4(), "cats");
        let saved = manager
            .create(&ctx, Entity::new(Id::generate("cat")).with_property("name", "old"))
            .expect("create");

        let mut archive = export_collection(&manager, &ctx, &[]).expect("export");
        archive.entities[0].set("name", "new");
        import_archive(&manager, &ctx, &archive).expect("import");

        assert_eq!(manager.history(&ctx, saved.id()).expect("history").len(), 2);
        let latest = manager.get(&ctx, saved.id()).expect("get").expect("live");
        assert!(latest.version() > saved.version());
        assert_eq!(
            latest.entity().and_then(|e| e.get("name")).and_then(|v| v.as_text()),
            Some("new")
        );
    }

    #[test]
    fn retyped_archive_keeps_uuids_and_links() {
        let archive = sample();
        let retyped = retype_archive(&archive, "pet").expect("retype");

        let a = Id::new("pet", archive.entities[0].id.uuid());
        let b = Id::new("pet", archive.entities[1].id.uuid());
        assert_eq!(retyped.entities[0].id, a);
        assert_eq!(retyped.entities[1].id, b);
        assert_eq!(retyped.entities[0].properties, archive.entities[0].properties);
        assert_eq!(retyped.connections.len(), 1);
        assert_eq!(retyped.connections[0].source, a);
        assert_eq!(retyped.connections[0].target, b);

        assert!(retype_archive(&archive, "").is_err());
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn blake3_hash_verifies() {
        let bytes = encode_archive(&sample()).expect("encode");
        let hash = archive_hash(&bytes);
        assert_eq!(hash.len(), 64);
        assert!(verify_archive_hash(&bytes, &hash));
        assert!(!verify_archive_hash(&bytes[1..], &hash));
    }
}
