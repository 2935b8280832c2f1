//! # Core Type Definitions
//!
//! This module contains the data model shared by the write and read paths:
//! - Identifiers (`Id`, `Version`)
//! - Write state machine tags (`Stage`)
//! - Entity bodies (`Entity`, `Value`)
//! - Versioned snapshots (`MvccEntity`, `MvccLogEntry`)
//! - Operation scope (`CollectionContext`)
//! - Search hits (`CandidateResult`)
//! - Error types (`CorvidError`)
//!
//! ## Ordering Guarantees
//!
//! Every type used as a sort key implements `Ord`, and property maps use
//! `BTreeMap`, so serialized bodies and query results are reproducible.

use crate::primitives::{APPLICATION_TYPE, KEY_SEPARATOR, MAX_NAME_LENGTH, MAX_TYPE_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable identifier of an entity: a type tag plus a unique value.
///
/// An `Id` never changes once assigned. The type tag takes part in the
/// identity, so `("cat", u)` and `("dog", u)` are different entities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    entity_type: String,
    uuid: Uuid,
}

impl Id {
    /// Create an id from an existing type and uuid.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
        }
    }

    /// Create an id with a fresh random uuid.
    #[must_use]
    pub fn generate(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, Uuid::new_v4())
    }

    /// The entity type tag.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The unique value.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Check that this id can be stored.
    pub fn validate(&self) -> Result<(), CorvidError> {
        validate_name("entity type", &self.entity_type, MAX_TYPE_LENGTH)?;
        if self.uuid.is_nil() {
            return Err(CorvidError::Validation(format!(
                "id of type '{}' has a nil uuid",
                self.entity_type
            )));
        }
        Ok(())
    }

    /// Row key form: `type/uuid`.
    #[must_use]
    pub fn to_key(&self) -> String {
        format!("{}{}{}", self.entity_type, KEY_SEPARATOR, self.uuid)
    }

    /// Parse the row key form produced by [`Id::to_key`].
    pub fn from_key(key: &str) -> Result<Self, CorvidError> {
        let (entity_type, uuid) = key.rsplit_once(KEY_SEPARATOR).ok_or_else(|| {
            CorvidError::DeserializationError(format!("malformed id key '{}'", key))
        })?;
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| CorvidError::DeserializationError(format!("id key '{}': {}", key, e)))?;
        Ok(Self::new(entity_type, uuid))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.uuid)
    }
}

/// Reject names that are empty, too long, or contain the key separator.
pub(crate) fn validate_name(what: &str, name: &str, max_len: usize) -> Result<(), CorvidError> {
    if name.is_empty() {
        return Err(CorvidError::Validation(format!("{} must not be empty", what)));
    }
    if name.len() > max_len {
        return Err(CorvidError::Validation(format!(
            "{} exceeds {} bytes",
            what, max_len
        )));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(CorvidError::Validation(format!(
            "{} '{}' contains reserved character '{}'",
            what, name, KEY_SEPARATOR
        )));
    }
    Ok(())
}

/// Identifier of one mutation of an entity.
///
/// Layout: `(unix micros << SEQUENCE_BITS) | sequence`. Comparing two
/// versions compares their creation order, including writes that landed in
/// the same microsecond.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(pub u64);

impl Version {
    /// Number of low bits reserved for the same-instant tie-break.
    pub const SEQUENCE_BITS: u32 = 12;

    const SEQUENCE_MASK: u64 = (1 << Self::SEQUENCE_BITS) - 1;

    /// Build a version from a timestamp and a sequence number.
    #[must_use]
    pub const fn from_parts(timestamp_micros: u64, sequence: u64) -> Self {
        Self((timestamp_micros << Self::SEQUENCE_BITS) | (sequence & Self::SEQUENCE_MASK))
    }

    /// Microseconds since the unix epoch at allocation time.
    #[must_use]
    pub const fn timestamp_micros(self) -> u64 {
        self.0 >> Self::SEQUENCE_BITS
    }

    /// Tie-break component.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0 & Self::SEQUENCE_MASK
    }

    /// Raw packed value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// STAGE
// =============================================================================

/// Position of a log entry or entity row in the write state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Started, not yet committed. Never visible to readers.
    Active,
    /// Committed atomically with its entity row.
    Committed,
    /// Post-commit work (indexing) has run.
    Complete,
    /// Committed tombstone.
    Deleted,
}

impl Stage {
    /// Whether readers may trust a row in this stage.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Committed => "COMMITTED",
            Self::Complete => "COMPLETE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// ENTITY BODY
// =============================================================================

/// A property value.
///
/// Integers only; no floating point values are stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Create a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Borrow the text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// An entity body: its id plus an ordered property map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity id.
    pub id: Id,
    /// Properties in deterministic key order.
    pub properties: BTreeMap<String, Value>,
}

impl Entity {
    /// Create an entity with no properties.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    /// Get a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

// =============================================================================
// VERSIONED SNAPSHOTS
// =============================================================================

/// Immutable snapshot of one version of an entity.
///
/// A snapshot with stage `Deleted` carries no body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccEntity {
    id: Id,
    version: Version,
    stage: Stage,
    entity: Option<Entity>,
}

impl MvccEntity {
    /// Create a snapshot.
    #[must_use]
    pub fn new(id: Id, version: Version, stage: Stage, entity: Option<Entity>) -> Self {
        Self {
            id,
            version,
            stage,
            entity,
        }
    }

    /// Create a tombstone snapshot.
    #[must_use]
    pub fn tombstone(id: Id, version: Version) -> Self {
        Self::new(id, version, Stage::Deleted, None)
    }

    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The body, absent for tombstones.
    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    /// Consume the snapshot and return its body.
    #[must_use]
    pub fn into_entity(self) -> Option<Entity> {
        self.entity
    }

    /// Whether this snapshot is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.stage == Stage::Deleted || self.entity.is_none()
    }

    /// Same snapshot tagged with another stage.
    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

/// Durable marker: "(id, version) entered stage".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccLogEntry {
    id: Id,
    version: Version,
    stage: Stage,
}

impl MvccLogEntry {
    #[must_use]
    pub fn new(id: Id, version: Version, stage: Stage) -> Self {
        Self { id, version, stage }
    }

    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

// =============================================================================
// COLLECTION CONTEXT
// =============================================================================

/// Tenant + collection scope threaded through every store call.
///
/// Created once per logical operation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionContext {
    tenant: Uuid,
    collection: String,
}

impl CollectionContext {
    #[must_use]
    pub fn new(tenant: Uuid, collection: impl Into<String>) -> Self {
        Self {
            tenant,
            collection: collection.into(),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> Uuid {
        self.tenant
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The application entity that owns every collection of this tenant.
    #[must_use]
    pub fn tenant_root(&self) -> Id {
        Id::new(APPLICATION_TYPE, self.tenant)
    }

    /// Row scope shared by every table.
    #[must_use]
    pub fn scope_key(&self) -> String {
        self.tenant.to_string()
    }

    /// Same tenant, another collection.
    #[must_use]
    pub fn for_collection(&self, collection: impl Into<String>) -> Self {
        Self::new(self.tenant, collection)
    }

    pub fn validate(&self) -> Result<(), CorvidError> {
        if self.tenant.is_nil() {
            return Err(CorvidError::Validation("tenant must not be nil".to_string()));
        }
        validate_name("collection name", &self.collection, MAX_NAME_LENGTH)
    }
}

// =============================================================================
// SEARCH HITS
// =============================================================================

/// An unverified hit from the search index.
///
/// `version` is the version that was indexed; it may lag the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub id: Id,
    pub version: Version,
    /// Relevance, higher is better.
    pub score: u64,
}

impl CandidateResult {
    #[must_use]
    pub fn new(id: Id, version: Version, score: u64) -> Self {
        Self { id, version, score }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in Corvid operations.
#[derive(Debug, Error)]
pub enum CorvidError {
    /// A required id, version or name was missing or malformed at a stage boundary.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend could not be reached or failed to execute.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The version being committed has already been settled.
    #[error("Write conflict: {id} at version {version} is already {stage}")]
    WriteConflict {
        id: Id,
        version: Version,
        stage: Stage,
    },

    /// A search candidate no longer matches the committed version.
    #[error("Stale candidate: {id} indexed at {indexed}, stored {stored:?}")]
    StaleCandidate {
        id: Id,
        indexed: Version,
        stored: Option<Version>,
    },

    /// One item of a bulk read failed.
    #[error("Bulk read failed for {id}: {reason}")]
    PartialBulkFailure { id: Id, reason: String },

    /// A pipeline could not be assembled from the given filters.
    #[error("Pipeline construction error: {0}")]
    PipelineConstruction(String),

    /// A cursor token could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred outside the backend.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl CorvidError {
    /// Whether this error aborts the whole operation.
    ///
    /// Stale candidates and single-item bulk failures are dropped by the
    /// read pipeline; everything else surfaces to the caller.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::StaleCandidate { .. } | Self::PartialBulkFailure { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
