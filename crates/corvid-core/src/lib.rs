//! # corvid-core
//!
//! The versioned entity engine for Corvid.
//!
//! This crate implements a multi-tenant MVCC entity store with two halves:
//!
//! - **Write path**: every change goes through START, WRITE, COMMIT and
//!   COMPLETE. Nothing is visible to readers before COMMIT, and a settled
//!   version is never rewritten.
//! - **Read path**: ordered filter pipelines over collection membership,
//!   named connections and a search index. Search hits are verified against
//!   the newest committed version before they are returned, and every page
//!   carries an opaque cursor that resumes exactly where it stopped.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Append-only rows: versions are only ever added
//! - Deterministic ordering: `BTreeMap` tables, integer relevance scores
//! - Tenant provisioning, job scheduling and transport live outside

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod cursor;
pub mod export;
pub mod graph;
pub mod index;
pub mod jobs;
pub mod manager;
pub mod pipeline;
pub mod primitives;
pub mod serialization;
pub mod storage;
pub mod types;
pub mod version;
pub mod write;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CandidateResult, CollectionContext, CorvidError, Entity, Id, MvccEntity, MvccLogEntry, Stage,
    Value, Version,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{BackendKind, CorvidConfig, DropPolicy, PipelineConfig, StorageConfig};
pub use cursor::{CursorEntry, decode_cursor, encode_cursor};
pub use export::{
    ArchiveHeader, ArchivedConnection, CollectionArchive, ImportSummary, decode_archive,
    encode_archive, export_collection, import_archive, retype_archive,
};
#[cfg(feature = "crypto-hash")]
pub use export::{archive_hash, verify_archive_hash};
pub use graph::{Edge, EdgeName, GraphStore};
pub use index::{DocumentIndex, IndexScope, SearchIndex};
pub use jobs::{JobHandle, JobParameters, JobService, JobState, run_job};
pub use manager::{EntityManager, StoreStatus};
pub use pipeline::{
    Collector, EntityFilter, Filter, FilterFactory, GraphFilter, Pipeline, PipelineResults,
    ReadStores, Results, SearchFilter,
};
pub use serialization::{EntityStore, LogStore};
pub use storage::{Backend, ExecuteOutcome, MemoryBackend, MutationBatch, RedbBackend, RowKey, Table};
pub use version::VersionAllocator;
pub use write::WritePipeline;
