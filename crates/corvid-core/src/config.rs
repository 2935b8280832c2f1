//! # Configuration
//!
//! Operator-tunable settings. Every field has a default so a partial
//! configuration file is always valid; the binary parses these from TOML.
//!
//! ```toml
//! [storage]
//! backend = "redb"
//! path = "corvid.db"
//!
//! [pipeline]
//! page_size = 10
//! verify_batch_size = 100
//! drop_policy = "backfill"
//! ```

use crate::CorvidError;
use crate::primitives::{DEFAULT_PAGE_SIZE, DEFAULT_VERIFY_BATCH_SIZE, MAX_RESULT_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// PIPELINE
// =============================================================================

/// What a read pipeline does when verification or loading drops an item.
///
/// Whether a dropped candidate should shorten the page or be replaced by
/// another upstream candidate is a caller choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Keep pulling upstream until the page is full or upstream is exhausted.
    #[default]
    Backfill,
    /// Dropped items count against the requested limit.
    ShortPage,
}

/// Read pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Edges fetched per graph store round trip.
    pub page_size: usize,
    /// Candidates or ids verified/loaded per entity store round trip.
    pub verify_batch_size: usize,
    /// Handling of dropped candidates.
    pub drop_policy: DropPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            verify_batch_size: DEFAULT_VERIFY_BATCH_SIZE,
            drop_policy: DropPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Builder-style drop policy setter.
    #[must_use]
    pub fn with_drop_policy(mut self, drop_policy: DropPolicy) -> Self {
        self.drop_policy = drop_policy;
        self
    }

    /// Builder-style page size setter.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<(), CorvidError> {
        if self.page_size == 0 || self.page_size > MAX_RESULT_LIMIT {
            return Err(CorvidError::Validation(format!(
                "page_size must be in 1..={}, got {}",
                MAX_RESULT_LIMIT, self.page_size
            )));
        }
        if self.verify_batch_size == 0 || self.verify_batch_size > MAX_RESULT_LIMIT {
            return Err(CorvidError::Validation(format!(
                "verify_batch_size must be in 1..={}, got {}",
                MAX_RESULT_LIMIT, self.verify_batch_size
            )));
        }
        Ok(())
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Which backend implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Disk-backed redb database.
    #[default]
    Redb,
    /// Volatile in-memory tables.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Database file, used by the redb backend.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: PathBuf::from("corvid.db"),
        }
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CorvidConfig {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
}

impl CorvidConfig {
    pub fn validate(&self) -> Result<(), CorvidError> {
        self.pipeline.validate()
    }
}
