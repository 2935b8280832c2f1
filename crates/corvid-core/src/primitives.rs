//! # Engine Primitives
//!
//! Hardcoded runtime constants for the Corvid engine.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Tunables that operators may change live in [`crate::config`].

/// Separator used inside row keys (`type/uuid`, `source/edge`).
///
/// Entity types, collection names and connection names may not contain it.
pub const KEY_SEPARATOR: char = '/';

/// Entity type of the tenant root that owns collection membership edges.
pub const APPLICATION_TYPE: &str = "application";

/// Maximum length for entity type tags.
pub const MAX_TYPE_LENGTH: usize = 256;

/// Maximum length for collection and connection names.
pub const MAX_NAME_LENGTH: usize = 256;

// =============================================================================
// CURSOR FORMAT
// =============================================================================

/// Magic bytes at the start of every decoded cursor payload.
pub const CURSOR_MAGIC: &[u8; 4] = b"CRVC";

/// Current cursor format version.
///
/// Increment this when making breaking changes to cursor tokens.
pub const CURSOR_FORMAT_VERSION: u8 = 1;

/// Maximum accepted length of an encoded cursor string.
///
/// Cursors come from callers; anything longer is rejected before decoding.
pub const MAX_CURSOR_LENGTH: usize = 8192;

// =============================================================================
// READ LIMITS
// =============================================================================

/// Default number of results per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Maximum number of results a single pipeline run may return.
pub const MAX_RESULT_LIMIT: usize = 1000;

/// Default number of candidates verified per bulk round trip.
pub const DEFAULT_VERIFY_BATCH_SIZE: usize = 100;

/// Maximum number of filters in one pipeline.
pub const MAX_PIPELINE_LENGTH: usize = 16;
