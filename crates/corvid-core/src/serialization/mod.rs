//! # Serialization Strategies
//!
//! How MVCC log entries and entity snapshots are laid out in the backend.
//!
//! Both stores key their rows by `(tenant, entity key, version)` and share
//! the same read rule: without an explicit bound a reader sees the newest
//! *settled* row (any stage but ACTIVE); with a bound it sees the newest
//! settled row at or below that version. Rows are append-only, so a
//! superseded version stays readable at its exact version forever.
//!
//! Writes are returned as prepared [`MutationBatch`]es so the write
//! pipeline can merge a log transition and an entity row into one atomic
//! execution.
//!
//! [`MutationBatch`]: crate::storage::MutationBatch

mod entity;
mod log_entry;

pub use entity::EntityStore;
pub use log_entry::LogStore;

use crate::storage::{Backend, PartitionRows, SortRange, Table};
use crate::{CorvidError, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Rows fetched per round trip while looking for a settled version.
const SETTLED_SCAN_PAGE: usize = 8;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CorvidError> {
    postcard::to_allocvec(value).map_err(|e| CorvidError::SerializationError(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CorvidError> {
    postcard::from_bytes(bytes).map_err(|e| CorvidError::DeserializationError(e.to_string()))
}

/// Newest-first range, optionally capped at `bound`.
fn bounded(bound: Option<Version>) -> SortRange {
    let range = SortRange::all().reversed().limit(SETTLED_SCAN_PAGE);
    match bound {
        Some(version) => range.up_to(version.value()),
        None => range,
    }
}

fn first_settled<T>(
    rows: &PartitionRows,
    decode_row: &impl Fn(u64, &[u8]) -> Result<T, CorvidError>,
    settled: &impl Fn(&T) -> bool,
) -> Result<Option<T>, CorvidError> {
    for (sort, bytes) in rows {
        let row = decode_row(*sort, bytes)?;
        if settled(&row) {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Page backwards through one partition until a settled row is found.
pub(crate) fn latest_settled<T>(
    backend: &dyn Backend,
    table: Table,
    scope: &str,
    partition: &str,
    bound: Option<Version>,
    decode_row: impl Fn(u64, &[u8]) -> Result<T, CorvidError>,
    settled: impl Fn(&T) -> bool,
) -> Result<Option<T>, CorvidError> {
    let mut range = bounded(bound);
    loop {
        let rows = backend.range(table, scope, partition, range)?;
        if let Some(found) = first_settled(&rows, &decode_row, &settled)? {
            return Ok(Some(found));
        }
        match rows.last() {
            Some((sort, _)) if rows.len() == SETTLED_SCAN_PAGE && *sort > 0 => {
                range = range.up_to(sort - 1);
            }
            _ => return Ok(None),
        }
    }
}

/// [`latest_settled`] for many partitions, served by one bulk read.
///
/// Only partitions whose newest page holds nothing but unsettled rows need
/// a follow-up read.
pub(crate) fn latest_settled_many<T>(
    backend: &dyn Backend,
    table: Table,
    scope: &str,
    partitions: &[String],
    bound: Option<Version>,
    decode_row: impl Fn(&str, u64, &[u8]) -> Result<T, CorvidError>,
    settled: impl Fn(&T) -> bool,
) -> Result<Vec<Result<Option<T>, CorvidError>>, CorvidError> {
    let pages = backend.range_many(table, scope, partitions, bounded(bound))?;

    Ok(pages
        .into_iter()
        .zip(partitions)
        .map(|(page, partition)| {
            let rows = page?;
            let decode_one = |sort: u64, bytes: &[u8]| decode_row(partition, sort, bytes);
            if let Some(found) = first_settled(&rows, &decode_one, &settled)? {
                return Ok(Some(found));
            }
            match rows.last() {
                Some((sort, _)) if rows.len() == SETTLED_SCAN_PAGE && *sort > 0 => latest_settled(
                    backend,
                    table,
                    scope,
                    partition,
                    Some(Version(sort - 1)),
                    decode_one,
                    &settled,
                ),
                _ => Ok(None),
            }
        })
        .collect())
}
