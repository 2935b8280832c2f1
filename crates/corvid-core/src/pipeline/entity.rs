//! Verification and load stages.
//!
//! Both pull a batch of inputs from upstream and resolve it with one bulk
//! store read, then emit the batch in input order. An input that does not
//! survive becomes [`Item::Dropped`] in place, so order and cursor marks
//! are kept.
//!
//! A candidate survives verification only if the newest settled version of
//! its id is exactly the indexed version and is not a tombstone.

use super::{EntityFilter, FilterResult, Item, ReadStores, Stream};
use crate::{CandidateResult, CollectionContext, CorvidError, Id, MvccEntity, Stage, Version};
use std::collections::VecDeque;

pub(super) fn stage<'a>(
    upstream: Stream<'a>,
    stores: &'a ReadStores,
    context: &'a CollectionContext,
    filter: &'a EntityFilter,
    batch_size: usize,
) -> Stream<'a> {
    Box::new(Batched {
        upstream,
        stores,
        context,
        filter,
        batch_size: batch_size.max(1),
        ready: VecDeque::new(),
        done: false,
    })
}

struct Batched<'a> {
    upstream: Stream<'a>,
    stores: &'a ReadStores,
    context: &'a CollectionContext,
    filter: &'a EntityFilter,
    batch_size: usize,
    ready: VecDeque<Result<FilterResult, CorvidError>>,
    done: bool,
}

/// The newest settled version of an id, as the verifier sees it.
struct Current {
    version: Version,
    deleted: bool,
    snapshot: Option<MvccEntity>,
}

impl Batched<'_> {
    /// Pull up to one batch from upstream. An upstream error ends the input
    /// and is returned after the items pulled before it.
    fn pull(&mut self) -> (Vec<FilterResult>, Option<CorvidError>) {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.upstream.next() {
                Some(Ok(result)) => batch.push(result),
                Some(Err(err)) => {
                    self.done = true;
                    return (batch, Some(err));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        (batch, None)
    }

    fn resolve(&self, batch: Vec<FilterResult>) -> Result<Vec<FilterResult>, CorvidError> {
        match self.filter {
            EntityFilter::VerifyCandidateIds => self.verify(batch, false),
            EntityFilter::VerifyCandidateEntities => self.verify(batch, true),
            EntityFilter::Load { bound } => self.load(batch, *bound),
        }
    }

    fn verify(
        &self,
        batch: Vec<FilterResult>,
        with_bodies: bool,
    ) -> Result<Vec<FilterResult>, CorvidError> {
        let ids: Vec<Id> = batch
            .iter()
            .filter_map(|r| match &r.item {
                Item::Candidate(candidate) => Some(candidate.id.clone()),
                _ => None,
            })
            .collect();

        let mut current: VecDeque<Result<Option<Current>, CorvidError>> = if with_bodies {
            self.stores
                .entities
                .load_latest_many(self.context, &ids, None)?
                .into_iter()
                .map(|slot| {
                    slot.map(|found| {
                        found.map(|snapshot| Current {
                            version: snapshot.version(),
                            deleted: snapshot.is_deleted(),
                            snapshot: Some(snapshot),
                        })
                    })
                })
                .collect()
        } else {
            self.stores
                .logs
                .load_latest_many(self.context, &ids, None)?
                .into_iter()
                .map(|slot| {
                    slot.map(|found| {
                        found.map(|entry| Current {
                            version: entry.version(),
                            deleted: entry.stage() == Stage::Deleted,
                            snapshot: None,
                        })
                    })
                })
                .collect()
        };

        Ok(batch
            .into_iter()
            .map(|result| {
                let Item::Candidate(candidate) = &result.item else {
                    return result;
                };
                let slot = current.pop_front().unwrap_or(Ok(None));
                match check(candidate, slot) {
                    Ok(found) => {
                        let item = match found.snapshot {
                            Some(snapshot) if with_bodies => Item::Entity(snapshot),
                            _ => Item::Id(candidate.id.clone()),
                        };
                        result.with_item(item)
                    }
                    Err(err) => {
                        dropped(&err);
                        result.with_item(Item::Dropped)
                    }
                }
            })
            .collect())
    }

    fn load(
        &self,
        batch: Vec<FilterResult>,
        bound: Option<Version>,
    ) -> Result<Vec<FilterResult>, CorvidError> {
        let ids: Vec<Id> = batch
            .iter()
            .filter_map(|r| match &r.item {
                Item::Id(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        let mut loaded: VecDeque<_> = self
            .stores
            .entities
            .load_latest_many(self.context, &ids, bound)?
            .into();

        Ok(batch
            .into_iter()
            .map(|result| {
                let Item::Id(id) = &result.item else {
                    return result;
                };
                match loaded.pop_front().unwrap_or(Ok(None)) {
                    Ok(Some(snapshot)) if !snapshot.is_deleted() => {
                        result.with_item(Item::Entity(snapshot))
                    }
                    Ok(_) => {
                        tracing::debug!(id = %id, bound = ?bound, "no live version, dropped");
                        result.with_item(Item::Dropped)
                    }
                    Err(err) => {
                        dropped(&CorvidError::PartialBulkFailure {
                            id: id.clone(),
                            reason: err.to_string(),
                        });
                        result.with_item(Item::Dropped)
                    }
                }
            })
            .collect())
    }
}

/// Accept a candidate only if it is the current, live version.
fn check(
    candidate: &CandidateResult,
    slot: Result<Option<Current>, CorvidError>,
) -> Result<Current, CorvidError> {
    let stale = |stored: Option<Version>| CorvidError::StaleCandidate {
        id: candidate.id.clone(),
        indexed: candidate.version,
        stored,
    };
    match slot {
        Err(err) => Err(CorvidError::PartialBulkFailure {
            id: candidate.id.clone(),
            reason: err.to_string(),
        }),
        Ok(None) => Err(stale(None)),
        Ok(Some(current)) if current.deleted || current.version != candidate.version => {
            Err(stale(Some(current.version)))
        }
        Ok(Some(current)) => Ok(current),
    }
}

/// Record why an item left the stream.
fn dropped(err: &CorvidError) {
    match err {
        CorvidError::StaleCandidate { .. } => tracing::debug!(error = %err, "candidate dropped"),
        _ => tracing::warn!(error = %err, "item dropped"),
    }
}

impl Iterator for Batched<'_> {
    type Item = Result<FilterResult, CorvidError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(next) = self.ready.pop_front() {
                return Some(next);
            }
            if self.done {
                return None;
            }

            let (batch, failure) = self.pull();
            if !batch.is_empty() {
                match self.resolve(batch) {
                    Ok(resolved) => self.ready.extend(resolved.into_iter().map(Ok)),
                    Err(err) => {
                        self.done = true;
                        self.ready.push_back(Err(err));
                    }
                }
            }
            if let Some(err) = failure {
                self.ready.push_back(Err(err));
            }
        }
    }
}
