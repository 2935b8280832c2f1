//! Search-candidate stages.
//!
//! For each input id the stage queries the index scope that id owns and
//! emits the hits in relevance order, marking each with its offset in the
//! ranked list. Nothing here checks the hits against the store.

use super::{FilterResult, Item, Resume, SearchFilter, Stream};
use crate::cursor::CursorEntry;
use crate::graph::EdgeName;
use crate::index::{IndexScope, SearchIndex};
use crate::{CandidateResult, CollectionContext, CorvidError, Id};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cursor token of a search stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SearchPosition {
    pub source: Id,
    pub offset: u64,
}

pub(super) fn stage<'a>(
    upstream: Stream<'a>,
    index: &'a dyn SearchIndex,
    context: &'a CollectionContext,
    filter: &'a SearchFilter,
    name: String,
    resume: Option<Resume<SearchPosition>>,
) -> Stream<'a> {
    let (query, edge, type_filter) = match filter {
        SearchFilter::Collection {
            query,
            collection,
            entity_type,
        } => (
            query.as_str(),
            EdgeName::Collection(collection.clone()),
            entity_type.as_deref(),
        ),
        SearchFilter::Connection {
            query,
            connection,
            connected_type,
        } => (
            query.as_str(),
            EdgeName::Connection(connection.clone()),
            connected_type.as_deref(),
        ),
    };
    Box::new(Search {
        upstream,
        index,
        context,
        query,
        edge,
        type_filter,
        name,
        resume,
        current: None,
    })
}

/// Remaining hits for one source.
struct SourceHits {
    source: Id,
    marks: Vec<CursorEntry>,
    hits: VecDeque<(u64, CandidateResult)>,
}

struct Search<'a> {
    upstream: Stream<'a>,
    index: &'a dyn SearchIndex,
    context: &'a CollectionContext,
    query: &'a str,
    edge: EdgeName,
    type_filter: Option<&'a str>,
    name: String,
    resume: Option<Resume<SearchPosition>>,
    current: Option<SourceHits>,
}

impl Search<'_> {
    fn open(&mut self, source: Id, marks: Vec<CursorEntry>) -> Result<SourceHits, CorvidError> {
        let scope = IndexScope {
            tenant: self.context.tenant(),
            owner: source.clone(),
            name: self.edge.clone(),
        };
        let hits = self.index.query(&scope, self.query, self.type_filter)?;

        let matches = self
            .resume
            .as_ref()
            .is_some_and(|r| r.position.source == source);
        let resume = if matches { self.resume.take() } else { None };
        let skip = match resume {
            Some(r) if r.inclusive => r.position.offset,
            Some(r) => r.position.offset.saturating_add(1),
            None => 0,
        };

        tracing::debug!(scope = %scope, hits = hits.len(), skip, "search");
        Ok(SourceHits {
            source,
            marks,
            hits: (0u64..)
                .zip(hits)
                .skip(usize::try_from(skip).unwrap_or(usize::MAX))
                .collect(),
        })
    }
}

impl Iterator for Search<'_> {
    type Item = Result<FilterResult, CorvidError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some((offset, candidate)) = current.hits.pop_front() {
                    let mut marks = current.marks.clone();
                    let mark = CursorEntry::new(
                        self.name.clone(),
                        &SearchPosition {
                            source: current.source.clone(),
                            offset,
                        },
                    );
                    return Some(mark.map(|mark| {
                        marks.push(mark);
                        FilterResult::new(Item::Candidate(candidate), marks)
                    }));
                }
                self.current = None;
            }

            let result = match self.upstream.next()? {
                Ok(result) => result,
                Err(err) => return Some(Err(err)),
            };
            match result.item {
                Item::Id(source) => match self.open(source, result.marks) {
                    Ok(hits) => self.current = Some(hits),
                    Err(err) => return Some(Err(err)),
                },
                Item::Dropped => return Some(Ok(result)),
                other => {
                    return Some(Err(CorvidError::PipelineConstruction(format!(
                        "search received {:?}",
                        other
                    ))));
                }
            }
        }
    }
}
