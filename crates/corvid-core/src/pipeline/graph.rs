//! Graph traversal stages.
//!
//! Traversals page through a source's edges in insertion order and mark
//! each emitted id with `(source, sequence)`. By-id variants do a single
//! existence check per source and carry no mark of their own.

use super::{FilterResult, GraphFilter, Item, Resume, Stream};
use crate::cursor::CursorEntry;
use crate::graph::{Edge, EdgeName, GraphStore};
use crate::{CollectionContext, CorvidError, Id};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cursor token of a traversal stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GraphPosition {
    pub source: Id,
    pub sequence: u64,
}

/// Emits the seed id once.
fn seed<'a>(id: Id) -> Stream<'a> {
    Box::new(std::iter::once(Ok(FilterResult::new(Item::Id(id), Vec::new()))))
}

/// Build the stage for `filter`. Only the seed runs without an upstream.
pub(super) fn stage<'a>(
    upstream: Option<Stream<'a>>,
    graph: &'a GraphStore,
    context: &'a CollectionContext,
    filter: &'a GraphFilter,
    name: String,
    resume: Option<Resume<GraphPosition>>,
    page_size: usize,
) -> Result<Stream<'a>, CorvidError> {
    let (edge, target_type, target) = match filter {
        GraphFilter::EntityId(id) => return Ok(seed(id.clone())),
        GraphFilter::ReadCollection { collection } => {
            (EdgeName::Collection(collection.clone()), None, None)
        }
        GraphFilter::ReadCollectionById { collection, target } => {
            (EdgeName::Collection(collection.clone()), None, Some(target))
        }
        GraphFilter::ReadConnection { connection } => {
            (EdgeName::Connection(connection.clone()), None, None)
        }
        GraphFilter::ReadConnectionByType {
            connection,
            entity_type,
        } => (
            EdgeName::Connection(connection.clone()),
            Some(entity_type.as_str()),
            None,
        ),
        GraphFilter::ReadConnectionById { connection, target } => {
            (EdgeName::Connection(connection.clone()), None, Some(target))
        }
    };
    let upstream = super::required(upstream, &name)?;

    Ok(match target {
        Some(target) => Box::new(ById {
            upstream,
            graph,
            context,
            edge,
            target,
        }),
        None => Box::new(Traverse {
            upstream,
            graph,
            context,
            edge,
            target_type,
            name,
            resume,
            page_size: page_size.max(1),
            current: None,
        }),
    })
}

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Paging state for the edges of one source.
struct SourceEdges {
    source: Id,
    marks: Vec<CursorEntry>,
    after: Option<u64>,
    inclusive: bool,
    buffer: VecDeque<Edge>,
    exhausted: bool,
}

struct Traverse<'a> {
    upstream: Stream<'a>,
    graph: &'a GraphStore,
    context: &'a CollectionContext,
    edge: EdgeName,
    target_type: Option<&'a str>,
    name: String,
    resume: Option<Resume<GraphPosition>>,
    page_size: usize,
    current: Option<SourceEdges>,
}

impl Traverse<'_> {
    fn open(&mut self, source: Id, marks: Vec<CursorEntry>) -> SourceEdges {
        let matches = self
            .resume
            .as_ref()
            .is_some_and(|r| r.position.source == source);
        let resume = if matches { self.resume.take() } else { None };
        let (after, inclusive) = match resume {
            Some(r) => (Some(r.position.sequence), r.inclusive),
            None => (None, false),
        };
        SourceEdges {
            source,
            marks,
            after,
            inclusive,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn emit(&self, current: &SourceEdges, edge: Edge) -> Result<FilterResult, CorvidError> {
        let mut marks = current.marks.clone();
        marks.push(CursorEntry::new(
            self.name.clone(),
            &GraphPosition {
                source: current.source.clone(),
                sequence: edge.sequence,
            },
        )?);
        Ok(FilterResult::new(Item::Id(edge.target), marks))
    }
}

impl Iterator for Traverse<'_> {
    type Item = Result<FilterResult, CorvidError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(mut current) = self.current.take() {
                if let Some(edge) = current.buffer.pop_front() {
                    current.after = Some(edge.sequence);
                    current.inclusive = false;
                    let keep = self
                        .target_type
                        .is_none_or(|t| edge.target.entity_type() == t);
                    let out = keep.then(|| self.emit(&current, edge));
                    self.current = Some(current);
                    match out {
                        Some(result) => return Some(result),
                        None => continue,
                    }
                }
                if !current.exhausted {
                    let page = self.graph.load_edges(
                        self.context,
                        &current.source,
                        &self.edge,
                        current.after,
                        current.inclusive,
                        self.page_size,
                    );
                    match page {
                        Ok(edges) => {
                            current.exhausted = edges.len() < self.page_size;
                            current.buffer = edges.into();
                            self.current = Some(current);
                            continue;
                        }
                        Err(err) => return Some(Err(err)),
                    }
                }
                // source finished; fall through to the next input
            }

            let result = match self.upstream.next()? {
                Ok(result) => result,
                Err(err) => return Some(Err(err)),
            };
            match result.item {
                Item::Id(source) => {
                    self.current = Some(self.open(source, result.marks));
                }
                Item::Dropped => return Some(Ok(result)),
                other => {
                    return Some(Err(CorvidError::PipelineConstruction(format!(
                        "traversal received {:?}",
                        other
                    ))));
                }
            }
        }
    }
}

// =============================================================================
// BY-ID
// =============================================================================

struct ById<'a> {
    upstream: Stream<'a>,
    graph: &'a GraphStore,
    context: &'a CollectionContext,
    edge: EdgeName,
    target: &'a Id,
}

impl Iterator for ById<'_> {
    type Item = Result<FilterResult, CorvidError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let result = match self.upstream.next()? {
                Ok(result) => result,
                Err(err) => return Some(Err(err)),
            };
            let source = match &result.item {
                Item::Id(source) => source,
                Item::Dropped => return Some(Ok(result)),
                other => {
                    return Some(Err(CorvidError::PipelineConstruction(format!(
                        "by-id lookup received {:?}",
                        other
                    ))));
                }
            };
            match self
                .graph
                .edge_exists(self.context, source, &self.edge, self.target)
            {
                Ok(Some(edge)) => return Some(Ok(result.with_item(Item::Id(edge.target)))),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
