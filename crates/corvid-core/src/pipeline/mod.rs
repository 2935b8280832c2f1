//! # Read Pipeline
//!
//! Ordered chains of filters over the graph store, the search index and
//! the entity store.
//!
//! A pipeline is assembled once per [`CollectionContext`] from a list of
//! [`Filter`]s, checked, and then run any number of times. Each run pulls a
//! lazy chain of stages:
//!
//! ```text
//! seed ──> graph / search ──> verify / load ──> collector ──> PipelineResults
//! ```
//!
//! Every element carries the cursor marks of the resumable stages it passed
//! through (graph traversals and searches). The cursor of a page is the
//! marks of its last element. On resume, every resumable stage except the
//! last restarts *at* its mark and the last restarts *after* it, so a
//! resumed run continues exactly where the previous page stopped.
//!
//! ## Failure Semantics
//!
//! - Stale candidates and per-item bulk failures are dropped and logged.
//! - An error before the first result aborts the run.
//! - An error after some results ends the page early with `has_more` set.

mod collect;
mod entity;
mod factory;
mod filter;
mod graph;
mod search;

pub use collect::Results;
pub use factory::FilterFactory;
pub use filter::{Collector, EntityFilter, Filter, GraphFilter, ItemKind, SearchFilter};

use crate::config::{DropPolicy, PipelineConfig};
use crate::cursor::{CursorEntry, decode_cursor, encode_cursor};
use crate::graph::GraphStore;
use crate::index::SearchIndex;
use crate::primitives::{MAX_PIPELINE_LENGTH, MAX_RESULT_LIMIT};
use crate::serialization::{EntityStore, LogStore};
use crate::storage::Backend;
use crate::version::VersionAllocator;
use crate::{CandidateResult, CollectionContext, CorvidError, Id, MvccEntity};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// STAGE ELEMENTS
// =============================================================================

/// What one stage hands to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Id(Id),
    Candidate(CandidateResult),
    Entity(MvccEntity),
    /// A candidate or id removed by verification or load. Kept in the
    /// stream so the short-page policy can count it.
    Dropped,
}

/// One element of a stage's output, with the cursor marks it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    pub item: Item,
    pub marks: Vec<CursorEntry>,
}

impl FilterResult {
    #[must_use]
    pub fn new(item: Item, marks: Vec<CursorEntry>) -> Self {
        Self { item, marks }
    }

    /// Same marks, another item.
    #[must_use]
    pub fn with_item(self, item: Item) -> Self {
        Self {
            item,
            marks: self.marks,
        }
    }
}

pub(crate) type Stream<'a> = Box<dyn Iterator<Item = Result<FilterResult, CorvidError>> + 'a>;

/// A cursor entry addressed to one stage, and how to apply it.
#[derive(Debug, Clone)]
pub(crate) struct Resume<P> {
    pub position: P,
    /// Re-emit the marked element (true) or start after it (false).
    pub inclusive: bool,
}

/// One page of pipeline output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResults {
    pub results: Results,
    /// Resume token, present when `has_more` is set.
    pub cursor: Option<String>,
    pub has_more: bool,
}

// =============================================================================
// READ STORES
// =============================================================================

/// The read-side collaborators a pipeline pulls from.
#[derive(Debug, Clone)]
pub struct ReadStores {
    pub graph: GraphStore,
    pub logs: LogStore,
    pub entities: EntityStore,
    pub index: Arc<dyn SearchIndex>,
}

impl ReadStores {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        allocator: Arc<VersionAllocator>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            graph: GraphStore::new(Arc::clone(&backend), allocator),
            logs: LogStore::new(Arc::clone(&backend)),
            entities: EntityStore::new(backend),
            index,
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// A checked filter chain bound to one collection context.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stores: ReadStores,
    context: CollectionContext,
    filters: Vec<Filter>,
    config: PipelineConfig,
}

fn construction(message: impl Into<String>) -> CorvidError {
    CorvidError::PipelineConstruction(message.into())
}

/// The upstream of a stage that is not a seed.
fn required<'a>(upstream: Option<Stream<'a>>, name: &str) -> Result<Stream<'a>, CorvidError> {
    upstream.ok_or_else(|| construction(format!("stage {} has no upstream", name)))
}

fn stage_name(index: usize, filter: &Filter) -> String {
    format!("{}:{}", index, filter.kind_name())
}

impl Pipeline {
    /// Check the chain and bind it to `context`.
    pub fn new(
        stores: ReadStores,
        context: CollectionContext,
        filters: Vec<Filter>,
        config: PipelineConfig,
    ) -> Result<Self, CorvidError> {
        context
            .validate()
            .map_err(|e| construction(format!("invalid context: {}", e)))?;
        config
            .validate()
            .map_err(|e| construction(format!("invalid config: {}", e)))?;

        if filters.is_empty() {
            return Err(construction("pipeline has no filters"));
        }
        if filters.len() > MAX_PIPELINE_LENGTH {
            return Err(construction(format!(
                "pipeline has {} filters, maximum is {}",
                filters.len(),
                MAX_PIPELINE_LENGTH
            )));
        }

        let mut upstream = None;
        for (index, filter) in filters.iter().enumerate() {
            filter
                .validate()
                .map_err(|e| construction(format!("filter {} ({}): {}", index, filter, e)))?;
            if !filter.accepts(upstream) {
                return Err(construction(match upstream {
                    None => format!("filter {} ({}) needs an input; start with a seed", index, filter),
                    Some(kind) => format!("filter {} ({}) cannot consume {}", index, filter, kind),
                }));
            }
            let last = index + 1 == filters.len();
            if filter.is_collector() != last {
                return Err(construction(if last {
                    format!("last filter ({}) must be a collector", filter)
                } else {
                    format!("collector at position {} must be last", index)
                }));
            }
            upstream = Some(filter.output());
        }

        Ok(Self {
            stores,
            context,
            filters,
            config,
        })
    }

    #[must_use]
    pub fn context(&self) -> &CollectionContext {
        &self.context
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Run one page of at most `limit` results, resuming from `cursor`.
    pub fn run(&self, cursor: Option<&str>, limit: usize) -> Result<PipelineResults, CorvidError> {
        if limit == 0 || limit > MAX_RESULT_LIMIT {
            return Err(CorvidError::Validation(format!(
                "limit {} outside 1..={}",
                limit, MAX_RESULT_LIMIT
            )));
        }
        let entries = match cursor {
            Some(token) => decode_cursor(token)?,
            None => Vec::new(),
        };

        let mut stream = self.stream(entries, limit)?;
        let mut results = match self.filters.last() {
            Some(Filter::Collector(collector)) => Results::empty(*collector),
            _ => return Err(construction("pipeline has no collector")),
        };
        let short_page = self.config.drop_policy == DropPolicy::ShortPage;

        let mut delivered = 0;
        let mut last_marks = Vec::new();
        let mut has_more = false;
        while delivered < limit {
            match stream.next() {
                None => break,
                Some(Err(err)) => {
                    if delivered == 0 {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, delivered, "read ended early");
                    has_more = true;
                    break;
                }
                Some(Ok(FilterResult { item, marks })) => {
                    let counted = match item {
                        Item::Dropped => short_page,
                        item => results.push(item),
                    };
                    if counted {
                        delivered += 1;
                        last_marks = marks;
                    }
                }
            }
        }
        if delivered == limit {
            has_more = Self::peek(&mut stream, short_page);
        }

        let cursor = if has_more {
            encode_cursor(&last_marks)?
        } else {
            None
        };
        tracing::debug!(
            collection = %self.context.collection(),
            returned = results.len(),
            delivered,
            has_more,
            "pipeline page"
        );
        Ok(PipelineResults {
            results,
            cursor,
            has_more,
        })
    }

    /// Whether anything countable remains.
    fn peek(stream: &mut Stream<'_>, short_page: bool) -> bool {
        for next in stream {
            match next {
                Ok(FilterResult {
                    item: Item::Dropped,
                    ..
                }) if !short_page => continue,
                Ok(_) => return true,
                Err(err) => {
                    tracing::debug!(error = %err, "lookahead failed");
                    return true;
                }
            }
        }
        false
    }

    /// Assemble the stage chain, applying cursor entries.
    fn stream(&self, entries: Vec<CursorEntry>, limit: usize) -> Result<Stream<'_>, CorvidError> {
        let names: Vec<String> = self
            .filters
            .iter()
            .enumerate()
            .map(|(index, filter)| stage_name(index, filter))
            .collect();
        let last_resumable = self.filters.iter().rposition(Filter::is_resumable);

        let mut tokens: BTreeMap<usize, CursorEntry> = BTreeMap::new();
        for entry in entries {
            let index = names
                .iter()
                .position(|name| *name == entry.name)
                .filter(|&i| self.filters[i].is_resumable())
                .ok_or_else(|| {
                    CorvidError::InvalidCursor(format!("no resumable stage '{}'", entry.name))
                })?;
            tokens.insert(index, entry);
        }

        let page_size = self.config.page_size;
        let batch_size = self.config.verify_batch_size.min(limit.saturating_add(1));

        let mut stream: Option<Stream<'_>> = None;
        for (index, filter) in self.filters.iter().enumerate() {
            let name = names[index].clone();
            let inclusive = Some(index) != last_resumable;
            let token = tokens.remove(&index);
            let upstream = stream.take();

            stream = Some(match filter {
                Filter::Graph(graph_filter) => graph::stage(
                    upstream,
                    &self.stores.graph,
                    &self.context,
                    graph_filter,
                    name,
                    token
                        .map(|t| t.position().map(|position| Resume { position, inclusive }))
                        .transpose()?,
                    page_size,
                )?,
                Filter::Search(search_filter) => search::stage(
                    required(upstream, &name)?,
                    self.stores.index.as_ref(),
                    &self.context,
                    search_filter,
                    name,
                    token
                        .map(|t| t.position().map(|position| Resume { position, inclusive }))
                        .transpose()?,
                ),
                Filter::Entity(entity_filter) => entity::stage(
                    required(upstream, &name)?,
                    &self.stores,
                    &self.context,
                    entity_filter,
                    batch_size,
                ),
                Filter::Collector(collector) => {
                    collect::stage(required(upstream, &name)?, *collector)
                }
            });
        }

        stream.ok_or_else(|| construction("pipeline has no filters"))
    }
}

// =============================================================================
// TESTS
// =============================================================================
