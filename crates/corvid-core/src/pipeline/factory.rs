//! # Filter Factory
//!
//! The one place filters are constructed, plus the canned pipeline shapes
//! built from them:
//!
//! | Shape | Filters |
//! |-------|---------|
//! | collection scan | seed(root), read_collection, load, collect |
//! | connection scan | seed(source), read_connection[_by_type], load, collect |
//! | by-id lookup | seed(owner), read_*_by_id, load, collect |
//! | search scan | seed(owner), search_*, verify_candidate_entities, collect |

use super::{Collector, EntityFilter, Filter, GraphFilter, Pipeline, ReadStores, SearchFilter};
use crate::config::PipelineConfig;
use crate::{CollectionContext, CorvidError, Id, Version};

/// Builds filters and pipelines over one set of read stores.
#[derive(Debug, Clone)]
pub struct FilterFactory {
    stores: ReadStores,
    config: PipelineConfig,
}

impl FilterFactory {
    #[must_use]
    pub fn new(stores: ReadStores, config: PipelineConfig) -> Self {
        Self { stores, config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // =========================================================================
    // FILTERS
    // =========================================================================

    #[must_use]
    pub fn entity_id(id: Id) -> Filter {
        Filter::Graph(GraphFilter::EntityId(id))
    }

    #[must_use]
    pub fn read_collection(collection: impl Into<String>) -> Filter {
        Filter::Graph(GraphFilter::ReadCollection {
            collection: collection.into(),
        })
    }

    #[must_use]
    pub fn read_collection_by_id(collection: impl Into<String>, target: Id) -> Filter {
        Filter::Graph(GraphFilter::ReadCollectionById {
            collection: collection.into(),
            target,
        })
    }

    #[must_use]
    pub fn read_connection(connection: impl Into<String>) -> Filter {
        Filter::Graph(GraphFilter::ReadConnection {
            connection: connection.into(),
        })
    }

    #[must_use]
    pub fn read_connection_by_type(
        connection: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Filter {
        Filter::Graph(GraphFilter::ReadConnectionByType {
            connection: connection.into(),
            entity_type: entity_type.into(),
        })
    }

    #[must_use]
    pub fn read_connection_by_id(connection: impl Into<String>, target: Id) -> Filter {
        Filter::Graph(GraphFilter::ReadConnectionById {
            connection: connection.into(),
            target,
        })
    }

    #[must_use]
    pub fn search_collection(
        query: impl Into<String>,
        collection: impl Into<String>,
        entity_type: Option<String>,
    ) -> Filter {
        Filter::Search(SearchFilter::Collection {
            query: query.into(),
            collection: collection.into(),
            entity_type,
        })
    }

    #[must_use]
    pub fn search_connection(
        query: impl Into<String>,
        connection: impl Into<String>,
        connected_type: Option<String>,
    ) -> Filter {
        Filter::Search(SearchFilter::Connection {
            query: query.into(),
            connection: connection.into(),
            connected_type,
        })
    }

    #[must_use]
    pub fn verify_candidate_ids() -> Filter {
        Filter::Entity(EntityFilter::VerifyCandidateIds)
    }

    #[must_use]
    pub fn verify_candidate_entities() -> Filter {
        Filter::Entity(EntityFilter::VerifyCandidateEntities)
    }

    /// Load at the latest version, or at most `bound` for a snapshot read.
    #[must_use]
    pub fn load(bound: Option<Version>) -> Filter {
        Filter::Entity(EntityFilter::Load { bound })
    }

    #[must_use]
    pub fn collect_entities() -> Filter {
        Filter::Collector(Collector::Entities)
    }

    #[must_use]
    pub fn collect_ids() -> Filter {
        Filter::Collector(Collector::Ids)
    }

    // =========================================================================
    // PIPELINES
    // =========================================================================

    /// Check an arbitrary chain against this factory's stores.
    pub fn pipeline(
        &self,
        context: &CollectionContext,
        filters: Vec<Filter>,
    ) -> Result<Pipeline, CorvidError> {
        Pipeline::new(
            self.stores.clone(),
            context.clone(),
            filters,
            self.config.clone(),
        )
    }

    /// Members of the context's collection, in insertion order.
    pub fn collection_scan(
        &self,
        context: &CollectionContext,
        bound: Option<Version>,
    ) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(context.tenant_root()),
                Self::read_collection(context.collection()),
                Self::load(bound),
                Self::collect_entities(),
            ],
        )
    }

    /// Member ids of the context's collection, without loading bodies.
    pub fn collection_ids(&self, context: &CollectionContext) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(context.tenant_root()),
                Self::read_collection(context.collection()),
                Self::collect_ids(),
            ],
        )
    }

    /// One member of the context's collection.
    pub fn collection_by_id(
        &self,
        context: &CollectionContext,
        target: Id,
    ) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(context.tenant_root()),
                Self::read_collection_by_id(context.collection(), target),
                Self::load(None),
                Self::collect_entities(),
            ],
        )
    }

    /// Entities `source` connects to, optionally of one type.
    pub fn connection_scan(
        &self,
        context: &CollectionContext,
        source: Id,
        connection: &str,
        connected_type: Option<&str>,
    ) -> Result<Pipeline, CorvidError> {
        let traverse = match connected_type {
            Some(entity_type) => Self::read_connection_by_type(connection, entity_type),
            None => Self::read_connection(connection),
        };
        self.pipeline(
            context,
            vec![
                Self::entity_id(source),
                traverse,
                Self::load(None),
                Self::collect_entities(),
            ],
        )
    }

    /// `target`, if `source` connects to it.
    pub fn connection_by_id(
        &self,
        context: &CollectionContext,
        source: Id,
        connection: &str,
        target: Id,
    ) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(source),
                Self::read_connection_by_id(connection, target),
                Self::load(None),
                Self::collect_entities(),
            ],
        )
    }

    /// Verified search hits in the context's collection, best first.
    pub fn search_collection_scan(
        &self,
        context: &CollectionContext,
        query: &str,
        entity_type: Option<&str>,
    ) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(context.tenant_root()),
                Self::search_collection(
                    query,
                    context.collection(),
                    entity_type.map(str::to_string),
                ),
                Self::verify_candidate_entities(),
                Self::collect_entities(),
            ],
        )
    }

    /// Verified search hits among `source`'s connections, best first.
    pub fn search_connection_scan(
        &self,
        context: &CollectionContext,
        source: Id,
        connection: &str,
        query: &str,
        connected_type: Option<&str>,
    ) -> Result<Pipeline, CorvidError> {
        self.pipeline(
            context,
            vec![
                Self::entity_id(source),
                Self::search_connection(query, connection, connected_type.map(str::to_string)),
                Self::verify_candidate_entities(),
                Self::collect_entities(),
            ],
        )
    }
}
