//! # Filters
//!
//! The closed set of stages a read pipeline is assembled from. Each filter
//! declares what it consumes and what it produces, so a chain can be
//! checked before it runs.

use crate::primitives::{MAX_NAME_LENGTH, MAX_TYPE_LENGTH};
use crate::types::validate_name;
use crate::{CorvidError, Id, Version};
use std::fmt;

/// What flows between two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Id,
    Candidate,
    Entity,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Id => "id",
            Self::Candidate => "candidate",
            Self::Entity => "entity",
        })
    }
}

/// Graph traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphFilter {
    /// Seed: emits one id and consumes nothing.
    EntityId(Id),
    /// Every member of a collection owned by the input id.
    ReadCollection { collection: String },
    /// The target, if it is a member of the collection.
    ReadCollectionById { collection: String, target: Id },
    /// Every entity the input id connects to.
    ReadConnection { connection: String },
    /// Connected entities of one type.
    ReadConnectionByType {
        connection: String,
        entity_type: String,
    },
    /// The target, if the input id connects to it.
    ReadConnectionById { connection: String, target: Id },
}

/// Search-index candidate lookup, owned by the input id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    Collection {
        query: String,
        collection: String,
        entity_type: Option<String>,
    },
    Connection {
        query: String,
        connection: String,
        connected_type: Option<String>,
    },
}

/// Checks against, and loads from, the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    /// Candidates -> ids still current at the indexed version.
    VerifyCandidateIds,
    /// Candidates -> current snapshots, verified and loaded in one read.
    VerifyCandidateEntities,
    /// Ids -> snapshots, latest or at most `bound`.
    Load { bound: Option<Version> },
}

/// Terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collector {
    Entities,
    Ids,
}

/// One stage of a read pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Graph(GraphFilter),
    Search(SearchFilter),
    Entity(EntityFilter),
    Collector(Collector),
}

impl Filter {
    /// Stable name of the filter kind, used in cursor stage names.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Graph(GraphFilter::EntityId(_)) => "entity_id",
            Self::Graph(GraphFilter::ReadCollection { .. }) => "read_collection",
            Self::Graph(GraphFilter::ReadCollectionById { .. }) => "read_collection_by_id",
            Self::Graph(GraphFilter::ReadConnection { .. }) => "read_connection",
            Self::Graph(GraphFilter::ReadConnectionByType { .. }) => "read_connection_by_type",
            Self::Graph(GraphFilter::ReadConnectionById { .. }) => "read_connection_by_id",
            Self::Search(SearchFilter::Collection { .. }) => "search_collection",
            Self::Search(SearchFilter::Connection { .. }) => "search_connection",
            Self::Entity(EntityFilter::VerifyCandidateIds) => "verify_candidate_ids",
            Self::Entity(EntityFilter::VerifyCandidateEntities) => "verify_candidate_entities",
            Self::Entity(EntityFilter::Load { .. }) => "load",
            Self::Collector(Collector::Entities) => "collect_entities",
            Self::Collector(Collector::Ids) => "collect_ids",
        }
    }

    /// Whether this stage contributes a cursor entry.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Graph(
                GraphFilter::ReadCollection { .. }
                    | GraphFilter::ReadConnection { .. }
                    | GraphFilter::ReadConnectionByType { .. }
            ) | Self::Search(_)
        )
    }

    #[must_use]
    pub const fn is_collector(&self) -> bool {
        matches!(self, Self::Collector(_))
    }

    /// Whether the stage can consume `input` (`None` = nothing upstream).
    #[must_use]
    pub fn accepts(&self, input: Option<ItemKind>) -> bool {
        match self {
            Self::Graph(GraphFilter::EntityId(_)) => input.is_none(),
            Self::Graph(_) | Self::Search(_) => input == Some(ItemKind::Id),
            Self::Entity(EntityFilter::Load { .. }) => input == Some(ItemKind::Id),
            Self::Entity(_) => input == Some(ItemKind::Candidate),
            Self::Collector(Collector::Entities) => input == Some(ItemKind::Entity),
            Self::Collector(Collector::Ids) => {
                matches!(input, Some(ItemKind::Id | ItemKind::Entity))
            }
        }
    }

    /// What the stage emits.
    #[must_use]
    pub const fn output(&self) -> ItemKind {
        match self {
            Self::Graph(_) | Self::Entity(EntityFilter::VerifyCandidateIds) => ItemKind::Id,
            Self::Search(_) => ItemKind::Candidate,
            Self::Entity(_) | Self::Collector(Collector::Entities) => ItemKind::Entity,
            Self::Collector(Collector::Ids) => ItemKind::Id,
        }
    }

    /// Check the filter's own parameters.
    pub fn validate(&self) -> Result<(), CorvidError> {
        match self {
            Self::Graph(GraphFilter::EntityId(id)) => id.validate(),
            Self::Graph(GraphFilter::ReadCollection { collection }) => {
                validate_name("collection", collection, MAX_NAME_LENGTH)
            }
            Self::Graph(GraphFilter::ReadCollectionById { collection, target }) => {
                validate_name("collection", collection, MAX_NAME_LENGTH)?;
                target.validate()
            }
            Self::Graph(GraphFilter::ReadConnection { connection }) => {
                validate_name("connection", connection, MAX_NAME_LENGTH)
            }
            Self::Graph(GraphFilter::ReadConnectionByType {
                connection,
                entity_type,
            }) => {
                validate_name("connection", connection, MAX_NAME_LENGTH)?;
                validate_name("entity type", entity_type, MAX_TYPE_LENGTH)
            }
            Self::Graph(GraphFilter::ReadConnectionById { connection, target }) => {
                validate_name("connection", connection, MAX_NAME_LENGTH)?;
                target.validate()
            }
            Self::Search(SearchFilter::Collection {
                collection,
                entity_type,
                ..
            }) => {
                validate_name("collection", collection, MAX_NAME_LENGTH)?;
                match entity_type {
                    Some(t) => validate_name("entity type", t, MAX_TYPE_LENGTH),
                    None => Ok(()),
                }
            }
            Self::Search(SearchFilter::Connection {
                connection,
                connected_type,
                ..
            }) => {
                validate_name("connection", connection, MAX_NAME_LENGTH)?;
                match connected_type {
                    Some(t) => validate_name("entity type", t, MAX_TYPE_LENGTH),
                    None => Ok(()),
                }
            }
            Self::Entity(_) | Self::Collector(_) => Ok(()),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_accepts_nothing() {
        let seed = Filter::Graph(GraphFilter::EntityId(Id::generate("thing")));
        assert!(seed.accepts(None));
        assert!(!seed.accepts(Some(ItemKind::Id)));
    }

    #[test]
    fn verification_takes_candidates() {
        let verify = Filter::Entity(EntityFilter::VerifyCandidateIds);
        assert!(verify.accepts(Some(ItemKind::Candidate)));
        assert!(!verify.accepts(Some(ItemKind::Id)));
        assert_eq!(verify.output(), ItemKind::Id);
    }

    #[test]
    fn only_enumerating_stages_resume() {
        let target = Id::generate("thing");
        assert!(
            Filter::Graph(GraphFilter::ReadCollection {
                collection: "c".into()
            })
            .is_resumable()
        );
        assert!(
            !Filter::Graph(GraphFilter::ReadCollectionById {
                collection: "c".into(),
                target
            })
            .is_resumable()
        );
        assert!(!Filter::Entity(EntityFilter::Load { bound: None }).is_resumable());
    }

    #[test]
    fn names_are_validated() {
        let bad = Filter::Graph(GraphFilter::ReadConnection {
            connection: String::new(),
        });
        assert!(bad.validate().is_err());
    }
}
