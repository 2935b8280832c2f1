//! Collectors: the terminal stage and the page it fills.

use super::{Collector, FilterResult, Item, Stream};
use crate::{Id, MvccEntity};

/// The ordered output of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Results {
    Entities(Vec<MvccEntity>),
    Ids(Vec<Id>),
}

impl Results {
    pub(super) fn empty(collector: Collector) -> Self {
        match collector {
            Collector::Entities => Self::Entities(Vec::new()),
            Collector::Ids => Self::Ids(Vec::new()),
        }
    }

    /// Append a collected item. Returns false if the item does not belong
    /// in this kind of page.
    pub(super) fn push(&mut self, item: Item) -> bool {
        match (self, item) {
            (Self::Entities(entities), Item::Entity(entity)) => entities.push(entity),
            (Self::Ids(ids), Item::Id(id)) => ids.push(id),
            _ => return false,
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Entities(entities) => entities.len(),
            Self::Ids(ids) => ids.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the page, in order, whichever kind it is.
    #[must_use]
    pub fn ids(&self) -> Vec<Id> {
        match self {
            Self::Entities(entities) => entities.iter().map(|e| e.id().clone()).collect(),
            Self::Ids(ids) => ids.clone(),
        }
    }

    /// The loaded snapshots; empty for an id page.
    #[must_use]
    pub fn entities(&self) -> &[MvccEntity] {
        match self {
            Self::Entities(entities) => entities,
            Self::Ids(_) => &[],
        }
    }

    #[must_use]
    pub fn into_entities(self) -> Vec<MvccEntity> {
        match self {
            Self::Entities(entities) => entities,
            Self::Ids(_) => Vec::new(),
        }
    }
}

/// Shape each element for the collector. The `Ids` collector reduces
/// loaded snapshots to their ids.
pub(super) fn stage<'a>(upstream: Stream<'a>, collector: Collector) -> Stream<'a> {
    Box::new(upstream.map(move |next| {
        next.map(|result| match (collector, result.item) {
            (Collector::Ids, Item::Entity(entity)) => {
                let id = entity.id().clone();
                FilterResult::new(Item::Id(id), result.marks)
            }
            (_, item) => FilterResult::new(item, result.marks),
        })
    }))
}
