//! # Search Index
//!
//! Full-text candidate lookup over entity properties.
//!
//! [`SearchIndex`] is the seam the read pipeline queries. [`DocumentIndex`]
//! implements it on any [`Backend`]: each indexed `(id, version)` becomes
//! an append-only document of term counts inside an [`IndexScope`].
//! Documents are never rewritten when an entity changes, so a query may
//! return versions the store has since superseded or deleted. Callers
//! verify candidates before trusting them.
//!
//! ## Query Language
//!
//! - Whitespace-separated terms; a document matches if any term occurs.
//! - `field:term` only counts occurrences inside property `field`.
//! - `*` or an empty query matches every document with score 0.
//!
//! Scores are integer counts of matched term occurrences. Results are
//! ordered by score, highest first; ties go to the newest document.

use crate::graph::EdgeName;
use crate::serialization::{decode, encode};
use crate::storage::{Backend, ExecuteOutcome, MutationBatch, RowKey, SortRange, Table};
use crate::version::VersionAllocator;
use crate::primitives::KEY_SEPARATOR;
use crate::{CandidateResult, CollectionContext, CorvidError, Id, MvccEntity, Value, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// SCOPE
// =============================================================================

/// The set of documents a query runs against: one owner and one edge name.
///
/// A collection's scope is owned by the tenant root; a connection's scope
/// is owned by the connecting entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexScope {
    pub tenant: Uuid,
    pub owner: Id,
    pub name: EdgeName,
}

impl IndexScope {
    /// Scope of every member of `collection`.
    #[must_use]
    pub fn collection(context: &CollectionContext, collection: &str) -> Self {
        Self {
            tenant: context.tenant(),
            owner: context.tenant_root(),
            name: EdgeName::Collection(collection.to_string()),
        }
    }

    /// Scope of every entity `owner` reaches through `connection`.
    #[must_use]
    pub fn connection(context: &CollectionContext, owner: &Id, connection: &str) -> Self {
        Self {
            tenant: context.tenant(),
            owner: owner.clone(),
            name: EdgeName::Connection(connection.to_string()),
        }
    }

    fn partition(&self) -> String {
        format!("{}{}{}", self.owner.to_key(), KEY_SEPARATOR, self.name.to_key())
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// =============================================================================
// SEARCH INDEX TRAIT
// =============================================================================

/// A queryable, possibly stale index of entity versions.
pub trait SearchIndex: Send + Sync + fmt::Debug {
    /// Add a document for this snapshot. Tombstones are not indexed.
    fn index(&self, scope: &IndexScope, snapshot: &MvccEntity) -> Result<(), CorvidError>;

    /// Candidates matching `query`, best first, optionally limited to one
    /// entity type.
    fn query(
        &self,
        scope: &IndexScope,
        query: &str,
        type_filter: Option<&str>,
    ) -> Result<Vec<CandidateResult>, CorvidError>;
}

// =============================================================================
// TOKENIZER
// =============================================================================

/// Lowercase, then split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn value_terms(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(b.to_string()),
        Value::Int(n) => out.push(n.to_string()),
        Value::Text(s) => out.extend(tokenize(s)),
        Value::List(items) => {
            for item in items {
                value_terms(item, out);
            }
        }
    }
}

fn field_term(field: &str, term: &str) -> String {
    format!("{}:{}", field.to_lowercase(), term)
}

/// Term keys a query looks up. `None` means "match everything".
fn parse_query(query: &str) -> Option<Vec<String>> {
    let query = query.trim();
    if query.is_empty() || query == "*" {
        return None;
    }
    let mut keys = Vec::new();
    for part in query.split_whitespace() {
        match part.split_once(':') {
            Some((field, term)) if !field.is_empty() => {
                keys.extend(tokenize(term).iter().map(|t| field_term(field, t)));
            }
            _ => keys.extend(tokenize(part)),
        }
    }
    Some(keys)
}

// =============================================================================
// DOCUMENT INDEX
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    id: Id,
    version: Version,
    /// Occurrences per term, both bare and `field:term`.
    terms: BTreeMap<String, u32>,
}

impl Document {
    fn score(&self, keys: &[String]) -> u64 {
        keys.iter()
            .filter_map(|key| self.terms.get(key))
            .map(|&count| u64::from(count))
            .sum()
    }
}

/// Slots tried before giving up on storing one document.
const MAX_SLOT_ATTEMPTS: usize = 8;

/// Term-count documents stored on a [`Backend`].
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    backend: Arc<dyn Backend>,
    allocator: Arc<VersionAllocator>,
}

impl DocumentIndex {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, allocator: Arc<VersionAllocator>) -> Self {
        Self { backend, allocator }
    }
}

impl SearchIndex for DocumentIndex {
    fn index(&self, scope: &IndexScope, snapshot: &MvccEntity) -> Result<(), CorvidError> {
        let Some(entity) = snapshot.entity() else {
            return Ok(());
        };

        let mut terms: BTreeMap<String, u32> = BTreeMap::new();
        for (field, value) in &entity.properties {
            let mut tokens = Vec::new();
            value_terms(value, &mut tokens);
            for token in tokens {
                for key in [field_term(field, &token), token] {
                    let count = terms.entry(key).or_default();
                    *count = count.saturating_add(1);
                }
            }
        }

        let document = Document {
            id: snapshot.id().clone(),
            version: snapshot.version(),
            terms,
        };
        let bytes = encode(&document)?;

        // Another allocator sharing the backend may already own the slot.
        let mut sort = self.allocator.allocate();
        for _ in 0..MAX_SLOT_ATTEMPTS {
            let key = RowKey::new(scope.tenant.to_string(), scope.partition(), sort.value());
            let batch = MutationBatch::new()
                .expect(Table::Search, key.clone(), None)
                .put(Table::Search, key, bytes.clone());
            match self.backend.execute(batch)? {
                ExecuteOutcome::Applied => {
                    tracing::debug!(
                        scope = %scope,
                        id = %snapshot.id(),
                        version = %snapshot.version(),
                        "indexed"
                    );
                    return Ok(());
                }
                ExecuteOutcome::PreconditionFailed { .. } => {
                    tracing::debug!(scope = %scope, slot = %sort, "search slot taken");
                    sort = self.allocator.allocate_after(sort);
                }
            }
        }
        Err(CorvidError::BackendUnavailable(format!(
            "no free search slot for {} in {} after {} attempts",
            snapshot.id(),
            scope,
            MAX_SLOT_ATTEMPTS
        )))
    }

    /// Reads and scores every document in the scope, stale ones included,
    /// so the cost grows with the number of versions ever indexed there.
    fn query(
        &self,
        scope: &IndexScope,
        query: &str,
        type_filter: Option<&str>,
    ) -> Result<Vec<CandidateResult>, CorvidError> {
        let keys = parse_query(query);
        let rows = self.backend.range(
            Table::Search,
            &scope.tenant.to_string(),
            &scope.partition(),
            SortRange::all().reversed(),
        )?;

        // Rows arrive newest first, so a stable sort keeps the tie order.
        let mut seen = BTreeSet::new();
        let mut hits = Vec::new();
        for (_, bytes) in rows {
            let document: Document = decode(&bytes)?;
            if type_filter.is_some_and(|t| t != document.id.entity_type()) {
                continue;
            }
            let score = match &keys {
                None => 0,
                Some(keys) => match document.score(keys) {
                    0 => continue,
                    score => score,
                },
            };
            if seen.insert((document.id.clone(), document.version)) {
                hits.push(CandidateResult::new(document.id, document.version, score));
            }
        }
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(hits)
    }
}

// =============================================================================
// TESTS
// =============================================================================
