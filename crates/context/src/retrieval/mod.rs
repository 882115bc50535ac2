//! Multi-query retrieval
//!
//! Issues every query of a [`QuerySet`] against one semantic index, in order,
//! and merges the hits into a single deduplicated passage list:
//! - Passages are keyed by their identity key
//! - A repeated key replaces the stored passage but keeps its first position
//! - The merged list is truncated to `k`; there is no re-ranking by score

mod cached;
mod index;

pub use cached::CachedIndex;
pub use index::{HttpSemanticIndex, IndexHit, SemanticIndex};

use crate::query_set::QuerySet;
use proposalforge_common::{metrics, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Characters of content used as identity when a hit has no id or source
pub const CONTENT_KEY_CHARS: usize = 64;

/// Position of a passage inside its source document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Page(i64),
    Label(String),
}

impl Location {
    /// Placeholder used when the index reports no location
    pub fn unknown() -> Self {
        Location::Label("?".to_string())
    }

    fn from_value(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(page) => Location::Page(page),
                None => Location::Label(n.to_string()),
            },
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Location::Label(s.trim().to_string())
            }
            _ => Location::unknown(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Page(page) => write!(f, "{}", page),
            Location::Label(label) => f.write_str(label),
        }
    }
}

/// A retrieved unit of text with its source metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Passage text
    pub content: String,

    /// Deduplication key: record id, else source path, else leading content
    pub identity_key: String,

    /// Source document (path or URI)
    pub source: String,

    /// Position within the source
    pub location: Location,

    /// Human-readable title, defaulting to the source name
    pub title: String,

    /// Similarity score reported by the index
    pub score: Option<f32>,
}

impl Passage {
    /// Build a passage from a raw index hit
    pub fn from_hit(hit: IndexHit) -> Self {
        let identity_key = identity_key(hit.id.as_deref(), hit.source.as_deref(), &hit.content);
        let source = hit
            .source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "?".to_string());
        let title = hit
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| display_name(&source));

        Self {
            location: Location::from_value(hit.location.as_ref()),
            identity_key,
            source,
            title,
            content: hit.content,
            score: hit.score,
        }
    }
}

/// Derive the identity key for a hit
pub fn identity_key(id: Option<&str>, source: Option<&str>, content: &str) -> String {
    if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
        return id.to_string();
    }
    if let Some(source) = source.filter(|s| !s.trim().is_empty()) {
        return source.to_string();
    }
    content.chars().take(CONTENT_KEY_CHARS).collect()
}

fn display_name(source: &str) -> String {
    source
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(source)
        .to_string()
}

/// Bounds for one retrieval call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Passages returned after the merge
    pub k: usize,
    /// Candidates requested from the index per query
    pub fetch_k: usize,
    /// Minimum similarity score
    pub score_threshold: f32,
}

/// Ordered, identity-keyed accumulator
#[derive(Debug, Default)]
pub struct PassageMerger {
    passages: Vec<Passage>,
    positions: HashMap<String, usize>,
}

impl PassageMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity key; position is fixed at first insert.
    pub fn upsert(&mut self, passage: Passage) {
        match self.positions.get(&passage.identity_key) {
            Some(&idx) => self.passages[idx] = passage,
            None => {
                self.positions
                    .insert(passage.identity_key.clone(), self.passages.len());
                self.passages.push(passage);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// The first `k` passages in merge order
    pub fn take(mut self, k: usize) -> Vec<Passage> {
        self.passages.truncate(k);
        self.passages
    }
}

/// Run every query against `index` and merge the results
pub async fn retrieve(
    index: &dyn SemanticIndex,
    queries: &QuerySet,
    params: RetrievalParams,
) -> Result<Vec<Passage>> {
    let mut merger = PassageMerger::new();

    // Sequential on purpose: query order is merge precedence.
    for query in queries.iter() {
        let hits = index
            .search(query, params.k, params.fetch_k, params.score_threshold)
            .await?;
        debug!(index = index.name(), query = %query, hits = hits.len(), "Index query");

        for hit in hits {
            merger.upsert(Passage::from_hit(hit));
        }
    }

    let merged = merger.len();
    let passages = merger.take(params.k);
    metrics::record_retrieval(index.name(), queries.len(), passages.len());

    if passages.is_empty() {
        warn!(
            index = index.name(),
            queries = queries.len(),
            "No passages retrieved for query set"
        );
    } else {
        debug!(
            index = index.name(),
            merged,
            kept = passages.len(),
            "Retrieval merged"
        );
    }

    Ok(passages)
}

/// Merge already-retrieved lists (e.g. primary then secondary index) with the
/// same identity rule, keeping every passage.
pub fn merge_lists(lists: Vec<Vec<Passage>>) -> Vec<Passage> {
    let mut merger = PassageMerger::new();
    for passage in lists.into_iter().flatten() {
        merger.upsert(passage);
    }
    let len = merger.len();
    merger.take(len)
}
