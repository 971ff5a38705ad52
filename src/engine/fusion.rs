//! Fusion and deduplication of raw source hits.

use std::collections::HashSet;

use tracing::debug;

use crate::retrieval::{RetrievalHit, SourceKind};

/// Evidence after fusion: articles and structured records never mix, and no
/// two records share an identity key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusedEvidenceSet {
    pub articles: Vec<RetrievalHit>,
    pub records: Vec<RetrievalHit>,
}

impl FusedEvidenceSet {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty() && self.records.is_empty()
    }
}

/// Merge the three raw hit lists.
///
/// Articles keep their source order untouched. Records are keyed by identity:
/// vector-search hits go in first in their returned order, then keyword hits
/// only for identities not already present. Each list is filtered to its own
/// source kind, so a hit can never cross buckets.
pub fn fuse(
    articles: Vec<RetrievalHit>,
    by_vector: Vec<RetrievalHit>,
    by_keyword: Vec<RetrievalHit>,
) -> FusedEvidenceSet {
    let articles: Vec<_> = articles
        .into_iter()
        .filter(|h| h.source_kind() == SourceKind::Article)
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::with_capacity(by_vector.len() + by_keyword.len());
    let mut duplicates = 0usize;
    for hit in by_vector.into_iter().chain(by_keyword) {
        if hit.source_kind() != SourceKind::StructuredRecord {
            continue;
        }
        if seen.insert(hit.identity_key.clone()) {
            records.push(hit);
        } else {
            duplicates += 1;
        }
    }

    debug!(articles = articles.len(), records = records.len(), duplicates, "evidence fused");
    FusedEvidenceSet { articles, records }
}
