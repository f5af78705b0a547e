use panelgrep_core::{ComicId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One document as the indexer sees it: an id plus its keyword tokens in
/// occurrence order. Duplicate tokens are meaningful: they become score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: ComicId,
    pub tokens: Vec<String>,
}

/// One entry of a token's postings list: the number of occurrences of that
/// token in the document's keyword list. `score` is always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub id: ComicId,
    pub score: u32,
}

/// Persistence seam for the inverted index.
///
/// The store keeps `token -> (id -> posting)` plus the set of indexed
/// document ids. `apply` must merge additively: for a token already holding
/// a posting for the same id, scores add; otherwise the posting is inserted.
#[async_trait::async_trait]
pub trait IndexStore: Send + Sync {
    async fn postings(&self, token: &str) -> Result<Vec<Posting>>;
    /// Merges the patch into the stored postings and records `indexed` ids,
    /// as one batched write.
    async fn apply(
        &self,
        patch: &BTreeMap<String, Vec<Posting>>,
        indexed: &BTreeSet<ComicId>,
    ) -> Result<()>;
    async fn is_indexed(&self, id: ComicId) -> Result<bool>;
}

/// Builds per-batch patches against an [`IndexStore`].
///
/// Idempotence: documents whose id is already in the indexed set are skipped
/// before any counting happens, so replaying a batch after a partial failure
/// cannot double-count.
pub struct InvertedIndexer {
    store: Arc<dyn IndexStore>,
}

impl InvertedIndexer {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, docs: &[Document]) -> Result<()> {
        let mut patch: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut indexed: BTreeSet<ComicId> = BTreeSet::new();

        for doc in docs {
            if self.store.is_indexed(doc.id).await? {
                continue;
            }

            for token in &doc.tokens {
                let list = patch.entry(token.clone()).or_default();
                match list.iter_mut().find(|p| p.id == doc.id) {
                    Some(posting) => posting.score += 1,
                    None => list.push(Posting { id: doc.id, score: 1 }),
                }
            }

            // A document with no tokens still counts as indexed.
            indexed.insert(doc.id);
        }

        if patch.is_empty() && indexed.is_empty() {
            return Ok(());
        }

        self.store.apply(&patch, &indexed).await
    }

    pub async fn postings(&self, token: &str) -> Result<Vec<Posting>> {
        self.store.postings(token).await
    }
}
