//! Bridges the catalog to the full-text machinery: items become documents,
//! queries run through the modifier pipeline against the persisted index.

use panelgrep_core::{ComicId, Comics, Result, SearchEngine};
use panelgrep_fts::{
    Document, FullTextSearcher, IndexStore, InvertedIndexer, ReturnMostRelevant, ThroughIndexes,
};
use std::sync::Arc;

/// Hard cap on how many ranked ids a query returns.
const RESULT_CAP: usize = 10;

pub struct FtsSearchEngine {
    indexer: InvertedIndexer,
    searcher: FullTextSearcher,
}

impl FtsSearchEngine {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self {
            indexer: InvertedIndexer::new(store),
            searcher: FullTextSearcher,
        }
    }
}

#[async_trait::async_trait]
impl SearchEngine for FtsSearchEngine {
    async fn search(&self, query_tokens: &[String]) -> Result<Vec<ComicId>> {
        tracing::debug!(?query_tokens, "running ranked query");
        let results = self
            .searcher
            .search(
                query_tokens,
                &[
                    &ThroughIndexes(&self.indexer),
                    &ReturnMostRelevant(RESULT_CAP),
                ],
            )
            .await?;
        Ok(results.into_iter().map(|r| r.id).collect())
    }

    async fn add(&self, comics: &Comics) -> Result<()> {
        let docs: Vec<Document> = comics
            .iter()
            .map(|(id, comic)| Document {
                id: *id,
                tokens: comic.keywords.clone(),
            })
            .collect();
        self.indexer.add(&docs).await
    }
}
