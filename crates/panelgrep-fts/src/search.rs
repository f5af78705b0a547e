use crate::index::{Document, InvertedIndexer, Posting};
use panelgrep_core::{ComicId, Result};

/// One ranked hit. `matched_tokens` counts the distinct query tokens that
/// hit this document; `score` sums the posting scores across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub id: ComicId,
    pub matched_tokens: u32,
    pub score: u32,
}

pub type SearchResults = Vec<SearchResult>;

/// One stage of the query pipeline, operating on the shared accumulator.
#[async_trait::async_trait]
pub trait SearchModifier: Send + Sync {
    async fn apply(&self, query_tokens: &[String], results: &mut SearchResults) -> Result<()>;
}

/// Runs the modifiers in order over an empty accumulator.
#[derive(Debug, Default)]
pub struct FullTextSearcher;

impl FullTextSearcher {
    pub async fn search(
        &self,
        query_tokens: &[String],
        modifiers: &[&dyn SearchModifier],
    ) -> Result<SearchResults> {
        let mut results = SearchResults::new();
        for modifier in modifiers {
            modifier.apply(query_tokens, &mut results).await?;
        }
        Ok(results)
    }
}

fn fold_token_hits(results: &mut SearchResults, hits: &[Posting]) {
    for hit in hits {
        match results.iter_mut().find(|r| r.id == hit.id) {
            Some(r) => {
                r.matched_tokens += 1;
                r.score += hit.score;
            }
            None => results.push(SearchResult {
                id: hit.id,
                matched_tokens: 1,
                score: hit.score,
            }),
        }
    }
}

/// Source stage: fold each query token's postings list into the accumulator.
pub struct ThroughIndexes<'a>(pub &'a InvertedIndexer);

#[async_trait::async_trait]
impl SearchModifier for ThroughIndexes<'_> {
    async fn apply(&self, query_tokens: &[String], results: &mut SearchResults) -> Result<()> {
        for token in query_tokens {
            let hits = self.0.postings(token).await?;
            fold_token_hits(results, &hits);
        }
        Ok(())
    }
}

/// Source stage over an explicit document list; same fold as
/// [`ThroughIndexes`] but counting occurrences directly. Useful for
/// bootstrap and benchmarking against the indexed path.
pub struct ThroughDocs<'a>(pub &'a [Document]);

#[async_trait::async_trait]
impl SearchModifier for ThroughDocs<'_> {
    async fn apply(&self, query_tokens: &[String], results: &mut SearchResults) -> Result<()> {
        for token in query_tokens {
            let mut hits = Vec::new();
            for doc in self.0 {
                let count = doc
                    .tokens
                    .iter()
                    .filter(|t| t.as_str() == token.as_str())
                    .count() as u32;
                if count > 0 {
                    hits.push(Posting {
                        id: doc.id,
                        score: count,
                    });
                }
            }
            fold_token_hits(results, &hits);
        }
        Ok(())
    }
}

/// Filter stage: rank and truncate to the `n` best results.
///
/// The order is total; every tie is broken: descending distinct matched
/// tokens, then descending score, then ascending id.
pub struct ReturnMostRelevant(pub usize);

#[async_trait::async_trait]
impl SearchModifier for ReturnMostRelevant {
    async fn apply(&self, _query_tokens: &[String], results: &mut SearchResults) -> Result<()> {
        results.sort_by(|a, b| {
            b.matched_tokens
                .cmp(&a.matched_tokens)
                .then_with(|| b.score.cmp(&a.score))
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(self.0);
        Ok(())
    }
}
