//! Backend-agnostic full-text machinery: the inverted index over keyword
//! tokens and the ranked searcher that runs on top of it.
//!
//! Persistence lives behind [`IndexStore`]; this crate only decides what a
//! posting is, how documents fold into the index, and how results rank.

mod index;
mod search;

pub use index::{Document, IndexStore, InvertedIndexer, Posting};
pub use search::{
    FullTextSearcher, ReturnMostRelevant, SearchModifier, SearchResult, SearchResults,
    ThroughDocs, ThroughIndexes,
};
