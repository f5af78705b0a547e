//! Redis persistence for the inverted index.
//!
//! Layout: one hash per token (`field = id`, `value = serialized posting`)
//! plus the `indexed_documents` set of ids. Merging a patch reads the
//! touched hashes in one pipeline, folds scores additively in memory, and
//! writes everything back in a single atomic pipeline. Per-token updates
//! are idempotent overwrites keyed by id; no cross-token transactional
//! guarantee is claimed.

use panelgrep_core::{ComicId, Error, Result};
use panelgrep_fts::{IndexStore, Posting};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const INDEXED_DOCUMENTS_KEY: &str = "indexed_documents";

fn backend(e: redis::RedisError) -> Error {
    Error::Backend(e.to_string())
}

fn decode_posting(field: &str, raw: &str) -> Result<Posting> {
    let id: ComicId = field
        .parse()
        .map_err(|_| Error::Parse(format!("posting id {field:?}")))?;
    let mut posting: Posting =
        serde_json::from_str(raw).map_err(|e| Error::Parse(format!("posting for id {id}: {e}")))?;
    // The hash field is authoritative for the id.
    posting.id = id;
    Ok(posting)
}

#[derive(Clone)]
pub struct RedisIndexStore {
    conn: ConnectionManager,
}

impl RedisIndexStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client.get_connection_manager().await.map_err(backend)?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl IndexStore for RedisIndexStore {
    async fn postings(&self, token: &str) -> Result<Vec<Posting>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(token).await.map_err(backend)?;
        map.iter()
            .map(|(field, raw)| decode_posting(field, raw))
            .collect()
    }

    async fn apply(
        &self,
        patch: &BTreeMap<String, Vec<Posting>>,
        indexed: &BTreeSet<ComicId>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        let tokens: Vec<&String> = patch.keys().collect();
        let existing: Vec<HashMap<String, String>> = if tokens.is_empty() {
            Vec::new()
        } else {
            let mut read = redis::pipe();
            for token in &tokens {
                read.hgetall(token.as_str());
            }
            read.query_async(&mut conn).await.map_err(backend)?
        };

        let mut write = redis::pipe();
        write.atomic();
        for (i, token) in tokens.iter().enumerate() {
            let mut merged: BTreeMap<ComicId, u32> = BTreeMap::new();
            if let Some(map) = existing.get(i) {
                for (field, raw) in map {
                    let posting = decode_posting(field, raw)?;
                    merged.insert(posting.id, posting.score);
                }
            }
            for posting in &patch[token.as_str()] {
                *merged.entry(posting.id).or_insert(0) += posting.score;
            }
            for (id, score) in merged {
                let value = serde_json::to_string(&Posting { id, score })
                    .map_err(|e| Error::Parse(e.to_string()))?;
                write.hset(token.as_str(), id.to_string(), value).ignore();
            }
        }
        for id in indexed {
            write.sadd(INDEXED_DOCUMENTS_KEY, id.to_string()).ignore();
        }

        let _: () = write.query_async(&mut conn).await.map_err(backend)?;
        Ok(())
    }

    async fn is_indexed(&self, id: ComicId) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(INDEXED_DOCUMENTS_KEY, id.to_string())
            .await
            .map_err(backend)
    }
}
