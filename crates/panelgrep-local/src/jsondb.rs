//! File-backed stores for the single-binary bootstrap mode: the catalog as
//! one JSON document, the index as another.
//!
//! Writes go through a temp file and an atomic rename, so a crash leaves
//! either the old state or the new one, never a torn file. File IO runs on
//! the blocking pool. These stores trade throughput for zero
//! infrastructure; the Postgres/Redis adapters are the serving path.

use panelgrep_core::{CatalogStore, Comic, ComicId, Comics, Error, Result};
use panelgrep_fts::{IndexStore, Posting};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path).map_err(|e| Error::Backend(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Backend(format!("{}: {e}", parent.display())))?;
    }
    let bytes =
        serde_json::to_vec(value).map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| Error::Backend(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| Error::Backend(format!("{}: {e}", path.display())))?;
    Ok(())
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Backend(format!("file store join failed: {e}")))?
}

pub struct JsonCatalogStore {
    path: PathBuf,
    // One writer at a time; readers go through the same full-file load.
    lock: Mutex<()>,
}

impl JsonCatalogStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Comics> {
        let path = self.path.clone();
        blocking(move || read_json::<Comics>(&path)).await
    }
}

#[async_trait::async_trait]
impl CatalogStore for JsonCatalogStore {
    async fn save(&self, comics: &Comics) -> Result<()> {
        let _writing = self.lock.lock().await;
        let path = self.path.clone();
        let new = comics.clone();
        blocking(move || {
            let mut all = read_json::<Comics>(&path)?;
            all.extend(new);
            write_json_atomic(&path, &all)
        })
        .await
    }

    async fn get_all(&self) -> Result<Comics> {
        self.load().await
    }

    async fn get_by_id(&self, id: ComicId) -> Result<Comic> {
        self.load()
            .await?
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("comic {id}")))
    }

    async fn get_all_ids(&self) -> Result<BTreeSet<ComicId>> {
        Ok(self.load().await?.into_keys().collect())
    }

    async fn total(&self) -> Result<u64> {
        Ok(self.load().await?.len() as u64)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    postings: BTreeMap<String, BTreeMap<ComicId, u32>>,
    indexed: BTreeSet<ComicId>,
}

pub struct JsonIndexStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonIndexStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<IndexFile> {
        let path = self.path.clone();
        blocking(move || read_json::<IndexFile>(&path)).await
    }
}

#[async_trait::async_trait]
impl IndexStore for JsonIndexStore {
    async fn postings(&self, token: &str) -> Result<Vec<Posting>> {
        Ok(self
            .load()
            .await?
            .postings
            .get(token)
            .map(|scores| {
                scores
                    .iter()
                    .map(|(id, score)| Posting {
                        id: *id,
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply(
        &self,
        patch: &BTreeMap<String, Vec<Posting>>,
        indexed: &BTreeSet<ComicId>,
    ) -> Result<()> {
        let _writing = self.lock.lock().await;
        let path = self.path.clone();
        let patch = patch.clone();
        let indexed = indexed.clone();
        blocking(move || {
            let mut file = read_json::<IndexFile>(&path)?;
            for (token, postings) in patch {
                let scores = file.postings.entry(token).or_default();
                for posting in postings {
                    *scores.entry(posting.id).or_insert(0) += posting.score;
                }
            }
            file.indexed.extend(indexed);
            write_json_atomic(&path, &file)
        })
        .await
    }

    async fn is_indexed(&self, id: ComicId) -> Result<bool> {
        Ok(self.load().await?.indexed.contains(&id))
    }
}
