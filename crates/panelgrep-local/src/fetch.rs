//! Bounded-parallelism crawler over the remote catalog's sparse numbered
//! namespace.
//!
//! The remote skips certain ids on purpose, so a 404 is a gap, not a
//! failure. Crawling walks ids upward, keeps at most `parallel` fetches in
//! flight, and stops once `gaps_limit` gaps have been seen (or `max_comics`
//! is reached, when set). Any other HTTP or transport failure ends the pass:
//! in-flight fetches drain and the first error is reported alongside the
//! items that completed.

use panelgrep_core::{
    Comic, ComicId, ComicSource, Comics, Error, FetchOutcome, Result, TokenProcessor,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire shape of one remote catalog entry (`{base_url}/{id}/info.0.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteComic {
    pub num: ComicId,
    #[serde(default)]
    pub title: String,
    pub img: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub alt: String,
}

/// HTTP client for the numbered catalog source.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    base_url: String,
    max_comics: u32,
    parallel: usize,
    gaps_limit: u32,
}

impl SourceClient {
    /// `max_comics == 0` means "bounded only by gaps".
    pub fn new(base_url: &str, max_comics: u32, parallel: usize, gaps_limit: u32) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| Error::Parse(format!("source url: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent("panelgrep/0.1")
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_comics,
            parallel: parallel.max(1),
            gaps_limit: gaps_limit.max(1),
        })
    }

    /// `Ok(None)` is a gap: the remote numbers around missing ids.
    async fn get_comic(&self, id: ComicId) -> Result<Option<RemoteComic>> {
        let url = format!("{}/{}/info.0.json", self.base_url, id);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("fetch {url}"))
            } else {
                Error::Fetch(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::RemoteHttp {
                status: status.as_u16(),
            });
        }

        let comic = resp
            .json::<RemoteComic>()
            .await
            .map_err(|e| Error::Parse(format!("item {id}: {e}")))?;
        Ok(Some(comic))
    }

    /// Crawls ids `1, 2, 3, …`, skipping `existing`. Returns whatever
    /// completed plus the first fatal error, if any; dispatch stops on
    /// cancellation, on the gap limit, and after a fatal error, but workers
    /// already in flight always settle.
    pub async fn get_comics(
        &self,
        cancel: &CancellationToken,
        existing: &BTreeSet<ComicId>,
    ) -> (Vec<RemoteComic>, Option<Error>) {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let gaps = Arc::new(AtomicU32::new(0));
        let collected: Arc<Mutex<Vec<RemoteComic>>> = Arc::new(Mutex::new(Vec::new()));
        let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

        let mut workers = JoinSet::new();
        let mut id: ComicId = 0;
        loop {
            id += 1;
            if self.max_comics > 0 && id > self.max_comics as ComicId {
                break;
            }
            if gaps.load(Ordering::Relaxed) >= self.gaps_limit {
                break;
            }
            if lock(&first_error).is_some() {
                break;
            }
            if cancel.is_cancelled() {
                lock(&first_error).get_or_insert(Error::Cancelled);
                break;
            }
            if existing.contains(&id) {
                continue;
            }

            // Waiting for a permit is the producer's backpressure point;
            // cancellation must win over a saturated pool.
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    lock(&first_error).get_or_insert(Error::Cancelled);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            // The wait for a permit can outlast the gap that tripped the
            // limit; re-check before issuing another request.
            if gaps.load(Ordering::Relaxed) >= self.gaps_limit || lock(&first_error).is_some() {
                break;
            }

            let client = self.clone();
            let gaps = gaps.clone();
            let collected = collected.clone();
            let first_error = first_error.clone();
            workers.spawn(async move {
                let _permit = permit;
                match client.get_comic(id).await {
                    Ok(Some(comic)) => lock(&collected).push(comic),
                    Ok(None) => {
                        gaps.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        lock(&first_error).get_or_insert(err);
                    }
                }
            });
        }

        // Drain: in-flight fetches settle even after cancellation or error.
        while workers.join_next().await.is_some() {}

        let comics = std::mem::take(&mut *lock(&collected));
        let error = lock(&first_error).take();
        (comics, error)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`ComicSource`] adapter: crawls the remote and turns each raw entry into
/// a catalog item by extracting keywords from alt + transcript + title.
pub struct ComicFetcher {
    client: SourceClient,
    processor: Arc<dyn TokenProcessor>,
}

impl ComicFetcher {
    pub fn new(client: SourceClient, processor: Arc<dyn TokenProcessor>) -> Self {
        Self { client, processor }
    }
}

#[async_trait::async_trait]
impl ComicSource for ComicFetcher {
    async fn fetch_missing(
        &self,
        cancel: &CancellationToken,
        existing: &BTreeSet<ComicId>,
    ) -> FetchOutcome {
        let (responses, mut error) = self.client.get_comics(cancel, existing).await;
        if let Some(err) = &error {
            tracing::warn!(%err, fetched = responses.len(), "catalog crawl ended with an error");
        }

        let mut comics = Comics::new();
        for resp in responses {
            let text = format!("{} {} {}", resp.alt, resp.transcript, resp.title);
            match self.processor.full_process(&text) {
                Ok(keywords) => {
                    comics.insert(
                        resp.num,
                        Comic {
                            img: resp.img,
                            keywords,
                        },
                    );
                }
                Err(err) => {
                    error.get_or_insert(err);
                    break;
                }
            }
        }

        FetchOutcome { comics, error }
    }
}
