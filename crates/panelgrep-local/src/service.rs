//! The catalog service: the daily reconciliation pipeline and the ranked
//! search orchestration over the stores.
//!
//! Update phases strictly serialize: load ids, fetch, save, index. The
//! fetch phase honors the caller's cancellation (plus its own deadline)
//! through a child token so partial results survive; the save and index
//! phases deliberately detach from the caller: once a batch is fetched,
//! aborting mid-commit wastes the crawl and can leave the catalog and the
//! index disagreeing. A failed run reports its first error and is retried
//! by the next scheduled tick; the indexed-documents guard makes the retry
//! safe.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use panelgrep_core::{
    CatalogStore, ComicService, ComicSource, Error, Result, SearchEngine, TokenProcessor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FETCH_DEADLINE: Duration = Duration::from_secs(3 * 60);
const SAVE_DEADLINE: Duration = Duration::from_secs(2 * 60);
const INDEX_DEADLINE: Duration = Duration::from_secs(60);

pub struct CatalogService {
    source: Arc<dyn ComicSource>,
    catalog: Arc<dyn CatalogStore>,
    processor: Arc<dyn TokenProcessor>,
    engine: Arc<dyn SearchEngine>,
    // Concurrent updates are not permitted; queue them instead.
    update_lock: tokio::sync::Mutex<()>,
}

impl CatalogService {
    pub fn new(
        source: Arc<dyn ComicSource>,
        catalog: Arc<dyn CatalogStore>,
        processor: Arc<dyn TokenProcessor>,
        engine: Arc<dyn SearchEngine>,
    ) -> Self {
        Self {
            source,
            catalog,
            processor,
            engine,
            update_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl ComicService for CatalogService {
    async fn update(&self, cancel: &CancellationToken) -> Result<()> {
        let _running = self.update_lock.lock().await;

        let existing = self.catalog.get_all_ids().await?;
        tracing::info!(existing = existing.len(), "retrieving new items from the catalog source");

        // A child token carries both the caller's cancellation and the fetch
        // deadline into the crawl, so either way partial results come back.
        let fetch_cancel = cancel.child_token();
        let deadline = fetch_cancel.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(FETCH_DEADLINE).await;
            deadline.cancel();
        });
        let outcome = self.source.fetch_missing(&fetch_cancel, &existing).await;
        watchdog.abort();

        let mut first_error = outcome.error;
        let new_comics = outcome.comics;

        if !new_comics.is_empty() {
            tracing::info!(new = new_comics.len(), "persisting new items");
            let saved = match tokio::time::timeout(SAVE_DEADLINE, self.catalog.save(&new_comics))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("saving new items".to_string())),
            };

            match saved {
                Ok(()) => {
                    tracing::info!("folding new items into the index");
                    let indexed =
                        match tokio::time::timeout(INDEX_DEADLINE, self.engine.add(&new_comics))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(Error::Timeout("indexing new items".to_string())),
                        };
                    if let Err(err) = indexed {
                        first_error.get_or_insert(err);
                    }
                }
                // Nothing committed, so indexing would reference missing
                // rows; skip it and let the next run retry the whole batch.
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let query_tokens = self.processor.full_process(query)?;
        let ids = self.engine.search(&query_tokens).await?;

        let mut urls = Vec::with_capacity(ids.len());
        for id in ids {
            urls.push(self.catalog.get_by_id(id).await?.img);
        }
        Ok(urls)
    }

    async fn total(&self) -> Result<u64> {
        self.catalog.total().await
    }
}

/// Runs `service.update` daily at `update_time` (local wall clock) until
/// `cancel` fires. A failing run is logged and forgiven; the schedule
/// continues. After each run the timer resets by 24 hours.
pub fn schedule_update(
    service: Arc<dyn ComicService>,
    cancel: CancellationToken,
    update_time: NaiveTime,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(%update_time, "scheduling daily catalog update");
        let mut wait = next_update_wait(chrono::Local::now().naive_local(), update_time);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            tracing::info!("scheduled catalog update started");
            if let Err(err) = service.update(&cancel).await {
                tracing::error!(%err, "scheduled catalog update failed");
            }

            wait = Duration::from_secs(24 * 60 * 60);
        }
    })
}

/// Time until the next wall-clock occurrence of `at`: later today, or
/// tomorrow if the time has already passed.
fn next_update_wait(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
