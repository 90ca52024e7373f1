use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{EffectiveConfig, WatchDefaults};
use crate::differ::{compare_snapshots, ChangeSummary, DiffVerdict};
use crate::fetch::{FetchError, Fetcher};
use crate::models::Snapshot;
use crate::normalizer::Normalizer;
use crate::notify::{ChangeEvent, Notifier};
use crate::registry::CheckToken;
use crate::storage::{Storage, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Completed(DiffVerdict),
    /// Fetch failed; only the error and the next due time were recorded.
    FetchFailed(FetchError),
    /// Nothing was committed; the watch keeps its prior snapshot and state.
    StoreFailed(String),
    /// The watch was deleted while the check ran; the result was dropped.
    Discarded,
    /// Another check of the same watch was already running.
    AlreadyRunning,
}

/// Fetch, normalize, compare and commit for one watch.
pub struct CheckPipeline {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    defaults: WatchDefaults,
}

impl CheckPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        defaults: WatchDefaults,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            defaults,
        }
    }

    pub async fn run(&self, token: &CheckToken) -> CheckOutcome {
        let slot = token.slot();
        let id = slot.id().clone();

        // Read inputs without holding the record across network I/O.
        let (url, config) = {
            let watch = slot.lock().await;
            if slot.is_deleted() {
                return CheckOutcome::Discarded;
            }
            (watch.url.clone(), watch.effective_config(&self.defaults))
        };

        info!(watch_id = %id, url = %url, "Checking");

        let raw = match self.fetcher.fetch(&url, config.fetch_backend).await {
            Ok(raw) => raw,
            Err(fetch_error) => {
                warn!(watch_id = %id, url = %url, "Fetch failed: {}", fetch_error);
                let mut watch = slot.lock().await;
                if slot.is_deleted() {
                    return CheckOutcome::Discarded;
                }
                let record = watch.plan_failure(fetch_error.to_string(), Utc::now(), &config);
                return match self.store.record_failure(&id, &record).await {
                    Ok(()) => {
                        watch.apply_failure(record);
                        CheckOutcome::FetchFailed(fetch_error)
                    }
                    Err(StoreError::NotFound(_)) => CheckOutcome::Discarded,
                    Err(store_error) => {
                        error!(watch_id = %id, "Failed to record fetch failure: {}", store_error);
                        watch.apply_failure(record);
                        CheckOutcome::FetchFailed(fetch_error)
                    }
                };
            }
        };

        let text = Normalizer::for_config(&config).normalize(&raw);
        let now = Utc::now();
        let snapshot = Snapshot::new(text, now);

        let previous = match self.store.load_last(&id).await {
            Ok(previous) => previous,
            Err(store_error) => return self.store_failed(token, store_error, &config).await,
        };
        let verdict = compare_snapshots(previous.as_ref(), &snapshot);

        let mut watch = slot.lock().await;
        if slot.is_deleted() {
            return CheckOutcome::Discarded;
        }

        let commit = watch.plan_success(snapshot, verdict, now, &config);
        match self.store.commit(&id, &commit).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return CheckOutcome::Discarded,
            Err(store_error) => {
                drop(watch);
                return self.store_failed(token, store_error, &config).await;
            }
        }

        let event = match (verdict, previous.as_ref()) {
            (DiffVerdict::Changed, Some(previous)) => Some(ChangeEvent {
                watch_id: id.clone(),
                url: url.clone(),
                detected_at: now,
                summary: ChangeSummary::between(previous.text(), commit.snapshot.text()),
            }),
            _ => None,
        };

        watch.apply(commit);
        drop(watch);

        info!(watch_id = %id, url = %url, "Check completed: {}", verdict);

        if let Some(event) = event {
            self.dispatch_notification(event);
        }

        CheckOutcome::Completed(verdict)
    }

    /// The store rejected the cycle: keep snapshot and state, but still move
    /// the in-memory due time so the watch waits a full interval.
    async fn store_failed(
        &self,
        token: &CheckToken,
        store_error: StoreError,
        config: &EffectiveConfig,
    ) -> CheckOutcome {
        let slot = token.slot();
        error!(watch_id = %slot.id(), "Store failure, check discarded: {}", store_error);

        let mut watch = slot.lock().await;
        if !slot.is_deleted() {
            let record = watch.plan_failure(store_error.to_string(), Utc::now(), config);
            watch.apply_failure(record);
        }
        CheckOutcome::StoreFailed(store_error.to_string())
    }

    fn dispatch_notification(&self, event: ChangeEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                error!(watch_id = %event.watch_id, "Failed to send change notification: {}", e);
            }
        });
    }
}
