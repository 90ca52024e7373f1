//! Operations exposed to the outside world: import, check, inspect, acknowledge
//! and delete watches, plus starting the background scheduler.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{validate_url, ConfigError, WatchConfig, WatchDefaults};
use crate::fetch::Fetcher;
use crate::models::{Target, Watch, WatchId, WatchStatus};
use crate::notify::Notifier;
use crate::pipeline::CheckPipeline;
use crate::registry::WatchRegistry;
use crate::scheduler::{CheckReport, Scheduler, SchedulerOptions};
use crate::storage::{Storage, StoreError};

const REPORT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("watch {0} not found")]
    NotFound(WatchId),
    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Result of importing a newline separated list of urls.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<WatchId>,
    pub rejected: Vec<(String, MonitorError)>,
}

pub struct Monitor {
    registry: Arc<WatchRegistry>,
    store: Arc<dyn Storage>,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<CheckPipeline>,
    defaults: WatchDefaults,
    options: SchedulerOptions,
    manual_tx: mpsc::UnboundedSender<Target>,
    manual_rx: Mutex<Option<mpsc::UnboundedReceiver<Target>>>,
    reports: broadcast::Sender<CheckReport>,
}

impl Monitor {
    pub fn new(
        options: SchedulerOptions,
        defaults: WatchDefaults,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pipeline = Arc::new(CheckPipeline::new(
            Arc::clone(&fetcher),
            Arc::clone(&store),
            notifier,
            defaults.clone(),
        ));
        let (manual_tx, manual_rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Self {
            registry: Arc::new(WatchRegistry::new()),
            store,
            fetcher,
            pipeline,
            defaults,
            options,
            manual_tx,
            manual_rx: Mutex::new(Some(manual_rx)),
            reports,
        }
    }

    /// Rebuilds the registry from the store. Returns how many watches were loaded.
    pub async fn restore(&self) -> Result<usize, MonitorError> {
        let watches = self.store.load_watches().await?;
        let count = watches.len();
        for watch in watches {
            self.registry.insert(watch);
        }
        info!("Restored {} watches from storage, {} registered", count, self.registry.len());
        Ok(count)
    }

    pub fn start(&self) -> Result<SchedulerHandle, MonitorError> {
        let manual_rx = self
            .manual_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MonitorError::AlreadyStarted)?;

        let scheduler = Scheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pipeline),
            self.options,
            manual_rx,
            self.reports.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler.run(shutdown_rx));

        Ok(SchedulerHandle { shutdown_tx, join })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckReport> {
        self.reports.subscribe()
    }

    /// Rejects bad urls, intervals and backends the fetcher cannot serve.
    fn validate(&self, config: &WatchConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let effective = self.defaults.resolve(config);
        if !self.fetcher.supports(effective.fetch_backend) {
            return Err(ConfigError::UnsupportedBackend(effective.fetch_backend));
        }
        Ok(())
    }

    pub async fn import_watch(&self, url: &str, config: WatchConfig) -> Result<WatchId, MonitorError> {
        let url = validate_url(url)?;
        self.validate(&config)?;

        let watch = Watch::new(url.as_str(), config, Utc::now());
        self.store.insert_watch(&watch).await?;

        let id = watch.id.clone();
        info!(watch_id = %id, url = %watch.url, "Imported watch");
        self.registry.insert(watch);
        Ok(id)
    }

    /// One url per line; blank lines are ignored, bad lines are reported.
    pub async fn import_urls(&self, urls: &str, config: WatchConfig) -> Result<ImportReport, MonitorError> {
        self.validate(&config)?;

        let mut report = ImportReport::default();
        for line in urls.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match self.import_watch(line, config.clone()).await {
                Ok(id) => report.imported.push(id),
                Err(e) => {
                    warn!("Rejected import of '{}': {}", line, e);
                    report.rejected.push((line.to_string(), e));
                }
            }
        }

        info!("{} Imported", report.imported.len());
        Ok(report)
    }

    pub fn is_watching(&self, url: &str) -> bool {
        validate_url(url)
            .map(|url| self.registry.contains_url(url.as_str()))
            .unwrap_or(false)
    }

    /// Queues a check and returns at once. An in-flight watch is skipped.
    pub fn check_now(&self, target: Target) -> Result<(), MonitorError> {
        if let Target::One(id) = &target {
            if self.registry.get(id).is_none() {
                return Err(MonitorError::NotFound(id.clone()));
            }
        }
        // The receiver lives as long as the scheduler; a send after shutdown is a no-op.
        let _ = self.manual_tx.send(target);
        Ok(())
    }

    pub async fn get_state(&self, id: &WatchId) -> Result<WatchStatus, MonitorError> {
        let slot = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;
        let watch = slot.lock().await;
        Ok(watch.status())
    }

    pub async fn get_watch(&self, id: &WatchId) -> Result<Watch, MonitorError> {
        let slot = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;
        let watch = slot.lock().await;
        Ok(watch.clone())
    }

    pub async fn list(&self) -> Vec<WatchStatus> {
        let mut statuses = Vec::new();
        for slot in self.registry.all() {
            statuses.push(slot.lock().await.status());
        }
        statuses
    }

    pub async fn update_config(&self, id: &WatchId, config: WatchConfig) -> Result<(), MonitorError> {
        self.validate(&config)?;
        let slot = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;

        let mut watch = slot.lock().await;
        self.store.update_config(id, &config).await?;
        watch.config = config;
        Ok(())
    }

    /// Marks watches as viewed. Returns how many were updated.
    pub async fn acknowledge(&self, target: Target) -> Result<usize, MonitorError> {
        let slots = self.registry.select(&target);
        if let (Target::One(id), true) = (&target, slots.is_empty()) {
            return Err(MonitorError::NotFound(id.clone()));
        }

        let mut updated = 0;
        for slot in slots {
            let mut watch = slot.lock().await;
            if slot.is_deleted() {
                continue;
            }
            let state = watch.acknowledged_state();
            if state != watch.state {
                self.store.set_state(slot.id(), state).await?;
                watch.state = state;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Removes watches and all their snapshots. A check running on a deleted
    /// watch finishes but its result is dropped. If the store refuses the
    /// delete, the watch stays registered and scheduled.
    pub async fn delete(&self, target: Target) -> Result<usize, MonitorError> {
        match target {
            Target::One(id) => {
                let slot = self
                    .registry
                    .get(&id)
                    .ok_or_else(|| MonitorError::NotFound(id.clone()))?;

                let guard = slot.lock().await;
                if slot.is_deleted() {
                    return Err(MonitorError::NotFound(id));
                }
                match self.store.delete(&id).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                slot.mark_deleted(&guard);
                self.registry.remove(&id);
                drop(guard);

                info!(watch_id = %id, "Deleted watch");
                Ok(1)
            }
            Target::All => {
                // Slots come back sorted by id, so concurrent bulk deletes lock
                // in the same order.
                let slots = self.registry.all();
                let mut guards = Vec::with_capacity(slots.len());
                for slot in &slots {
                    guards.push(slot.lock().await);
                }

                self.store.delete_all().await?;

                let mut deleted = 0;
                for (slot, guard) in slots.iter().zip(&guards) {
                    if slot.is_deleted() {
                        continue;
                    }
                    slot.mark_deleted(guard);
                    self.registry.remove(slot.id());
                    deleted += 1;
                }
                drop(guards);

                info!("Deleted {} watches", deleted);
                Ok(deleted)
            }
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }
}
