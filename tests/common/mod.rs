#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::timeout;

use page_monitor::config::{FetchBackend, WatchConfig, WatchDefaults};
use page_monitor::fetch::{FetchError, Fetcher};
use page_monitor::models::{CheckCommit, FailureRecord, Snapshot, Watch, WatchId, WatchState};
use page_monitor::notify::{ChangeEvent, Notifier};
use page_monitor::storage::{SqliteStorage, Storage, StoreError};
use page_monitor::{CheckOutcome, CheckReport, Monitor, SchedulerOptions};

pub const ORIGINAL_PAGE: &str = r#"<html>
   <body>
 Some initial text</br>
 <a href="/original_link"> Some More Text </a>
 </br>
 So let's see what happens.  </br>
 </body>
 </html>
"#;

pub const MODIFIED_LINK_PAGE: &str = r#"<html>
   <body>
 Some initial text</br>
 <a href="/modified_link"> Some More Text </a>
 </br>
 So let's see what happens.  </br>
 </body>
 </html>
"#;

const WAIT: Duration = Duration::from_secs(5);

/// Serves whatever body the test last set, optionally blocking until released.
pub struct ScriptedFetcher {
    response: Mutex<Result<Vec<u8>, FetchError>>,
    gate: Option<Arc<Semaphore>>,
    fetches: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            response: Mutex::new(Ok(body.as_bytes().to_vec())),
            gate: None,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Each fetch waits for one permit on the returned semaphore.
    pub fn gated(body: &str) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new(body)
        };
        (fetcher, gate)
    }

    pub fn set_body(&self, body: &str) {
        *self.response.lock().unwrap() = Ok(body.as_bytes().to_vec());
    }

    pub fn fail_with(&self, error: FetchError) {
        *self.response.lock().unwrap() = Err(error);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str, backend: FetchBackend) -> Result<Vec<u8>, FetchError> {
        if !self.supports(backend) {
            return Err(FetchError::UnsupportedBackend(backend));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.response.lock().unwrap().clone()
    }

    fn supports(&self, backend: FetchBackend) -> bool {
        backend == FetchBackend::HtmlRequests
    }
}

/// SQLite store that counts commits and can be told to reject them.
pub struct CountingStore {
    inner: SqliteStorage,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
    fail_deletes: AtomicBool,
}

impl CountingStore {
    pub async fn new() -> Self {
        let inner = SqliteStorage::in_memory().expect("in-memory sqlite");
        inner.migrate().await.expect("migrate");
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_commits: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for CountingStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.inner.migrate().await
    }

    async fn insert_watch(&self, watch: &Watch) -> Result<(), StoreError> {
        self.inner.insert_watch(watch).await
    }

    async fn update_config(&self, id: &WatchId, config: &WatchConfig) -> Result<(), StoreError> {
        self.inner.update_config(id, config).await
    }

    async fn load_watches(&self) -> Result<Vec<Watch>, StoreError> {
        self.inner.load_watches().await
    }

    async fn load_last(&self, id: &WatchId) -> Result<Option<Snapshot>, StoreError> {
        self.inner.load_last(id).await
    }

    async fn commit(&self, id: &WatchId, commit: &CheckCommit) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.commit(id, commit).await?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_failure(&self, id: &WatchId, record: &FailureRecord) -> Result<(), StoreError> {
        self.inner.record_failure(id, record).await
    }

    async fn set_state(&self, id: &WatchId, state: WatchState) -> Result<(), StoreError> {
        self.inner.set_state(id, state).await
    }

    async fn delete(&self, id: &WatchId) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.delete(id).await
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.delete_all().await
    }
}

pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub monitor: Monitor,
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<CountingStore>,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Long tick: after the immediate first tick, only manual checks run.
pub fn quiet_options() -> SchedulerOptions {
    SchedulerOptions {
        tick: Duration::from_secs(3600),
        max_concurrent_checks: 4,
        settle_delay: Duration::ZERO,
    }
}

pub async fn harness(defaults: WatchDefaults, fetcher: ScriptedFetcher) -> Harness {
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(CountingStore::new().await);
    let (notifier, events) = RecordingNotifier::new();

    let monitor = Monitor::new(
        quiet_options(),
        defaults,
        fetcher.clone(),
        store.clone(),
        Arc::new(notifier),
    );

    Harness {
        monitor,
        fetcher,
        store,
        events,
    }
}

pub async fn next_report(rx: &mut broadcast::Receiver<CheckReport>, id: &WatchId) -> CheckReport {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(report) if &report.watch_id == id => return report,
                Ok(_) => continue,
                Err(e) => panic!("report channel failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a check report")
}

/// Skips `AlreadyRunning` reports.
pub async fn next_finished(rx: &mut broadcast::Receiver<CheckReport>, id: &WatchId) -> CheckOutcome {
    loop {
        let report = next_report(rx, id).await;
        if report.outcome != CheckOutcome::AlreadyRunning {
            return report.outcome;
        }
    }
}

/// Waits until `count` fetches have started, i.e. the checks are in flight.
pub async fn wait_for_fetches(fetcher: &ScriptedFetcher, count: usize) {
    timeout(WAIT, async {
        while fetcher.fetches() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for fetches to start")
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notifier dropped")
}
