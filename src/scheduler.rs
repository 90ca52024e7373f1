use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::models::{Target, WatchId};
use crate::pipeline::{CheckOutcome, CheckPipeline};
use crate::registry::{WatchRegistry, WatchSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Broadcast once per dispatch attempt, including skipped ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub watch_id: WatchId,
    pub trigger: Trigger,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub tick: Duration,
    pub max_concurrent_checks: usize,
    pub settle_delay: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            max_concurrent_checks: 4,
            settle_delay: Duration::ZERO,
        }
    }
}

/// Polls the registry for due watches and runs their checks on a bounded pool.
pub struct Scheduler {
    registry: Arc<WatchRegistry>,
    pipeline: Arc<CheckPipeline>,
    limiter: Arc<Semaphore>,
    options: SchedulerOptions,
    manual_rx: mpsc::UnboundedReceiver<Target>,
    reports: broadcast::Sender<CheckReport>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<WatchRegistry>,
        pipeline: Arc<CheckPipeline>,
        options: SchedulerOptions,
        manual_rx: mpsc::UnboundedReceiver<Target>,
        reports: broadcast::Sender<CheckReport>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            limiter: Arc::new(Semaphore::new(options.max_concurrent_checks.max(1))),
            options,
            manual_rx,
            reports,
            tasks: Vec::new(),
        }
    }

    /// Runs until `shutdown` flips to `true`, then waits for in-flight checks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler started: tick {:?}, up to {} concurrent checks",
            self.options.tick, self.options.max_concurrent_checks
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let due = self.registry.due(Utc::now());
                    if !due.is_empty() {
                        debug!("{} watches due", due.len());
                    }
                    for slot in due {
                        self.dispatch(slot, Trigger::Scheduled);
                    }
                }
                Some(target) = self.manual_rx.recv() => {
                    for slot in self.registry.select(&target) {
                        self.dispatch(slot, Trigger::Manual);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.tasks.retain(|task| !task.is_finished());
        }

        info!("Scheduler stopping, waiting for {} running checks", self.tasks.len());
        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                error!("Check task failed: {}", e);
            }
        }
    }

    fn dispatch(&mut self, slot: Arc<WatchSlot>, trigger: Trigger) {
        let Some(token) = slot.try_begin() else {
            debug!(watch_id = %slot.id(), "Check already in flight, skipping");
            let _ = self.reports.send(CheckReport {
                watch_id: slot.id().clone(),
                trigger,
                outcome: CheckOutcome::AlreadyRunning,
            });
            return;
        };

        let pipeline = Arc::clone(&self.pipeline);
        let limiter = Arc::clone(&self.limiter);
        let reports = self.reports.clone();
        let settle_delay = self.options.settle_delay;

        self.tasks.push(tokio::spawn(async move {
            // The token is held while queued for a permit, so the watch counts
            // as in flight from dispatch onwards.
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };

            let outcome = pipeline.run(&token).await;
            if !settle_delay.is_zero() {
                sleep(settle_delay).await;
            }

            let watch_id = token.slot().id().clone();
            drop(token);
            let _ = reports.send(CheckReport {
                watch_id,
                trigger,
                outcome,
            });
        }));
    }
}
