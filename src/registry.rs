//! Process-wide set of watch records.
//!
//! Every watch lives in its own [`WatchSlot`]: a mutex over the record plus an
//! in-flight flag. A check must hold the slot's [`CheckToken`], so at most one
//! check per watch runs at a time while different watches never contend.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};

use crate::models::{Target, Watch, WatchId};

pub struct WatchSlot {
    id: WatchId,
    url: String,
    watch: Mutex<Watch>,
    in_flight: AtomicBool,
    deleted: AtomicBool,
}

impl WatchSlot {
    fn new(watch: Watch) -> Self {
        Self {
            id: watch.id.clone(),
            url: watch.url.clone(),
            watch: Mutex::new(watch),
            in_flight: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &WatchId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn lock(&self) -> MutexGuard<'_, Watch> {
        self.watch.lock().await
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Only meaningful while holding the record lock.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Must be called with the record lock held so a concurrent commit either
    /// lands before the flag or observes it.
    pub(crate) fn mark_deleted(&self, _guard: &MutexGuard<'_, Watch>) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Claims the right to run a check. `None` while another check holds it.
    pub fn try_begin(self: &Arc<Self>) -> Option<CheckToken> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CheckToken { slot: Arc::clone(self) })
    }
}

/// Proof of exclusive check rights on one watch; released on drop.
pub struct CheckToken {
    slot: Arc<WatchSlot>,
}

impl CheckToken {
    pub fn slot(&self) -> &Arc<WatchSlot> {
        &self.slot
    }
}

impl Drop for CheckToken {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct WatchRegistry {
    slots: RwLock<HashMap<WatchId, Arc<WatchSlot>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, watch: Watch) -> Arc<WatchSlot> {
        let slot = Arc::new(WatchSlot::new(watch));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.id.clone(), Arc::clone(&slot));
        slot
    }

    pub fn get(&self, id: &WatchId) -> Option<Arc<WatchSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &WatchId) -> Option<Arc<WatchSlot>> {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|slot| slot.url == url)
    }

    /// Slots ordered by id so bulk operations run in a stable order.
    pub fn all(&self) -> Vec<Arc<WatchSlot>> {
        let mut slots: Vec<_> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots
    }

    pub fn select(&self, target: &Target) -> Vec<Arc<WatchSlot>> {
        match target {
            Target::One(id) => self.get(id).into_iter().collect(),
            Target::All => self.all(),
        }
    }

    /// Watches whose `next_due_at <= now` that are not already being checked.
    ///
    /// A record that is momentarily locked (commit or acknowledgement in
    /// progress) is left for the next tick.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Arc<WatchSlot>> {
        self.all()
            .into_iter()
            .filter(|slot| !slot.is_in_flight())
            .filter(|slot| match slot.watch.try_lock() {
                Ok(watch) => watch.is_due(now),
                Err(_) => false,
            })
            .collect()
    }
}
