//! Change detection for watched web pages.
//!
//! A [`Monitor`] owns the watch registry and drives a [`scheduler::Scheduler`]
//! that fetches each due page, reduces it to normalized text and compares it
//! with the last snapshot. A change flips the watch to unviewed and sends one
//! notification.

pub mod config;
pub mod differ;
pub mod fetch;
pub mod models;
pub mod monitor;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use crate::config::{EffectiveConfig, FetchBackend, Settings, WatchConfig, WatchDefaults};
pub use crate::differ::{compare, DiffVerdict};
pub use crate::monitor::{ImportReport, Monitor, MonitorError, SchedulerHandle};
pub use crate::models::{NormalizedText, Snapshot, Target, Watch, WatchId, WatchState, WatchStatus};
pub use crate::normalizer::normalize;
pub use crate::pipeline::CheckOutcome;
pub use crate::scheduler::{CheckReport, SchedulerOptions, Trigger};
