use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Snapshot, PREVIEW_CHARS};
use crate::config::{EffectiveConfig, WatchConfig, WatchDefaults};
use crate::differ::DiffVerdict;

// NewType pattern for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub String);

impl WatchId {
    pub fn generate() -> Self {
        WatchId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WatchId {
    fn from(value: &str) -> Self {
        WatchId(value.to_string())
    }
}

/// Selects a single watch or every registered watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One(WatchId),
    All,
}

impl Target {
    /// `"all"` selects everything, anything else is taken as a watch id.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("all") {
            Target::All
        } else {
            Target::One(WatchId(raw.trim().to_string()))
        }
    }
}

impl From<WatchId> for Target {
    fn from(id: WatchId) -> Self {
        Target::One(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    #[default]
    Unchecked,
    Viewed,
    Unviewed,
}

impl WatchState {
    pub fn key(&self) -> &'static str {
        match self {
            WatchState::Unchecked => "unchecked",
            WatchState::Viewed => "viewed",
            WatchState::Unviewed => "unviewed",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "unchecked" => Some(WatchState::Unchecked),
            "viewed" => Some(WatchState::Viewed),
            "unviewed" => Some(WatchState::Unviewed),
            _ => None,
        }
    }

    /// State after a check produced `verdict`.
    ///
    /// Only `Changed` moves the state, and always to `Unviewed`.
    pub fn after(self, verdict: DiffVerdict) -> WatchState {
        match verdict {
            DiffVerdict::Changed => WatchState::Unviewed,
            DiffVerdict::Baseline | DiffVerdict::Unchanged => self,
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Everything a successful check writes, committed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommit {
    pub snapshot: Snapshot,
    pub verdict: DiffVerdict,
    pub state: WatchState,
    pub checked_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
}

/// What a failed check writes: the error and the next slot, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub error: String,
    pub checked_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub id: WatchId,
    pub url: String,
    pub config: WatchConfig,
    pub last_snapshot: Option<Snapshot>,
    pub previous_snapshot: Option<Snapshot>,
    pub state: WatchState,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_due_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Watch {
    /// A freshly imported watch is due immediately.
    pub fn new(url: impl Into<String>, config: WatchConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: WatchId::generate(),
            url: url.into(),
            config,
            last_snapshot: None,
            previous_snapshot: None,
            state: WatchState::Unchecked,
            created_at: now,
            last_checked_at: None,
            next_due_at: now,
            last_error: None,
        }
    }

    pub fn effective_config(&self, defaults: &WatchDefaults) -> EffectiveConfig {
        defaults.resolve(&self.config)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due_at <= now
    }

    pub fn plan_success(
        &self,
        snapshot: Snapshot,
        verdict: DiffVerdict,
        now: DateTime<Utc>,
        config: &EffectiveConfig,
    ) -> CheckCommit {
        CheckCommit {
            snapshot,
            verdict,
            state: self.state.after(verdict),
            checked_at: now,
            next_due_at: now + config.check_interval(),
        }
    }

    pub fn plan_failure(
        &self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        config: &EffectiveConfig,
    ) -> FailureRecord {
        FailureRecord {
            error: error.into(),
            checked_at: now,
            next_due_at: now + config.check_interval(),
        }
    }

    /// Applies a commit that the store has already accepted.
    pub fn apply(&mut self, commit: CheckCommit) {
        self.previous_snapshot = self.last_snapshot.take();
        self.last_snapshot = Some(commit.snapshot);
        self.state = commit.state;
        self.last_checked_at = Some(commit.checked_at);
        self.next_due_at = commit.next_due_at;
        self.last_error = None;
    }

    pub fn apply_failure(&mut self, record: FailureRecord) {
        self.last_checked_at = Some(record.checked_at);
        self.next_due_at = record.next_due_at;
        self.last_error = Some(record.error);
    }

    /// State after the user has seen the current content. A watch that was
    /// never fetched stays unchecked.
    pub fn acknowledged_state(&self) -> WatchState {
        if self.last_snapshot.is_some() {
            WatchState::Viewed
        } else {
            self.state
        }
    }

    pub fn acknowledge(&mut self) {
        self.state = self.acknowledged_state();
    }

    pub fn status(&self) -> WatchStatus {
        WatchStatus {
            id: self.id.clone(),
            url: self.url.clone(),
            state: self.state,
            last_snapshot_preview: self
                .last_snapshot
                .as_ref()
                .map(|snapshot| snapshot.preview(PREVIEW_CHARS)),
            last_checked_at: self.last_checked_at,
            next_due_at: self.next_due_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view handed to callers of `get_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    pub id: WatchId,
    pub url: String,
    pub state: WatchState,
    pub last_snapshot_preview: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_due_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedText;

    fn snapshot(text: &str, at: DateTime<Utc>) -> Snapshot {
        Snapshot::new(NormalizedText::from(text), at)
    }

    #[test]
    fn changed_always_lands_on_unviewed() {
        for state in [WatchState::Unchecked, WatchState::Viewed, WatchState::Unviewed] {
            assert_eq!(state.after(DiffVerdict::Changed), WatchState::Unviewed);
        }
    }

    #[test]
    fn unchanged_and_baseline_keep_state() {
        for state in [WatchState::Unchecked, WatchState::Viewed, WatchState::Unviewed] {
            assert_eq!(state.after(DiffVerdict::Unchanged), state);
            assert_eq!(state.after(DiffVerdict::Baseline), state);
        }
    }

    #[test]
    fn apply_rotates_snapshots() {
        let now = Utc::now();
        let config = EffectiveConfig::default();
        let mut watch = Watch::new("https://example.com", WatchConfig::default(), now);

        let first = watch.plan_success(snapshot("one", now), DiffVerdict::Baseline, now, &config);
        watch.apply(first);
        assert!(watch.previous_snapshot.is_none());

        let later = now + chrono::Duration::minutes(1);
        let second = watch.plan_success(snapshot("two", later), DiffVerdict::Changed, later, &config);
        watch.apply(second);

        assert_eq!(watch.state, WatchState::Unviewed);
        assert_eq!(watch.previous_snapshot.as_ref().map(|s| s.text().as_str()), Some("one"));
        assert_eq!(watch.last_snapshot.as_ref().map(|s| s.text().as_str()), Some("two"));
        assert!(watch.previous_snapshot.as_ref().map(|s| s.fetched_at())
            <= watch.last_snapshot.as_ref().map(|s| s.fetched_at()));
        assert_eq!(watch.next_due_at, later + chrono::Duration::minutes(180));
    }

    #[test]
    fn failure_keeps_snapshots_and_state() {
        let now = Utc::now();
        let config = EffectiveConfig::default();
        let mut watch = Watch::new("https://example.com", WatchConfig::default(), now);
        let commit = watch.plan_success(snapshot("one", now), DiffVerdict::Baseline, now, &config);
        watch.apply(commit);
        let before = watch.clone();

        let later = now + chrono::Duration::minutes(3);
        let record = watch.plan_failure("timeout", later, &config);
        watch.apply_failure(record);

        assert_eq!(watch.last_snapshot, before.last_snapshot);
        assert_eq!(watch.state, before.state);
        assert_eq!(watch.last_error.as_deref(), Some("timeout"));
        assert!(watch.next_due_at > before.next_due_at);
    }

    #[test]
    fn acknowledge_requires_a_snapshot() {
        let now = Utc::now();
        let mut watch = Watch::new("https://example.com", WatchConfig::default(), now);
        watch.acknowledge();
        assert_eq!(watch.state, WatchState::Unchecked);

        watch.last_snapshot = Some(snapshot("one", now));
        watch.state = WatchState::Unviewed;
        watch.acknowledge();
        assert_eq!(watch.state, WatchState::Viewed);
    }

    #[test]
    fn status_preview_is_cut_to_preview_length() {
        let now = Utc::now();
        let mut watch = Watch::new("https://example.com", WatchConfig::default(), now);
        assert_eq!(watch.status().last_snapshot_preview, None);

        let long = "x".repeat(PREVIEW_CHARS + 50);
        watch.last_snapshot = Some(snapshot(&long, now));
        let preview = watch.status().last_snapshot_preview.unwrap();
        assert_eq!(preview, format!("{}...", "x".repeat(PREVIEW_CHARS)));

        watch.last_snapshot = Some(snapshot("short page", now));
        assert_eq!(watch.status().last_snapshot_preview.as_deref(), Some("short page"));
    }

    #[test]
    fn target_parses_all() {
        assert_eq!(Target::parse("all"), Target::All);
        assert_eq!(Target::parse("ALL "), Target::All);
        assert_eq!(Target::parse("abc"), Target::One(WatchId::from("abc")));
    }
}
