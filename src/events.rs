//! In-process event bus.
//!
//! Typed events fan out to subscriptions with at-least-once delivery and
//! per-subscription FIFO order. Each subscription owns a bounded buffer
//! (default 1024); on overflow the oldest event is dropped and the drop is
//! surfaced so the engine can record an `overflow` issue. Durable notifier
//! bindings count as permanent subscription equivalents for the pre-emit
//! predicate: with no subscription and no binding, nothing is emitted at
//! all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

use crate::catalog::{new_id, DurableBinding, Issue};

/// Default per-subscription buffer capacity.
pub const DEFAULT_BUFFER: usize = 1024;

/// Event kinds on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RunStarted,
    RunFinished,
    ScoreChanged,
    CatalogUpdated,
    IssueOpened,
    IssueClosed,
    JobStarted,
    JobFinished,
    SystemError,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RunStarted => "run-started",
            Self::RunFinished => "run-finished",
            Self::ScoreChanged => "score-changed",
            Self::CatalogUpdated => "catalog-updated",
            Self::IssueOpened => "issue-opened",
            Self::IssueClosed => "issue-closed",
            Self::JobStarted => "job-started",
            Self::JobFinished => "job-finished",
            Self::SystemError => "system-error",
        };
        write!(f, "{}", s)
    }
}

impl EventKind {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "run-started" => Self::RunStarted,
            "run-finished" => Self::RunFinished,
            "score-changed" => Self::ScoreChanged,
            "catalog-updated" => Self::CatalogUpdated,
            "issue-opened" => Self::IssueOpened,
            "issue-closed" => Self::IssueClosed,
            "job-started" => Self::JobStarted,
            "job-finished" => Self::JobFinished,
            "system-error" => Self::SystemError,
            _ => return None,
        })
    }
}

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Provider,
    Model,
    Run,
    Job,
    System,
}

/// The stable wire shape of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event-kind")]
    pub kind: EventKind,
    /// UTC, millisecond precision.
    #[serde(rename = "occurred-at")]
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "subject-kind")]
    pub subject_kind: SubjectKind,
    #[serde(rename = "subject-id")]
    pub subject_id: String,
    pub payload: Value,
}

impl Event {
    pub fn new(
        kind: EventKind,
        subject_kind: SubjectKind,
        subject_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        let occurred_at =
            DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            kind,
            occurred_at,
            subject_kind,
            subject_id: subject_id.into(),
            payload,
        }
    }

    pub fn run_started(model_id: &str, provider_id: &str) -> Self {
        Self::new(
            EventKind::RunStarted,
            SubjectKind::Model,
            model_id,
            json!({ "provider_id": provider_id }),
        )
    }

    pub fn run_finished(model_id: &str, run_id: &str, overall: Option<u8>) -> Self {
        Self::new(
            EventKind::RunFinished,
            SubjectKind::Run,
            run_id,
            json!({ "model_id": model_id, "overall": overall }),
        )
    }

    pub fn score_changed(
        model_id: &str,
        previous: u8,
        new: u8,
        changed_axes: &[&str],
    ) -> Self {
        Self::new(
            EventKind::ScoreChanged,
            SubjectKind::Model,
            model_id,
            json!({
                "previous": previous,
                "new": new,
                "changed_axes": changed_axes,
            }),
        )
    }

    pub fn catalog_updated(provider_id: &str, added: &[String], withdrawn: &[String]) -> Self {
        Self::new(
            EventKind::CatalogUpdated,
            SubjectKind::Provider,
            provider_id,
            json!({ "added": added, "withdrawn": withdrawn }),
        )
    }

    pub fn issue_opened(issue: &Issue) -> Self {
        Self::new(
            EventKind::IssueOpened,
            match issue.subject {
                crate::catalog::IssueSubject::Provider(_) => SubjectKind::Provider,
                crate::catalog::IssueSubject::Model(_) => SubjectKind::Model,
            },
            issue.subject.id(),
            json!({
                "issue_id": issue.id,
                "kind": issue.kind,
                "severity": issue.severity.as_str(),
                "description": issue.description,
            }),
        )
    }

    pub fn issue_closed(issue: &Issue) -> Self {
        Self::new(
            EventKind::IssueClosed,
            match issue.subject {
                crate::catalog::IssueSubject::Provider(_) => SubjectKind::Provider,
                crate::catalog::IssueSubject::Model(_) => SubjectKind::Model,
            },
            issue.subject.id(),
            json!({ "issue_id": issue.id, "kind": issue.kind }),
        )
    }

    pub fn job_started(job_id: &str) -> Self {
        Self::new(EventKind::JobStarted, SubjectKind::Job, job_id, json!({}))
    }

    pub fn job_finished(job_id: &str, runs: usize) -> Self {
        Self::new(
            EventKind::JobFinished,
            SubjectKind::Job,
            job_id,
            json!({ "runs": runs }),
        )
    }

    pub fn system_error(message: &str) -> Self {
        Self::new(
            EventKind::SystemError,
            SubjectKind::System,
            "system",
            json!({ "message": message }),
        )
    }
}

/// Per-subscription filter: event kinds and target ids. Empty dimensions
/// match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<BTreeSet<EventKind>>,
    /// Provider or model ids; matched against the subject id and the
    /// payload's `provider_id` / `model_id`.
    pub targets: Option<BTreeSet<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            targets: None,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(targets) = &self.targets {
            let payload_matches = ["provider_id", "model_id"].iter().any(|key| {
                event
                    .payload
                    .get(key)
                    .and_then(Value::as_str)
                    .map(|id| targets.contains(id))
                    .unwrap_or(false)
            });
            if !targets.contains(&event.subject_id) && !payload_matches {
                return false;
            }
        }
        true
    }
}

struct SubscriptionShared {
    id: String,
    filter: EventFilter,
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// A live subscription handle. Dropping it unregisters the subscription.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Receive the next event in FIFO order. Returns `None` once the
    /// subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            {
                let mut queue = self
                    .shared
                    .queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Event> {
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }

    /// Events dropped from this subscription's buffer so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }
}

/// An overflow notice produced by a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowNotice {
    pub subscription_id: String,
    pub total_dropped: u64,
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub overflows: Vec<OverflowNotice>,
}

/// The bus.
pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<SubscriptionShared>>>,
    durable: RwLock<Vec<DurableBinding>>,
    buffer_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            durable: RwLock::new(Vec::new()),
            buffer_capacity: buffer_capacity.max(1),
        }
    }

    /// Register a subscription with the given filter.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let shared = Arc::new(SubscriptionShared {
            id: new_id(),
            filter,
            capacity: self.buffer_capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        subs.push(shared.clone());
        Subscription { shared }
    }

    /// Register a durable notifier binding (configuration-time). The
    /// transport is external; the binding keeps emission alive even with
    /// no in-process subscription attached.
    pub fn register_durable(&self, binding: DurableBinding) {
        let mut durable = self.durable.write().unwrap_or_else(|e| e.into_inner());
        durable.retain(|b| b.id != binding.id);
        durable.push(binding);
    }

    pub fn unregister_durable(&self, binding_id: &str) {
        let mut durable = self.durable.write().unwrap_or_else(|e| e.into_inner());
        durable.retain(|b| b.id != binding_id);
    }

    /// The pre-emit predicate: false when the set of active subscriptions
    /// is empty and no durable notifier binding exists. The engine elides
    /// its emitting state entirely in that case.
    pub fn has_consumers(&self) -> bool {
        {
            let durable = self.durable.read().unwrap_or_else(|e| e.into_inner());
            if !durable.is_empty() {
                return true;
            }
        }
        let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        subs.iter().any(|s| !s.closed.load(Ordering::Acquire))
    }

    /// Fan an event out to every matching live subscription.
    pub fn publish(&self, event: Event) -> PublishOutcome {
        // Copy-on-write snapshot of the subscription list; closed
        // subscriptions are pruned here.
        let snapshot: Vec<Arc<SubscriptionShared>> = {
            let mut subs = self
                .subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner());
            subs.retain(|s| !s.closed.load(Ordering::Acquire));
            subs.clone()
        };

        let mut outcome = PublishOutcome::default();
        for sub in snapshot {
            if !sub.filter.matches(&event) {
                continue;
            }
            {
                let mut queue = sub.queue.lock().unwrap_or_else(|e| e.into_inner());
                if queue.len() >= sub.capacity {
                    queue.pop_front();
                    let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    outcome.overflows.push(OverflowNotice {
                        subscription_id: sub.id.clone(),
                        total_dropped: total,
                    });
                }
                queue.push_back(event.clone());
            }
            sub.notify.notify_one();
            outcome.delivered += 1;
        }
        outcome
    }

    /// Number of live subscriptions (tests and diagnostics).
    pub fn subscription_count(&self) -> usize {
        let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        subs.iter()
            .filter(|s| !s.closed.load(Ordering::Acquire))
            .count()
    }
}
