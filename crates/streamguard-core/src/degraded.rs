// ── Degraded mode ──
//
// While no live connection exists the engine advertises a reduced
// capability set, buffers whatever should have been delivered, and
// reconciles those buffers once the stream is back. Reconciliation
// failure keeps the buffers: losing missed events is worse than
// delivering them late.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::events::{Notification, NotificationBus};
use crate::lock;
use crate::metrics::{MetricsService, Severity};
use crate::pipeline::Comment;
use crate::ring::RingBuffer;

pub const AVAILABLE_CAPABILITIES: &[&str] = &[
    "comment-history",
    "cached-leaderboard",
    "offline-analytics",
    "user-management",
    "settings-access",
];

pub const UNAVAILABLE_CAPABILITIES: &[&str] = &[
    "live-comments",
    "live-gifts",
    "live-follows",
    "real-time-leaderboard",
    "live-chat-interaction",
];

const RECOVERY_HISTORY_CAPACITY: usize = 50;
const RECOVERY_SAMPLE_SIZE: usize = 10;
const RECOVERY_SAFETY_MARGIN: f64 = 1.2;
const MIN_RECOVERY_ESTIMATE: Duration = Duration::from_secs(10);
const MAX_RECOVERY_ESTIMATE: Duration = Duration::from_secs(300);
const DEFAULT_RECOVERY_ESTIMATE: Duration = Duration::from_secs(30);
const MAX_MISSED_COMMENTS: usize = 1000;
const MAX_MISSED_EVENTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedModeCapabilities {
    pub available: &'static [&'static str],
    pub unavailable: &'static [&'static str],
}

impl Default for DegradedModeCapabilities {
    fn default() -> Self {
        Self {
            available: AVAILABLE_CAPABILITIES,
            unavailable: UNAVAILABLE_CAPABILITIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissedEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub priority: EventPriority,
}

/// Everything missed during one (or, after a failed sync, several)
/// outages, grouped by type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncBatch {
    pub comments: Vec<Comment>,
    pub events: BTreeMap<String, Vec<MissedEvent>>,
    pub downtime_ms: u64,
}

impl SyncBatch {
    pub fn len(&self) -> usize {
        self.comments.len() + self.events.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    fn lowest_priority(&self) -> Option<EventPriority> {
        self.events.values().flatten().map(|e| e.priority).min()
    }

    /// Remove the oldest event among those with the lowest priority.
    fn evict_event(&mut self) -> bool {
        let victim = self
            .events
            .iter()
            .flat_map(|(kind, events)| {
                events
                    .iter()
                    .enumerate()
                    .map(move |(idx, e)| ((e.priority, e.timestamp), kind, idx))
            })
            .min_by_key(|(key, _, _)| *key)
            .map(|(_, kind, idx)| (kind.clone(), idx));
        let Some((kind, idx)) = victim else {
            return false;
        };
        if let Some(events) = self.events.get_mut(&kind) {
            events.remove(idx);
            if events.is_empty() {
                self.events.remove(&kind);
            }
        }
        true
    }

    /// Drop the oldest comments and the least important events until both
    /// limits hold. Returns the number of items dropped.
    fn enforce_limits(&mut self, limits: BufferLimits) -> usize {
        let mut dropped = 0;
        if self.comments.len() > limits.comments {
            let excess = self.comments.len() - limits.comments;
            self.comments.drain(..excess);
            dropped += excess;
        }
        while self.event_count() > limits.events && self.evict_event() {
            dropped += 1;
        }
        dropped
    }

    fn absorb(&mut self, older: SyncBatch) {
        let mut comments = older.comments;
        comments.append(&mut self.comments);
        self.comments = comments;
        for (kind, mut events) in older.events {
            let slot = self.events.entry(kind).or_default();
            events.append(slot);
            *slot = events;
        }
        self.downtime_ms += older.downtime_ms;
    }
}

/// Upper bounds on what an outage may buffer. Pending batches from
/// failed syncs count against the same limits once merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub comments: usize,
    pub events: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            comments: MAX_MISSED_COMMENTS,
            events: MAX_MISSED_EVENTS,
        }
    }
}

/// Delivers a [`SyncBatch`] to whoever needs the missed data.
pub trait Reconciler: Send + Sync {
    fn reconcile(&self, batch: &SyncBatch) -> Result<(), CoreError>;
}

/// Publishes the batch as a `degraded-mode:sync` notification.
#[derive(Debug)]
pub struct NotifyReconciler {
    notifications: Arc<NotificationBus>,
}

impl NotifyReconciler {
    pub fn new(notifications: Arc<NotificationBus>) -> Self {
        Self { notifications }
    }
}

impl Reconciler for NotifyReconciler {
    fn reconcile(&self, batch: &SyncBatch) -> Result<(), CoreError> {
        self.notifications
            .emit(Notification::DegradedSync(batch.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradedStatus {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub estimated_recovery_ms: Option<u64>,
    pub buffered: usize,
    /// Items held back by a failed reconciliation.
    pub pending_sync: usize,
}

#[derive(Debug, Default)]
struct DegradedState {
    active: bool,
    reason: Option<String>,
    activated_at: Option<DateTime<Utc>>,
    activated_instant: Option<Instant>,
    estimated_recovery: Option<Duration>,
    buffer: SyncBatch,
    pending: Option<SyncBatch>,
}

pub struct DegradedModeManager {
    state: Mutex<DegradedState>,
    recovery_history: Mutex<RingBuffer<Duration>>,
    notifications: Arc<NotificationBus>,
    reconciler: Arc<dyn Reconciler>,
    metrics: Arc<MetricsService>,
    limits: BufferLimits,
}

impl DegradedModeManager {
    /// Manager that reconciles by publishing on `notifications`.
    pub fn new(notifications: Arc<NotificationBus>, metrics: Arc<MetricsService>) -> Self {
        let reconciler = Arc::new(NotifyReconciler::new(Arc::clone(&notifications)));
        Self::with_reconciler(notifications, metrics, reconciler)
    }

    pub fn with_reconciler(
        notifications: Arc<NotificationBus>,
        metrics: Arc<MetricsService>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            state: Mutex::new(DegradedState::default()),
            recovery_history: Mutex::new(RingBuffer::new(RECOVERY_HISTORY_CAPACITY)),
            notifications,
            reconciler,
            metrics,
            limits: BufferLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: BufferLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub fn capabilities(&self) -> DegradedModeCapabilities {
        DegradedModeCapabilities::default()
    }

    /// Enter degraded mode. Returns `false` if it was already active.
    pub fn activate_degraded_mode(&self, reason: &str) -> bool {
        let estimate = self.estimate_recovery_time();
        {
            let mut state = lock(&self.state);
            if state.active {
                debug!(reason, "degraded mode already active");
                return false;
            }
            state.active = true;
            state.reason = Some(reason.to_owned());
            state.activated_at = Some(Utc::now());
            state.activated_instant = Some(Instant::now());
            state.estimated_recovery = Some(estimate);
        }

        self.metrics.increment("degraded_mode.activations", 1);
        self.metrics.alert(
            Severity::Medium,
            "degraded_mode",
            format!("degraded mode activated: {reason}"),
        );
        self.notifications.emit(Notification::DegradedActivated {
            reason: reason.to_owned(),
            estimated_recovery_ms: millis(estimate),
        });
        self.notifications
            .emit(Notification::DegradedCapabilities(self.capabilities()));
        true
    }

    /// Buffer a comment missed during the outage. Ignored while inactive.
    /// At capacity the oldest buffered comment makes room.
    pub fn add_missed_comment(&self, comment: Comment) -> bool {
        let dropped = {
            let mut state = lock(&self.state);
            if !state.active {
                return false;
            }
            state.buffer.comments.push(comment);
            state.buffer.enforce_limits(self.limits)
        };
        self.record_dropped(dropped);
        true
    }

    /// Buffer any other missed event under its type. Ignored while inactive.
    ///
    /// At capacity the oldest event of the lowest buffered priority is
    /// evicted. An event less important than everything buffered is
    /// dropped instead, and `false` is returned.
    pub fn add_missed_event(&self, kind: &str, data: Value, priority: EventPriority) -> bool {
        let (buffered, dropped) = 'buffer: {
            let mut state = lock(&self.state);
            if !state.active {
                return false;
            }
            let mut dropped = 0;
            if state.buffer.event_count() >= self.limits.events {
                let admit = state
                    .buffer
                    .lowest_priority()
                    .is_some_and(|lowest| lowest <= priority);
                if !admit {
                    debug!(kind, %priority, "missed-event buffer full, dropping event");
                    break 'buffer (false, 1);
                }
                state.buffer.evict_event();
                dropped = 1;
            }
            state
                .buffer
                .events
                .entry(kind.to_owned())
                .or_default()
                .push(MissedEvent {
                    kind: kind.to_owned(),
                    data,
                    timestamp: Utc::now(),
                    priority,
                });
            (true, dropped)
        };
        self.record_dropped(dropped);
        buffered
    }

    fn record_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.metrics.increment(
                "degraded_mode.dropped",
                u64::try_from(dropped).unwrap_or(u64::MAX),
            );
        }
    }

    /// Leave degraded mode and reconcile buffered data.
    ///
    /// Returns the downtime, or `None` if degraded mode was not active.
    pub fn deactivate_degraded_mode(&self) -> Option<Duration> {
        let (downtime, mut batch) = {
            let mut state = lock(&self.state);
            if !state.active {
                return None;
            }
            // Flip first: anything racing in from here on sees "inactive".
            state.active = false;
            let downtime = state
                .activated_instant
                .take()
                .map_or(Duration::ZERO, |at| at.elapsed());
            state.reason = None;
            state.activated_at = None;
            state.estimated_recovery = None;
            let batch = std::mem::take(&mut state.buffer);
            (downtime, batch)
        };

        lock(&self.recovery_history).push(downtime);
        batch.downtime_ms = millis(downtime);

        info!(
            downtime_ms = millis(downtime),
            buffered = batch.len(),
            "degraded mode deactivated"
        );
        self.metrics
            .record("degraded_mode.downtime_ms", downtime.as_secs_f64() * 1000.0, []);
        self.notifications.emit(Notification::DegradedDeactivated {
            downtime_ms: millis(downtime),
        });

        self.synchronize(batch);
        Some(downtime)
    }

    /// Retry a reconciliation that failed earlier. Returns whether
    /// nothing is left pending afterwards.
    pub fn retry_sync(&self) -> bool {
        let Some(batch) = lock(&self.state).pending.take() else {
            return true;
        };
        self.synchronize(batch)
    }

    pub fn pending_sync(&self) -> usize {
        lock(&self.state).pending.as_ref().map_or(0, SyncBatch::len)
    }

    pub fn status(&self) -> DegradedStatus {
        let state = lock(&self.state);
        DegradedStatus {
            active: state.active,
            reason: state.reason.clone(),
            activated_at: state.activated_at,
            estimated_recovery_ms: state.estimated_recovery.map(millis),
            buffered: state.buffer.len(),
            pending_sync: state.pending.as_ref().map_or(0, SyncBatch::len),
        }
    }

    /// Mean of the last ten recovery durations plus a 20% margin,
    /// clamped to 10s..=300s. 30s without history.
    pub fn estimate_recovery_time(&self) -> Duration {
        let history = lock(&self.recovery_history);
        let samples: Vec<Duration> = history.recent(RECOVERY_SAMPLE_SIZE).copied().collect();
        drop(history);

        if samples.is_empty() {
            return DEFAULT_RECOVERY_ESTIMATE;
        }
        let total: Duration = samples.iter().sum();
        let count = u32::try_from(samples.len()).unwrap_or(u32::MAX);
        let mean = total / count;
        mean.mul_f64(RECOVERY_SAFETY_MARGIN)
            .clamp(MIN_RECOVERY_ESTIMATE, MAX_RECOVERY_ESTIMATE)
    }

    fn synchronize(&self, mut batch: SyncBatch) -> bool {
        if let Some(older) = lock(&self.state).pending.take() {
            batch.absorb(older);
            let dropped = batch.enforce_limits(self.limits);
            if dropped > 0 {
                warn!(dropped, "pending sync over capacity, dropped oldest low-priority items");
                self.record_dropped(dropped);
            }
        }

        match self.reconciler.reconcile(&batch) {
            Ok(()) => {
                self.metrics
                    .increment("degraded_mode.synced", u64::try_from(batch.len()).unwrap_or(u64::MAX));
                true
            }
            Err(e) => {
                warn!(error = %e, buffered = batch.len(), "missed-event sync failed, keeping buffers");
                self.metrics
                    .record_error("degraded_mode", format!("sync failed: {e}"));
                lock(&self.state).pending = Some(batch);
                false
            }
        }
    }
}

impl std::fmt::Debug for DegradedModeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradedModeManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn comment(id: &str) -> Comment {
        Comment {
            id: id.into(),
            user_id: "u1".into(),
            username: "bob".into(),
            text: "hi".into(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
        }
    }

    fn collect_syncs(bus: &NotificationBus) -> Arc<Mutex<Vec<SyncBatch>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on_event(move |n: &Notification| {
            if let Notification::DegradedSync(batch) = n {
                s.lock().unwrap().push(batch.clone());
            }
        });
        seen
    }

    struct FlakyReconciler {
        fail: AtomicBool,
    }

    impl Reconciler for FlakyReconciler {
        fn reconcile(&self, _batch: &SyncBatch) -> Result<(), CoreError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(CoreError::SyncFailed {
                    message: "downstream unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn sync_carries_exactly_the_missed_comment() {
        let bus = Arc::new(NotificationBus::new());
        let syncs = collect_syncs(&bus);
        let manager = DegradedModeManager::new(Arc::clone(&bus), MetricsService::new());

        let x = comment("x");
        assert!(manager.activate_degraded_mode("stream ended"));
        assert!(manager.add_missed_comment(x.clone()));
        assert!(manager.deactivate_degraded_mode().is_some());

        let syncs = syncs.lock().unwrap();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].comments, vec![x]);
        assert_eq!(manager.status().buffered, 0);
        assert_eq!(manager.pending_sync(), 0);
    }

    #[test]
    fn activation_and_deactivation_are_idempotent() {
        let bus = Arc::new(NotificationBus::new());
        let manager = DegradedModeManager::new(Arc::clone(&bus), MetricsService::new());
        let names = Arc::new(Mutex::new(Vec::new()));
        let n = Arc::clone(&names);
        bus.on_event(move |e: &Notification| n.lock().unwrap().push(e.name()));

        assert!(manager.activate_degraded_mode("a"));
        assert!(!manager.activate_degraded_mode("b"));
        assert_eq!(manager.status().reason.as_deref(), Some("a"));
        assert!(manager.deactivate_degraded_mode().is_some());
        assert!(manager.deactivate_degraded_mode().is_none());

        assert_eq!(
            *names.lock().unwrap(),
            vec![
                "degraded-mode:activated",
                "degraded-mode:capabilities",
                "degraded-mode:deactivated",
                "degraded-mode:sync",
            ]
        );
    }

    #[test]
    fn buffers_only_while_active() {
        let manager =
            DegradedModeManager::new(Arc::new(NotificationBus::new()), MetricsService::new());
        assert!(!manager.add_missed_comment(comment("early")));
        assert!(!manager.add_missed_event("gift", json!({"id": 1}), EventPriority::High));

        manager.activate_degraded_mode("network");
        assert!(manager.add_missed_event("gift", json!({"id": 1}), EventPriority::High));
        assert!(manager.add_missed_event("follow", json!({"id": 2}), EventPriority::Low));
        assert_eq!(manager.status().buffered, 2);
    }

    #[test]
    fn failed_sync_keeps_buffers_until_retry() {
        let reconciler = Arc::new(FlakyReconciler {
            fail: AtomicBool::new(true),
        });
        let manager = DegradedModeManager::with_reconciler(
            Arc::new(NotificationBus::new()),
            MetricsService::new(),
            Arc::clone(&reconciler) as Arc<dyn Reconciler>,
        );

        manager.activate_degraded_mode("network");
        manager.add_missed_comment(comment("a"));
        manager.add_missed_event("gift", json!({"coins": 5}), EventPriority::Normal);
        manager.deactivate_degraded_mode();

        assert!(!manager.is_active());
        assert_eq!(manager.pending_sync(), 2);

        reconciler.fail.store(false, Ordering::SeqCst);
        assert!(manager.retry_sync());
        assert_eq!(manager.pending_sync(), 0);
    }

    #[test]
    fn pending_batch_merges_into_next_sync() {
        let reconciler = Arc::new(FlakyReconciler {
            fail: AtomicBool::new(true),
        });
        let manager = DegradedModeManager::with_reconciler(
            Arc::new(NotificationBus::new()),
            MetricsService::new(),
            Arc::clone(&reconciler) as Arc<dyn Reconciler>,
        );

        manager.activate_degraded_mode("first");
        manager.add_missed_comment(comment("a"));
        manager.deactivate_degraded_mode();

        manager.activate_degraded_mode("second");
        manager.add_missed_comment(comment("b"));
        manager.deactivate_degraded_mode();
        assert_eq!(manager.pending_sync(), 2);
    }

    #[test]
    fn comment_buffer_keeps_the_newest_at_capacity() {
        let bus = Arc::new(NotificationBus::new());
        let syncs = collect_syncs(&bus);
        let metrics = MetricsService::new();
        let manager = DegradedModeManager::new(Arc::clone(&bus), Arc::clone(&metrics)).with_limits(
            BufferLimits {
                comments: 3,
                events: 10,
            },
        );

        manager.activate_degraded_mode("network");
        for id in ["a", "b", "c", "d", "e"] {
            assert!(manager.add_missed_comment(comment(id)));
        }
        assert_eq!(manager.status().buffered, 3);
        manager.deactivate_degraded_mode();

        let syncs = syncs.lock().unwrap();
        let ids: Vec<&str> = syncs[0].comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "e"]);
        assert_eq!(metrics.counter("degraded_mode.dropped"), 2);
    }

    #[test]
    fn full_event_buffer_evicts_lowest_priority_first() {
        let bus = Arc::new(NotificationBus::new());
        let syncs = collect_syncs(&bus);
        let manager = DegradedModeManager::new(Arc::clone(&bus), MetricsService::new()).with_limits(
            BufferLimits {
                comments: 10,
                events: 2,
            },
        );

        manager.activate_degraded_mode("network");
        assert!(manager.add_missed_event("follow", json!({"id": 1}), EventPriority::Low));
        assert!(manager.add_missed_event("gift", json!({"id": 2}), EventPriority::High));
        // Evicts the low-priority follow.
        assert!(manager.add_missed_event("share", json!({"id": 3}), EventPriority::Normal));
        // Less important than anything buffered: rejected.
        assert!(!manager.add_missed_event("like", json!({"id": 4}), EventPriority::Low));
        assert_eq!(manager.status().buffered, 2);
        manager.deactivate_degraded_mode();

        let syncs = syncs.lock().unwrap();
        let kinds: Vec<&str> = syncs[0].events.keys().map(String::as_str).collect();
        assert_eq!(kinds, vec!["gift", "share"]);
    }

    #[test]
    fn merged_pending_batch_respects_limits() {
        let reconciler = Arc::new(FlakyReconciler {
            fail: AtomicBool::new(true),
        });
        let manager = DegradedModeManager::with_reconciler(
            Arc::new(NotificationBus::new()),
            MetricsService::new(),
            Arc::clone(&reconciler) as Arc<dyn Reconciler>,
        )
        .with_limits(BufferLimits {
            comments: 2,
            events: 1,
        });

        manager.activate_degraded_mode("first");
        manager.add_missed_comment(comment("a"));
        manager.add_missed_comment(comment("b"));
        manager.add_missed_event("follow", json!({}), EventPriority::Low);
        manager.deactivate_degraded_mode();

        manager.activate_degraded_mode("second");
        manager.add_missed_comment(comment("c"));
        manager.add_missed_event("gift", json!({}), EventPriority::High);
        manager.deactivate_degraded_mode();

        assert_eq!(manager.pending_sync(), 3);
        let state = manager.state.lock().unwrap();
        let pending = state.pending.as_ref().unwrap();
        let ids: Vec<&str> = pending.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(pending.events.contains_key("gift"));
        assert!(!pending.events.contains_key("follow"));
    }

    #[test]
    fn recovery_estimate_defaults_to_thirty_seconds() {
        let manager =
            DegradedModeManager::new(Arc::new(NotificationBus::new()), MetricsService::new());
        assert_eq!(manager.estimate_recovery_time(), Duration::from_secs(30));
    }

    #[test]
    fn recovery_estimate_uses_recent_history_with_margin() {
        let manager =
            DegradedModeManager::new(Arc::new(NotificationBus::new()), MetricsService::new());
        {
            let mut history = manager.recovery_history.lock().unwrap();
            // Older samples fall out of the ten-sample window.
            for _ in 0..5 {
                history.push(Duration::from_secs(1000));
            }
            for _ in 0..10 {
                history.push(Duration::from_secs(50));
            }
        }
        assert_eq!(manager.estimate_recovery_time(), Duration::from_secs(60));

        {
            let mut history = manager.recovery_history.lock().unwrap();
            history.clear();
            history.push(Duration::from_secs(1));
        }
        assert_eq!(manager.estimate_recovery_time(), Duration::from_secs(10));

        {
            let mut history = manager.recovery_history.lock().unwrap();
            history.push(Duration::from_secs(3600));
        }
        assert_eq!(manager.estimate_recovery_time(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn downtime_is_measured_and_recorded() {
        let manager =
            DegradedModeManager::new(Arc::new(NotificationBus::new()), MetricsService::new());
        manager.activate_degraded_mode("maintenance");
        tokio::time::advance(Duration::from_secs(20)).await;
        let downtime = manager.deactivate_degraded_mode().unwrap();
        assert_eq!(downtime, Duration::from_secs(20));
        assert_eq!(manager.estimate_recovery_time(), Duration::from_secs(24));
    }
}
