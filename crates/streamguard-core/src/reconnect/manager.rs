// ── Reconnection manager ──
//
// Owns the reconnection state, the attempt counters, and the bounded
// connection-event and cycle-duration logs. Decides whether an attempt
// may run (subordinate to the circuit breaker) and how long to wait
// before it; the actual connect call happens in the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::calculate_reconnection_delay;
use super::stability::{
    ConnectionEvent, ConnectionEventKind, ReconnectionCounts, StabilityMetrics,
    stability_metrics_at,
};
use super::state::ReconnectionState;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::ReconnectPolicy;
use crate::error::CoreError;
use crate::events::{Notification, NotificationBus};
use crate::lock;
use crate::metrics::{MetricsService, Severity};
use crate::ring::RingBuffer;

const DURATION_SAMPLE_CAPACITY: usize = 50;
const CONNECTION_EVENT_CAPACITY: usize = 100;

/// Why an attempt may not run right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReconnectVeto {
    /// The connection breaker is open; a probe is admitted after `retry_in`.
    CircuitOpen { retry_in: Duration },
    /// The per-event breaker raised the polling fallback.
    FallbackActive,
    /// The per-outage attempt cap was reached.
    AttemptsExhausted { attempts: u32, max: u32 },
}

#[derive(Debug)]
struct ManagerInner {
    /// Attempts in the current outage; reset on success.
    attempt: u32,
    consecutive_failures: u32,
    counts: ReconnectionCounts,
    cycle_started: Option<Instant>,
    durations: RingBuffer<Duration>,
    events: RingBuffer<ConnectionEvent>,
}

pub struct ReconnectionManager {
    policy: ReconnectPolicy,
    inner: Mutex<ManagerInner>,
    in_progress: AtomicBool,
    state: watch::Sender<ReconnectionState>,
    /// Serializes check-and-set on `state`. Never held while notifying.
    transition_lock: Mutex<()>,
    notifications: Arc<NotificationBus>,
    metrics: Arc<MetricsService>,
}

impl ReconnectionManager {
    pub fn new(
        policy: ReconnectPolicy,
        notifications: Arc<NotificationBus>,
        metrics: Arc<MetricsService>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ReconnectionState::Idle);
        Arc::new(Self {
            policy,
            inner: Mutex::new(ManagerInner {
                attempt: 0,
                consecutive_failures: 0,
                counts: ReconnectionCounts::default(),
                cycle_started: None,
                durations: RingBuffer::new(DURATION_SAMPLE_CAPACITY),
                events: RingBuffer::new(CONNECTION_EVENT_CAPACITY),
            }),
            in_progress: AtomicBool::new(false),
            state,
            transition_lock: Mutex::new(()),
            notifications,
            metrics,
        })
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn state(&self) -> ReconnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ReconnectionState> {
        self.state.subscribe()
    }

    /// Move to `to`, logging and notifying.
    ///
    /// A transition to the current state is a no-op. Illegal transitions
    /// are rejected with [`CoreError::InvalidTransition`] and leave the
    /// state untouched.
    pub fn transition(&self, to: ReconnectionState, reason: &str) -> Result<(), CoreError> {
        let from = {
            let _serial = lock(&self.transition_lock);
            let from = self.state();
            if from == to {
                return Ok(());
            }
            if !from.can_transition_to(to) {
                warn!(%from, %to, reason, "rejected reconnection state transition");
                return Err(CoreError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            self.state.send_replace(to);
            from
        };

        info!(%from, %to, reason, "reconnection state changed");
        self.metrics.increment(&format!("reconnection.state.{to}"), 1);
        // Outside the lock: listeners may transition again.
        self.notifications.emit(Notification::StateChanged {
            from,
            to,
            reason: reason.to_owned(),
        });
        Ok(())
    }

    /// [`transition`](Self::transition) for callers that only log.
    pub(crate) fn transition_or_log(&self, to: ReconnectionState, reason: &str) {
        if let Err(e) = self.transition(to, reason) {
            debug!(error = %e, "transition skipped");
        }
    }

    // ── Cycle guard ──────────────────────────────────────────────────

    /// Claim the single reconnection slot. `None` if a cycle is already
    /// running; the slot is released when the guard drops.
    pub fn try_begin_cycle(self: &Arc<Self>) -> Option<CycleGuard> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                manager: Arc::clone(self),
            })
    }

    pub fn is_reconnecting(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    // ── Admission ────────────────────────────────────────────────────

    pub fn can_attempt_reconnection(&self, breaker: &CircuitBreaker) -> bool {
        self.veto(breaker).is_none()
    }

    /// Why an attempt may not run, or `None` if it may.
    ///
    /// An open breaker always wins. A half-open breaker lets the attempt
    /// through so it becomes the probe.
    pub fn veto(&self, breaker: &CircuitBreaker) -> Option<ReconnectVeto> {
        match breaker.state() {
            CircuitState::Open => {
                return Some(ReconnectVeto::CircuitOpen {
                    retry_in: breaker.time_until_probe(),
                });
            }
            CircuitState::HalfOpen | CircuitState::Closed => {}
        }
        if breaker.is_fallback_active() {
            return Some(ReconnectVeto::FallbackActive);
        }
        let attempts = lock(&self.inner).attempt;
        if attempts >= self.policy.max_attempts {
            return Some(ReconnectVeto::AttemptsExhausted {
                attempts,
                max: self.policy.max_attempts,
            });
        }
        None
    }

    pub fn calculate_reconnection_delay(&self, attempt: u32) -> Duration {
        calculate_reconnection_delay(attempt, &self.policy)
    }

    // ── Cycle bracketing ─────────────────────────────────────────────

    /// Open one reconnection cycle. Returns the attempt number within
    /// the current outage (1-based).
    pub fn start_reconnection_attempt(&self, reason: &str) -> u32 {
        let attempt = {
            let mut inner = lock(&self.inner);
            inner.attempt += 1;
            inner.counts.total += 1;
            inner.cycle_started = Some(Instant::now());
            inner.attempt
        };

        info!(attempt, reason, "reconnection attempt started");
        self.metrics.increment("reconnection.attempts", 1);
        self.transition_or_log(ReconnectionState::Reconnecting, reason);
        self.notifications.emit(Notification::ReconnectionStarted {
            attempt,
            reason: reason.to_owned(),
            metrics: self.get_connection_stability_metrics(),
        });
        attempt
    }

    /// Close the cycle opened by [`start_reconnection_attempt`](Self::start_reconnection_attempt).
    pub fn end_reconnection_attempt(&self, success: bool, reason: &str) {
        let (attempt, duration, consecutive) = {
            let mut inner = lock(&self.inner);
            let duration = inner
                .cycle_started
                .take()
                .map_or(Duration::ZERO, |at| at.elapsed());
            inner.durations.push(duration);
            let attempt = inner.attempt;
            if success {
                inner.counts.successful += 1;
                inner.consecutive_failures = 0;
                inner.attempt = 0;
            } else {
                inner.counts.failed += 1;
                inner.consecutive_failures += 1;
            }
            (attempt, duration, inner.consecutive_failures)
        };

        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.metrics.record(
            "reconnection.duration_ms",
            duration.as_secs_f64() * 1000.0,
            [("success", success.to_string())],
        );

        if success {
            info!(attempt, duration_ms, "reconnection succeeded");
            self.transition_or_log(ReconnectionState::Connected, reason);
            self.notifications.emit(Notification::ReconnectionSucceeded {
                attempt,
                duration_ms,
                metrics: self.get_connection_stability_metrics(),
            });
            return;
        }

        warn!(attempt, consecutive, reason, "reconnection attempt failed");
        let threshold = self.policy.failure_alert_threshold.max(1);
        if consecutive % threshold == 0 {
            self.metrics.alert(
                Severity::High,
                "reconnection_manager",
                format!("{consecutive} consecutive reconnection failures (last: {reason})"),
            );
        }
        self.notifications.emit(Notification::ReconnectionFailed {
            attempt,
            reason: reason.to_owned(),
            consecutive_failures: consecutive,
            terminal: false,
        });
    }

    /// Give up on the current outage: RECONNECT_FAILED, then DISCONNECTED
    /// with no further automatic attempt pending.
    pub fn mark_exhausted(&self, reason: &str) -> CoreError {
        let attempts = self.attempt();
        error!(attempts, max = self.policy.max_attempts, reason, "reconnection attempts exhausted");
        self.give_up(reason);
        CoreError::ReconnectionExhausted {
            attempts,
            max: self.policy.max_attempts,
        }
    }

    /// Stop reconnecting for a reason retrying cannot fix.
    pub fn give_up(&self, reason: &str) {
        let (attempts, consecutive) = {
            let inner = lock(&self.inner);
            (inner.attempt, inner.consecutive_failures)
        };
        self.transition_or_log(ReconnectionState::ReconnectFailed, reason);
        self.transition_or_log(ReconnectionState::Disconnected, reason);
        self.metrics.alert(
            Severity::High,
            "reconnection_manager",
            format!("reconnection abandoned after {attempts} attempts: {reason}"),
        );
        self.notifications.emit(Notification::ReconnectionFailed {
            attempt: attempts,
            reason: reason.to_owned(),
            consecutive_failures: consecutive,
            terminal: true,
        });
    }

    /// Forget the current outage's attempt count (manual restart).
    pub fn reset_attempts(&self) {
        let mut inner = lock(&self.inner);
        inner.attempt = 0;
        inner.cycle_started = None;
    }

    pub fn attempt(&self) -> u32 {
        lock(&self.inner).attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.inner).consecutive_failures
    }

    // ── Stability ────────────────────────────────────────────────────

    pub fn record_connection_event(&self, kind: ConnectionEventKind) {
        lock(&self.inner).events.push(ConnectionEvent::new(kind));
        debug!(%kind, "connection event recorded");
    }

    pub fn connection_events(&self) -> Vec<ConnectionEvent> {
        lock(&self.inner).events.to_vec()
    }

    pub fn get_connection_stability_metrics(&self) -> StabilityMetrics {
        let inner = lock(&self.inner);
        stability_metrics_at(
            inner.events.iter(),
            inner.durations.iter(),
            inner.counts,
            Instant::now(),
        )
    }
}

impl std::fmt::Debug for ReconnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionManager")
            .field("state", &self.state())
            .field("in_progress", &self.is_reconnecting())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Holds the single reconnection slot.
#[derive(Debug)]
pub struct CycleGuard {
    manager: Arc<ReconnectionManager>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.manager.in_progress.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{BreakerPolicy, ConnectionConfig};

    fn manager() -> (Arc<ReconnectionManager>, Arc<NotificationBus>, Arc<MetricsService>) {
        let bus = Arc::new(NotificationBus::new());
        let metrics = MetricsService::new();
        let m = ReconnectionManager::new(
            ReconnectPolicy::default(),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        );
        (m, bus, metrics)
    }

    fn breaker(metrics: &Arc<MetricsService>) -> CircuitBreaker {
        let config = ConnectionConfig::new(
            Duration::from_secs(5),
            0,
            Duration::from_millis(100),
            crate::config::Credentials::Anonymous,
        )
        .unwrap();
        CircuitBreaker::new(config, BreakerPolicy::default(), Arc::clone(metrics))
    }

    fn names(bus: &NotificationBus) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on_event(move |n: &Notification| s.lock().unwrap().push(n.name()));
        seen
    }

    #[test]
    fn only_one_cycle_at_a_time() {
        let (m, _, _) = manager();
        let first = m.try_begin_cycle();
        assert!(first.is_some());
        assert!(m.try_begin_cycle().is_none());
        assert!(m.is_reconnecting());
        drop(first);
        assert!(!m.is_reconnecting());
        assert!(m.try_begin_cycle().is_some());
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let (m, _, _) = manager();
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let m = Arc::clone(&m);
                    scope.spawn(move || m.try_begin_cycle().map(std::mem::forget).is_some())
                })
                .collect();
            handles.into_iter().map(|h| usize::from(h.join().unwrap())).sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let (m, _, _) = manager();
        let err = m.transition(ReconnectionState::Connected, "test").unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(m.state(), ReconnectionState::Idle);
        assert!(m.transition(ReconnectionState::Idle, "noop").is_ok());
    }

    #[test]
    fn transitions_publish_state_changes() {
        let (m, bus, _) = manager();
        let seen = names(&bus);
        let mut rx = m.watch_state();
        m.transition(ReconnectionState::Connecting, "start").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ReconnectionState::Connecting);
        assert_eq!(*seen.lock().unwrap(), vec!["reconnection:state:changed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_vetoes_attempts() {
        let (m, _, metrics) = manager();
        let b = breaker(&metrics);
        assert!(m.can_attempt_reconnection(&b));

        b.force_open();
        assert!(matches!(m.veto(&b), Some(ReconnectVeto::CircuitOpen { .. })));

        // Probe window (timeout x2) elapses: half-open lets the attempt through.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(m.can_attempt_reconnection(&b));
    }

    #[test]
    fn fallback_vetoes_attempts() {
        let (m, _, metrics) = manager();
        let b = breaker(&metrics);
        for _ in 0..5 {
            b.events().record_failure();
        }
        assert_eq!(m.veto(&b), Some(ReconnectVeto::FallbackActive));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_cap_vetoes_until_success() {
        let (m, _, metrics) = manager();
        let b = breaker(&metrics);
        for _ in 0..10 {
            m.start_reconnection_attempt("network");
            m.end_reconnection_attempt(false, "network");
        }
        assert_eq!(
            m.veto(&b),
            Some(ReconnectVeto::AttemptsExhausted {
                attempts: 10,
                max: 10
            })
        );
        m.reset_attempts();
        assert!(m.can_attempt_reconnection(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn five_consecutive_failures_raise_high_alert() {
        let (m, _, metrics) = manager();
        for i in 1..=5 {
            m.start_reconnection_attempt("network");
            m.end_reconnection_attempt(false, "network");
            let expected = usize::from(i == 5);
            assert_eq!(metrics.alerts_at_least(Severity::High).len(), expected);
        }
        assert_eq!(m.consecutive_failures(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counters_and_connects() {
        let (m, bus, _) = manager();
        m.transition(ReconnectionState::Connecting, "start").unwrap();
        m.transition(ReconnectionState::Disconnected, "drop").unwrap();
        let seen = names(&bus);

        let attempt = m.start_reconnection_attempt("network");
        assert_eq!(attempt, 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        m.end_reconnection_attempt(true, "reconnected");

        assert_eq!(m.state(), ReconnectionState::Connected);
        assert_eq!(m.attempt(), 0);
        let stability = m.get_connection_stability_metrics();
        assert_eq!(stability.successful_reconnections, 1);
        assert!((stability.average_reconnection_time - 3000.0).abs() < 1e-6);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "reconnection:state:changed",
                "reconnection:started",
                "reconnection:state:changed",
                "reconnection:success",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_ends_disconnected() {
        let (m, bus, _) = manager();
        m.transition(ReconnectionState::Connecting, "start").unwrap();
        m.start_reconnection_attempt("network");
        m.end_reconnection_attempt(false, "network");
        let seen = names(&bus);

        let err = m.mark_exhausted("gave up");
        assert!(matches!(err, CoreError::ReconnectionExhausted { attempts: 1, .. }));
        assert_eq!(m.state(), ReconnectionState::Disconnected);
        assert_eq!(seen.lock().unwrap().last().copied(), Some("reconnection:failed"));
    }

    #[test]
    fn listener_may_transition_from_a_state_change() {
        let (m, bus, _) = manager();
        let weak = Arc::downgrade(&m);
        bus.on_event(move |n: &Notification| {
            if let Notification::StateChanged {
                to: ReconnectionState::Connecting,
                ..
            } = n
            {
                if let Some(m) = weak.upgrade() {
                    m.transition(ReconnectionState::Connected, "handshake done").unwrap();
                }
            }
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&m);
        std::thread::spawn(move || {
            worker.transition(ReconnectionState::Connecting, "start").unwrap();
            worker.transition(ReconnectionState::Disconnected, "drop").unwrap();
            done_tx.send(()).unwrap();
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("transition from inside a listener deadlocked");
        assert_eq!(m.state(), ReconnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_log_is_bounded() {
        let (m, _, _) = manager();
        for _ in 0..150 {
            m.record_connection_event(ConnectionEventKind::Connect);
        }
        assert_eq!(m.connection_events().len(), 100);
    }
}
