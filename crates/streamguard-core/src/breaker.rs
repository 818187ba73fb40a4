// ── Circuit breaker ──
//
// Guards the adapter's connect operation. Each `execute` call retries
// the operation locally with exponential backoff; the outcome of the
// call as a whole feeds a CLOSED / OPEN / HALF_OPEN state machine that
// stops invoking the dependency once it keeps failing.
//
// A second, much narrower breaker tracks per-event (comment) outcomes.
// It only raises a polling-fallback flag and never touches the
// connection circuit: a stream of malformed payloads is not a reason
// to stop connecting.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{BreakerPolicy, ConnectionConfig};
use crate::error::CoreError;
use crate::lock;
use crate::metrics::{MetricsService, Severity};
use crate::ring::RingBuffer;

const RETRY_JITTER: f64 = 0.1;
const RETRY_HISTORY_CAPACITY: usize = 256;

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
pub enum CircuitState {
    #[strum(serialize = "CLOSED")]
    #[serde(rename = "CLOSED")]
    Closed,
    #[strum(serialize = "OPEN")]
    #[serde(rename = "OPEN")]
    Open,
    #[strum(serialize = "HALF_OPEN")]
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitSignal {
    Success,
    Failure { consecutive: u32 },
    ProbeWindowElapsed,
    Reset,
    ForceOpen,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEffect {
    /// Entered OPEN from CLOSED.
    Tripped,
    /// A half-open trial failed.
    Reopened,
    /// OPEN → HALF_OPEN, one trial may run.
    ProbeAllowed,
    /// A half-open trial succeeded.
    Recovered,
}

impl CircuitState {
    /// The complete transition table.
    pub fn on(self, signal: CircuitSignal, failure_threshold: u32) -> (Self, Option<CircuitEffect>) {
        use CircuitSignal as S;
        match (self, signal) {
            (_, S::Reset) => (Self::Closed, None),
            (Self::Open, S::ForceOpen) => (Self::Open, None),
            (_, S::ForceOpen) => (Self::Open, Some(CircuitEffect::Tripped)),

            (Self::Closed, S::Failure { consecutive }) if consecutive >= failure_threshold => {
                (Self::Open, Some(CircuitEffect::Tripped))
            }
            (Self::Closed, S::Success | S::Failure { .. } | S::ProbeWindowElapsed) => {
                (Self::Closed, None)
            }

            (Self::Open, S::ProbeWindowElapsed) => (Self::HalfOpen, Some(CircuitEffect::ProbeAllowed)),
            // Late results from calls admitted before the trip change nothing.
            (Self::Open, S::Success | S::Failure { .. }) => (Self::Open, None),

            (Self::HalfOpen, S::Success) => (Self::Closed, Some(CircuitEffect::Recovered)),
            (Self::HalfOpen, S::Failure { .. }) => (Self::Open, Some(CircuitEffect::Reopened)),
            (Self::HalfOpen, S::ProbeWindowElapsed) => (Self::HalfOpen, None),
        }
    }
}

// ── Metrics & diagnostics ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Calls short-circuited while open. Included in `total_requests`.
    pub rejected_requests: u64,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state: CircuitState,
    pub state_changed_at: DateTime<Utc>,
}

impl CircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            consecutive_failures: 0,
            last_failure_time: None,
            last_success_time: None,
            state: CircuitState::Closed,
            state_changed_at: Utc::now(),
        }
    }
}

/// One failed try inside a single `execute` call.
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

// ── CircuitBreaker ───────────────────────────────────────────────────

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    retry_history: RingBuffer<RetryAttempt>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: ConnectionConfig,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
    events: EventBreaker,
    metrics: Arc<MetricsService>,
}

impl CircuitBreaker {
    pub fn new(config: ConnectionConfig, policy: BreakerPolicy, metrics: Arc<MetricsService>) -> Self {
        let events = EventBreaker::new(policy.event_failure_threshold, Arc::clone(&metrics));
        Self {
            config,
            policy,
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::new(),
                last_failure_at: None,
                probe_in_flight: false,
                retry_history: RingBuffer::new(RETRY_HISTORY_CAPACITY),
            }),
            events,
            metrics,
        }
    }

    /// How long the circuit stays open before a trial is allowed.
    pub fn probe_window(&self) -> Duration {
        self.config.timeout() * 2
    }

    /// Effective state, promoting OPEN to HALF_OPEN when the probe window
    /// has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = lock(&self.inner);
        self.promote_if_due(&mut inner);
        inner.metrics.state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        lock(&self.inner).metrics.clone()
    }

    pub fn retry_history(&self) -> Vec<RetryAttempt> {
        let mut inner = lock(&self.inner);
        self.prune_retry_history(&mut inner);
        inner.retry_history.to_vec()
    }

    /// Time left until a trial call is admitted. Zero unless open.
    pub fn time_until_probe(&self) -> Duration {
        let inner = lock(&self.inner);
        if inner.metrics.state != CircuitState::Open {
            return Duration::ZERO;
        }
        inner.last_failure_at.map_or(Duration::ZERO, |at| {
            (at + self.probe_window()).saturating_duration_since(Instant::now())
        })
    }

    /// Per-event sub-breaker.
    pub fn events(&self) -> &EventBreaker {
        &self.events
    }

    pub fn is_fallback_active(&self) -> bool {
        self.events.is_fallback_active()
    }

    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.metrics.consecutive_failures = 0;
        inner.last_failure_at = None;
        inner.probe_in_flight = false;
        self.apply(&mut inner, "manual", CircuitSignal::Reset);
    }

    pub fn force_open(&self) {
        let mut inner = lock(&self.inner);
        inner.last_failure_at = Some(Instant::now());
        inner.metrics.last_failure_time = Some(Utc::now());
        self.apply(&mut inner, "manual", CircuitSignal::ForceOpen);
    }

    /// Run `operation` under the breaker.
    ///
    /// Rejects immediately with [`CoreError::CircuitOpen`] while the
    /// circuit is open, without calling `operation`. Otherwise retries up
    /// to `retry_attempts` times (a half-open trial gets exactly one try)
    /// and returns the last error once retries are exhausted.
    pub async fn execute<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut admission = self.admit(name)?;
        let _correlation = self.metrics.begin(format!("breaker.{name}"));

        let max_tries = if admission.probe {
            1
        } else {
            self.config.retry_attempts() + 1
        };
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = match tokio::time::timeout(self.config.timeout(), operation()).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    timeout: self.config.timeout(),
                }),
            };
            self.metrics.record(
                "circuit_breaker.attempt_ms",
                started.elapsed().as_secs_f64() * 1000.0,
                [("name", name.to_owned()), ("ok", result.is_ok().to_string())],
            );

            match result {
                Ok(value) => {
                    admission.complete();
                    self.on_success(name);
                    return Ok(value);
                }
                Err(err) if attempt >= max_tries || !err.is_retryable() => {
                    admission.complete();
                    self.on_failure(name, &err);
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.retry_delay(attempt);
                    debug!(
                        name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying guarded operation"
                    );
                    self.push_retry(RetryAttempt {
                        attempt,
                        delay,
                        timestamp: Utc::now(),
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// `retry_delay × 2^(attempt-1)` plus up to 10% jitter, capped at the timeout.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.config.retry_delay().as_secs_f64() * 2.0_f64.powi(exp);
        let jittered = base * (1.0 + rand::random::<f64>() * RETRY_JITTER);
        Duration::from_secs_f64(jittered.min(self.config.timeout().as_secs_f64()))
    }

    // ── Internals ────────────────────────────────────────────────────

    fn admit(&self, name: &str) -> Result<Admission<'_>, CoreError> {
        let mut inner = lock(&self.inner);
        self.promote_if_due(&mut inner);
        inner.metrics.total_requests += 1;

        let probe = match inner.metrics.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.metrics.rejected_requests += 1;
                let retry_in = inner.last_failure_at.map_or(Duration::ZERO, |at| {
                    (at + self.probe_window()).saturating_duration_since(Instant::now())
                });
                drop(inner);
                self.metrics.increment("circuit_breaker.rejected", 1);
                debug!(name, ?retry_in, "circuit open, call rejected");
                return Err(CoreError::CircuitOpen {
                    name: name.to_owned(),
                    retry_in,
                });
            }
        };

        Ok(Admission {
            breaker: self,
            probe,
            armed: probe,
        })
    }

    fn on_success(&self, name: &str) {
        let mut inner = lock(&self.inner);
        inner.metrics.successful_requests += 1;
        inner.metrics.consecutive_failures = 0;
        inner.metrics.last_success_time = Some(Utc::now());
        inner.probe_in_flight = false;
        self.apply(&mut inner, name, CircuitSignal::Success);
        drop(inner);
        self.metrics.increment("circuit_breaker.success", 1);
    }

    fn on_failure(&self, name: &str, err: &CoreError) {
        let mut inner = lock(&self.inner);
        inner.metrics.failed_requests += 1;
        inner.metrics.consecutive_failures += 1;
        inner.metrics.last_failure_time = Some(Utc::now());
        inner.last_failure_at = Some(Instant::now());
        inner.probe_in_flight = false;
        let consecutive = inner.metrics.consecutive_failures;
        self.apply(&mut inner, name, CircuitSignal::Failure { consecutive });
        drop(inner);
        self.metrics.increment("circuit_breaker.failure", 1);
        self.metrics.record_error("circuit_breaker", format!("{name}: {err}"));
    }

    fn promote_if_due(&self, inner: &mut BreakerInner) {
        if inner.metrics.state != CircuitState::Open {
            return;
        }
        let due = inner
            .last_failure_at
            .is_none_or(|at| at.elapsed() >= self.probe_window());
        if due {
            self.apply(inner, "probe", CircuitSignal::ProbeWindowElapsed);
        }
    }

    fn apply(&self, inner: &mut BreakerInner, name: &str, signal: CircuitSignal) {
        let from = inner.metrics.state;
        let (to, effect) = from.on(signal, self.policy.failure_threshold);
        if from != to {
            inner.metrics.state = to;
            inner.metrics.state_changed_at = Utc::now();
            self.metrics.record(
                "circuit_breaker.state",
                state_gauge(to),
                [("from", from.to_string()), ("to", to.to_string())],
            );
        }

        match effect {
            Some(CircuitEffect::Tripped) => self.metrics.alert(
                Severity::High,
                "circuit_breaker",
                format!(
                    "circuit '{name}' opened after {} consecutive failures",
                    inner.metrics.consecutive_failures
                ),
            ),
            Some(CircuitEffect::Reopened) => self.metrics.alert(
                Severity::High,
                "circuit_breaker",
                format!("circuit '{name}' trial failed, reopening"),
            ),
            Some(CircuitEffect::ProbeAllowed) => info!(circuit = name, "circuit half-open, trial allowed"),
            Some(CircuitEffect::Recovered) => info!(circuit = name, "circuit closed after successful trial"),
            None if from != to => info!(circuit = name, %from, %to, "circuit state changed"),
            None => {}
        }
    }

    fn push_retry(&self, attempt: RetryAttempt) {
        let mut inner = lock(&self.inner);
        inner.retry_history.push(attempt);
        self.prune_retry_history(&mut inner);
    }

    fn prune_retry_history(&self, inner: &mut BreakerInner) {
        let window = chrono::Duration::from_std(self.policy.retry_history_window)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - window;
        inner.retry_history.retain(|r| r.timestamp >= cutoff);
    }

    fn release_probe(&self) {
        lock(&self.inner).probe_in_flight = false;
    }
}

fn state_gauge(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Open => 1.0,
    }
}

/// Ticket for one admitted call. Frees the half-open trial slot if the
/// call's future is dropped before it finishes.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    armed: bool,
}

impl Admission<'_> {
    fn complete(&mut self) {
        self.armed = false;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("half-open trial abandoned before completion");
            self.breaker.release_probe();
        }
    }
}

// ── Per-event sub-breaker ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventBreakerStats {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub fallback_active: bool,
}

#[derive(Debug)]
pub struct EventBreaker {
    threshold: u32,
    stats: Mutex<EventBreakerStats>,
    metrics: Arc<MetricsService>,
}

impl EventBreaker {
    pub fn new(threshold: u32, metrics: Arc<MetricsService>) -> Self {
        Self {
            threshold,
            stats: Mutex::new(EventBreakerStats::default()),
            metrics,
        }
    }

    /// Returns `Some(false)` when this success cleared the fallback flag.
    pub fn record_success(&self) -> Option<bool> {
        let mut stats = lock(&self.stats);
        stats.successes += 1;
        stats.consecutive_failures = 0;
        if stats.fallback_active {
            stats.fallback_active = false;
            drop(stats);
            info!("event processing recovered, polling fallback cleared");
            return Some(false);
        }
        None
    }

    /// Returns `Some(true)` when this failure raised the fallback flag.
    pub fn record_failure(&self) -> Option<bool> {
        let mut stats = lock(&self.stats);
        stats.failures += 1;
        stats.consecutive_failures += 1;
        if !stats.fallback_active && stats.consecutive_failures >= self.threshold {
            stats.fallback_active = true;
            let n = stats.consecutive_failures;
            drop(stats);
            self.metrics.alert(
                Severity::Medium,
                "event_breaker",
                format!("{n} consecutive event failures, switching to polling fallback"),
            );
            return Some(true);
        }
        None
    }

    pub fn is_fallback_active(&self) -> bool {
        lock(&self.stats).fallback_active
    }

    pub fn stats(&self) -> EventBreakerStats {
        lock(&self.stats).clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::Credentials;

    fn breaker(retry_attempts: u32) -> CircuitBreaker {
        let config = ConnectionConfig::new(
            Duration::from_secs(5),
            retry_attempts,
            Duration::from_millis(100),
            Credentials::Anonymous,
        )
        .unwrap();
        CircuitBreaker::new(config, BreakerPolicy::default(), MetricsService::new())
    }

    fn failure() -> CoreError {
        CoreError::ConnectionFailed {
            identifier: "alice".into(),
            reason: "connection reset".into(),
        }
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CoreError> {
        b.execute("connect", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(failure())
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CoreError> {
        b.execute("connect", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
    }

    #[test]
    fn transition_table_covers_documented_paths() {
        let t = 3;
        assert_eq!(
            CircuitState::Closed.on(CircuitSignal::Failure { consecutive: 2 }, t),
            (CircuitState::Closed, None)
        );
        assert_eq!(
            CircuitState::Closed.on(CircuitSignal::Failure { consecutive: 3 }, t),
            (CircuitState::Open, Some(CircuitEffect::Tripped))
        );
        assert_eq!(
            CircuitState::Open.on(CircuitSignal::ProbeWindowElapsed, t),
            (CircuitState::HalfOpen, Some(CircuitEffect::ProbeAllowed))
        );
        assert_eq!(
            CircuitState::HalfOpen.on(CircuitSignal::Success, t),
            (CircuitState::Closed, Some(CircuitEffect::Recovered))
        );
        assert_eq!(
            CircuitState::HalfOpen.on(CircuitSignal::Failure { consecutive: 4 }, t),
            (CircuitState::Open, Some(CircuitEffect::Reopened))
        );
        assert_eq!(
            CircuitState::Open.on(CircuitSignal::Success, t),
            (CircuitState::Open, None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_three_failures_and_short_circuits() {
        let b = breaker(0);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            assert!(fail(&b, &calls).await.is_err());
            assert_eq!(b.state(), CircuitState::Closed);
        }
        assert!(fail(&b, &calls).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = fail(&b, &calls).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "wrapped op must not run");

        let m = b.metrics();
        assert_eq!(m.total_requests, 4);
        assert_eq!(m.failed_requests, 3);
        assert_eq!(m.rejected_requests, 1);
        assert_eq!(b.metrics.alerts_at_least(Severity::High).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_opens_only_after_probe_window() {
        let b = breaker(0);
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.time_until_probe() > Duration::ZERO);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes_circuit() {
        let b = breaker(0);
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        tokio::time::advance(b.probe_window()).await;

        succeed(&b, &calls).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.metrics().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_without_retrying() {
        let b = breaker(3);
        let calls = AtomicU32::new(0);
        b.force_open();
        tokio::time::advance(b.probe_window()).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert!(fail(&b, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "trial gets exactly one try");
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_locally_then_returns_last_error() {
        let b = breaker(2);
        let calls = AtomicU32::new(0);

        let err = fail(&b, &calls).await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let history = b.retry_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt, 1);
        // A single call counts once toward the trip threshold.
        assert_eq!(b.metrics().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_not_retried() {
        let b = breaker(5);
        let calls = AtomicU32::new(0);
        let result = b
            .execute("connect", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CoreError::AuthenticationFailed {
                    message: "invalid session".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(CoreError::AuthenticationFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eventual_success_within_retries() {
        let b = breaker(3);
        let calls = AtomicU32::new(0);
        let value = b
            .execute("connect", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(failure())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(b.metrics().successful_requests, 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let b = breaker(0);
        let result = b
            .execute("connect", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[test]
    fn retry_delay_grows_and_is_capped_by_timeout() {
        let b = breaker(3);
        let d1 = b.retry_delay(1);
        let d3 = b.retry_delay(3);
        assert!(d1 >= Duration::from_millis(100) && d1 <= Duration::from_millis(110));
        assert!(d3 >= Duration::from_millis(400) && d3 <= Duration::from_millis(440));
        assert_eq!(b.retry_delay(30), Duration::from_secs(5));
    }

    #[test]
    fn event_breaker_raises_and_clears_fallback() {
        let events = EventBreaker::new(5, MetricsService::new());
        for _ in 0..4 {
            assert_eq!(events.record_failure(), None);
        }
        assert_eq!(events.record_failure(), Some(true));
        assert!(events.is_fallback_active());
        assert_eq!(events.record_failure(), None, "already active");

        assert_eq!(events.record_success(), Some(false));
        assert!(!events.is_fallback_active());
        assert_eq!(events.stats().failures, 6);
    }

    #[tokio::test]
    async fn event_failures_never_trip_connection_circuit() {
        let b = breaker(0);
        for _ in 0..20 {
            b.events().record_failure();
        }
        assert!(b.is_fallback_active());
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
