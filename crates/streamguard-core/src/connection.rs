// ── Live connection runtime ──
//
// Wires a `StreamAdapter` into the resilience components: one dispatcher
// task routes adapter callbacks, one reconnection task at a time drives
// recovery, and a health-check task samples stability. Every task of a
// session hangs off a child `CancellationToken`, so `stop()` leaves no
// timer behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::adapter::{AdapterEvent, StreamAdapter};
use crate::breaker::CircuitBreaker;
use crate::config::{ConnectionConfig, EngineOptions};
use crate::degraded::{DegradedModeManager, EventPriority, Reconciler};
use crate::error::CoreError;
use crate::events::{DomainEvent, DomainEventBus, EventPayload, NotificationBus};
use crate::lock;
use crate::metrics::{MetricsService, Severity};
use crate::pipeline::{CommentProcessor, EventBatcher, EventBreakerHandle, parse_and_validate_comment};
use crate::reconnect::{
    ConnectionEventKind, CycleGuard, ReconnectVeto, ReconnectionManager, ReconnectionState,
    StabilityMetrics, classify_disconnect_reason,
};

/// Floor for waits on an open breaker, so a zero `retry_in` cannot spin.
const MIN_VETO_WAIT: Duration = Duration::from_millis(100);

/// A resilient connection to one live stream.
///
/// Cheap to clone; clones share the same engine.
pub struct LiveConnection<A: StreamAdapter> {
    inner: Arc<Shared<A>>,
}

impl<A: StreamAdapter> Clone for LiveConnection<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Shared<A> {
    adapter: A,
    metrics: Arc<MetricsService>,
    breaker: Arc<CircuitBreaker>,
    reconnect: Arc<ReconnectionManager>,
    degraded: Arc<DegradedModeManager>,
    events: Arc<DomainEventBus>,
    notifications: Arc<NotificationBus>,
    batcher: Arc<EventBatcher>,
    processor: CommentProcessor,
    health_check_interval: Duration,
    /// A disconnect arrived while a reconnection cycle owned the state.
    lost_during_cycle: AtomicBool,
    identifier: Mutex<Option<String>>,
    /// Lives as long as the engine; parent of every session token.
    cancel: CancellationToken,
    /// Cancelled on `stop()`, replaced on the next `start()`.
    session: Mutex<CancellationToken>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<A: StreamAdapter> LiveConnection<A> {
    /// Build an engine around `adapter`. Does NOT connect; call
    /// [`start`](Self::start).
    pub fn new(config: ConnectionConfig, options: EngineOptions, adapter: A) -> Self {
        Self::build(config, options, adapter, None)
    }

    /// Like [`new`](Self::new), with a custom reconciler for data missed
    /// while degraded.
    pub fn with_reconciler(
        config: ConnectionConfig,
        options: EngineOptions,
        adapter: A,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self::build(config, options, adapter, Some(reconciler))
    }

    fn build(
        config: ConnectionConfig,
        options: EngineOptions,
        adapter: A,
        reconciler: Option<Arc<dyn Reconciler>>,
    ) -> Self {
        let metrics = MetricsService::new();
        let events = Arc::new(DomainEventBus::new());
        let notifications = Arc::new(NotificationBus::new());

        let breaker = Arc::new(CircuitBreaker::new(
            config,
            options.breaker.clone(),
            Arc::clone(&metrics),
        ));
        let reconnect = ReconnectionManager::new(
            options.reconnect.clone(),
            Arc::clone(&notifications),
            Arc::clone(&metrics),
        );
        let degraded = Arc::new(match reconciler {
            Some(r) => DegradedModeManager::with_reconciler(
                Arc::clone(&notifications),
                Arc::clone(&metrics),
                r,
            ),
            None => DegradedModeManager::new(Arc::clone(&notifications), Arc::clone(&metrics)),
        });
        let batcher = EventBatcher::new(options.batch.clone(), Arc::clone(&events));
        let processor = CommentProcessor::new(
            Arc::clone(&metrics),
            Arc::clone(&breaker) as Arc<dyn EventBreakerHandle>,
            Arc::clone(&batcher),
        );

        let cancel = CancellationToken::new();
        let session = cancel.child_token();
        // Nothing runs until the first start().
        session.cancel();

        Self {
            inner: Arc::new(Shared {
                adapter,
                metrics,
                breaker,
                reconnect,
                degraded,
                events,
                notifications,
                batcher,
                processor,
                health_check_interval: options.health_check_interval,
                lost_during_cycle: AtomicBool::new(false),
                identifier: Mutex::new(None),
                cancel,
                session: Mutex::new(session),
                dispatcher: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect to the stream identified by `identifier` and start the
    /// background tasks.
    ///
    /// A retryable connect failure is not an error here: the engine
    /// enters degraded mode and reconnects on its own. Authentication
    /// failures and a second concurrent start are returned.
    pub async fn start(&self, identifier: &str) -> Result<(), CoreError> {
        let shared = &self.inner;
        shared
            .reconnect
            .transition(ReconnectionState::Connecting, "start requested")?;
        shared.ensure_dispatcher()?;

        let session = shared.cancel.child_token();
        *lock(&shared.session) = session.clone();
        *lock(&shared.identifier) = Some(identifier.to_owned());
        shared.reconnect.reset_attempts();

        {
            let mut tasks = lock(&shared.tasks);
            tasks.push(shared.batcher.start(session.clone()));
            tasks.push(tokio::spawn(health_check_task(
                Arc::clone(shared),
                session.clone(),
            )));
        }

        let correlation = shared.metrics.begin("connection.start");
        info!(identifier, correlation_id = %correlation.id(), "connecting to live stream");

        let adapter = &shared.adapter;
        let result = shared
            .breaker
            .execute("connect", move || adapter.connect(identifier))
            .instrument(correlation.span().clone())
            .await;

        match result {
            Ok(()) => {
                shared.on_connected("initial connect");
                Ok(())
            }
            Err(e) if !e.is_retryable() => {
                error!(error = %e, "initial connect failed permanently");
                shared.reconnect.transition_or_log(ReconnectionState::Disconnected, &e.to_string());
                session.cancel();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "initial connect failed, scheduling reconnection");
                shared.on_connection_lost(&e.to_string());
                Ok(())
            }
        }
    }

    /// Tear the session down: cancel every timer and task, disconnect
    /// the adapter, reconcile degraded buffers, and flush pending events.
    pub async fn stop(&self) {
        let shared = &self.inner;
        lock(&shared.session).cancel();
        shared
            .reconnect
            .transition_or_log(ReconnectionState::Disconnecting, "stop requested");

        if let Err(e) = shared.adapter.disconnect().await {
            warn!(error = %e, "adapter disconnect failed (non-fatal)");
        }

        let handles: Vec<_> = lock(&shared.tasks).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        shared.degraded.deactivate_degraded_mode();
        shared.batcher.flush();
        shared.reconnect.reset_attempts();
        shared
            .reconnect
            .transition_or_log(ReconnectionState::Disconnected, "stopped");
        debug!("live connection stopped");
    }

    /// [`stop`](Self::stop), then end the dispatcher. The engine cannot
    /// be restarted afterwards.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.cancel.cancel();
        let dispatcher = lock(&self.inner.dispatcher).take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<ReconnectionState> {
        self.inner.reconnect.watch_state()
    }

    pub fn current_state(&self) -> ReconnectionState {
        self.inner.reconnect.state()
    }

    pub fn events(&self) -> &Arc<DomainEventBus> {
        &self.inner.events
    }

    pub fn notifications(&self) -> &Arc<NotificationBus> {
        &self.inner.notifications
    }

    pub fn stability_metrics(&self) -> StabilityMetrics {
        self.inner.reconnect.get_connection_stability_metrics()
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.inner.metrics
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    pub fn degraded(&self) -> &Arc<DegradedModeManager> {
        &self.inner.degraded
    }

    pub fn reconnection(&self) -> &Arc<ReconnectionManager> {
        &self.inner.reconnect
    }

    /// Deliver buffered domain events now instead of at the next flush.
    pub fn flush(&self) -> usize {
        self.inner.batcher.flush()
    }
}

impl<A: StreamAdapter> std::fmt::Debug for LiveConnection<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("state", &self.current_state())
            .field("identifier", &*lock(&self.inner.identifier))
            .finish_non_exhaustive()
    }
}

// ── Shared engine ────────────────────────────────────────────────────

impl<A: StreamAdapter> Shared<A> {
    fn session_active(&self) -> bool {
        !lock(&self.session).is_cancelled()
    }

    fn session_token(&self) -> CancellationToken {
        lock(&self.session).clone()
    }

    fn identifier(&self) -> String {
        lock(&self.identifier).clone().unwrap_or_default()
    }

    fn emit(&self, correlation_id: uuid::Uuid, data: EventPayload) {
        self.batcher.push(DomainEvent::new(correlation_id, data));
    }

    fn ensure_dispatcher(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.is_some() {
            return Ok(());
        }
        let rx = self.adapter.take_events().ok_or_else(|| {
            CoreError::Internal("adapter event stream was already taken".into())
        })?;
        *dispatcher = Some(tokio::spawn(dispatch_task(
            Arc::clone(self),
            rx,
            self.cancel.clone(),
        )));
        Ok(())
    }

    fn handle_adapter_event(self: &Arc<Self>, event: AdapterEvent) {
        match event {
            AdapterEvent::Connected => {
                if !self.session_active() {
                    return;
                }
                let correlation = self.metrics.begin("adapter.connected");
                self.emit(
                    correlation.id(),
                    EventPayload::Connect {
                        identifier: self.identifier(),
                    },
                );
                // Connected without us asking: the adapter recovered on its own.
                if self.reconnect.state().is_down() && !self.reconnect.is_reconnecting() {
                    self.on_connected("adapter reconnected");
                }
            }
            AdapterEvent::Disconnected { reason } => {
                if self.session_active() {
                    self.on_connection_lost(&reason);
                }
            }
            AdapterEvent::Error { message } => {
                let correlation = self.metrics.begin("adapter.error");
                warn!(%message, correlation_id = %correlation.id(), "adapter reported an error");
                self.metrics.record_error("adapter", message.clone());
                self.emit(
                    correlation.id(),
                    EventPayload::Error { message, raw: None },
                );
            }
            AdapterEvent::Message {
                payload,
                received_at,
            } => self.handle_message(&payload, received_at),
        }
    }

    fn handle_message(&self, payload: &Value, received_at: chrono::DateTime<Utc>) {
        if !self.degraded.is_active() {
            self.processor.process_comment_event(payload, received_at);
            return;
        }
        // Live delivery is off while degraded; keep it for reconciliation.
        match parse_and_validate_comment(payload, received_at) {
            Some(comment) => {
                self.degraded.add_missed_comment(comment);
            }
            None => {
                self.degraded
                    .add_missed_event("message", payload.clone(), EventPriority::Normal);
            }
        }
    }

    fn on_connected(&self, reason: &str) {
        self.reconnect
            .transition_or_log(ReconnectionState::Connected, reason);
        self.reconnect
            .record_connection_event(ConnectionEventKind::Connect);
        self.degraded.deactivate_degraded_mode();
    }

    fn on_connection_lost(self: &Arc<Self>, reason: &str) {
        let classification = classify_disconnect_reason(reason);
        let correlation = self.metrics.begin("connection.lost");
        info!(
            reason,
            kind = %classification.kind,
            severity = %classification.severity,
            correlation_id = %correlation.id(),
            "connection lost"
        );

        self.reconnect
            .record_connection_event(ConnectionEventKind::Disconnect);
        self.emit(
            correlation.id(),
            EventPayload::Disconnect {
                reason: reason.to_owned(),
                classification: classification.clone(),
            },
        );

        // The running cycle owns the state; it re-checks this flag when done.
        if self.reconnect.is_reconnecting() {
            debug!(reason, "reconnection already in progress");
            self.lost_during_cycle.store(true, Ordering::Release);
            return;
        }

        self.reconnect
            .transition_or_log(ReconnectionState::Disconnected, reason);

        if !classification.requires_reconnection {
            self.metrics.alert(
                Severity::High,
                "live_connection",
                format!("not reconnecting: {} ({reason})", classification.description),
            );
            self.reconnect.give_up(reason);
            return;
        }

        if self.degraded.activate_degraded_mode(reason) {
            self.reconnect
                .transition_or_log(ReconnectionState::DegradedMode, reason);
        }
        self.spawn_reconnection(reason);
    }

    fn spawn_reconnection(self: &Arc<Self>, reason: &str) {
        let Some(guard) = self.reconnect.try_begin_cycle() else {
            debug!(reason, "reconnection already in progress");
            return;
        };
        let handle = tokio::spawn(reconnect_task(
            Arc::clone(self),
            guard,
            reason.to_owned(),
            self.session_token(),
        ));
        let mut tasks = lock(&self.tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn dispatch_task<A: StreamAdapter>(
    shared: Arc<Shared<A>>,
    mut rx: mpsc::Receiver<AdapterEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => shared.handle_adapter_event(event),
                None => {
                    debug!("adapter event stream closed");
                    break;
                }
            },
        }
    }
    debug!("dispatcher exiting");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Connected,
    GaveUp,
    Cancelled,
}

async fn reconnect_task<A: StreamAdapter>(
    shared: Arc<Shared<A>>,
    guard: CycleGuard,
    reason: String,
    cancel: CancellationToken,
) {
    let mut guard = guard;
    let mut reason = reason;
    loop {
        let outcome = run_cycle(&shared, &reason, &cancel).await;
        drop(guard);
        debug!(?outcome, "reconnection cycle finished");

        // A disconnect that raced the winning attempt found the slot taken.
        if outcome == CycleOutcome::Connected
            && !cancel.is_cancelled()
            && shared.lost_during_cycle.swap(false, Ordering::AcqRel)
        {
            if let Some(next) = shared.reconnect.try_begin_cycle() {
                guard = next;
                reason = "connection lost during reconnection".to_owned();
                shared
                    .reconnect
                    .transition_or_log(ReconnectionState::Disconnected, &reason);
                if shared.degraded.activate_degraded_mode(&reason) {
                    shared
                        .reconnect
                        .transition_or_log(ReconnectionState::DegradedMode, &reason);
                }
                continue;
            }
        }
        break;
    }
}

async fn run_cycle<A: StreamAdapter>(
    shared: &Arc<Shared<A>>,
    reason: &str,
    cancel: &CancellationToken,
) -> CycleOutcome {
    let adapter = &shared.adapter;
    let max_vetoes = shared.reconnect.policy().max_attempts;
    let mut fallback_vetoes: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let wait = match shared.reconnect.veto(&shared.breaker) {
            None => None,
            Some(ReconnectVeto::AttemptsExhausted { .. }) => {
                let err = shared.reconnect.mark_exhausted(reason);
                debug!(error = %err, "reconnection loop ending");
                return CycleOutcome::GaveUp;
            }
            Some(ReconnectVeto::CircuitOpen { retry_in }) => {
                debug!(?retry_in, "circuit open, waiting for probe window");
                Some(retry_in.max(MIN_VETO_WAIT))
            }
            Some(ReconnectVeto::FallbackActive) => {
                // Waiting on the fallback counts against the attempt budget.
                fallback_vetoes += 1;
                if fallback_vetoes > max_vetoes {
                    shared.reconnect.give_up("event fallback never cleared");
                    return CycleOutcome::GaveUp;
                }
                let correlation = shared.metrics.begin("reconnect.fallback");
                shared.emit(
                    correlation.id(),
                    EventPayload::Fallback {
                        active: true,
                        reason: "reconnection deferred while event fallback is active".into(),
                    },
                );
                Some(shared.reconnect.calculate_reconnection_delay(fallback_vetoes))
            }
        };
        if let Some(wait) = wait {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return CycleOutcome::Cancelled,
                () = tokio::time::sleep(wait) => continue,
            }
        }

        let attempt = shared.reconnect.start_reconnection_attempt(reason);
        let delay = shared.reconnect.calculate_reconnection_delay(attempt);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                shared.reconnect.end_reconnection_attempt(false, "cancelled");
                return CycleOutcome::Cancelled;
            }
            () = tokio::time::sleep(delay) => {}
        }

        let identifier = shared.identifier();
        let identifier = identifier.as_str();
        let correlation = shared.metrics.begin("reconnect.attempt");
        shared.lost_during_cycle.store(false, Ordering::Release);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                shared.reconnect.end_reconnection_attempt(false, "cancelled");
                return CycleOutcome::Cancelled;
            }
            result = shared
                .breaker
                .execute("connect", move || adapter.connect(identifier))
                .instrument(correlation.span().clone()) => result,
        };

        match result {
            Ok(()) => {
                shared
                    .reconnect
                    .end_reconnection_attempt(true, "reconnected");
                shared.on_connected("reconnected");
                return CycleOutcome::Connected;
            }
            Err(e) => {
                let message = e.to_string();
                shared.reconnect.end_reconnection_attempt(false, &message);
                if !e.is_retryable() && !e.is_circuit_open() {
                    error!(error = %e, "reconnection failed permanently");
                    shared.reconnect.give_up(&message);
                    return CycleOutcome::GaveUp;
                }
            }
        }
    }
}

async fn health_check_task<A: StreamAdapter>(shared: Arc<Shared<A>>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.health_check_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let stability = shared.reconnect.get_connection_stability_metrics();
                shared.metrics.record("stability.uptime_percentage", stability.uptime_percentage, []);
                shared.metrics.record("stability.score", stability.connection_stability_score, []);
                shared.metrics.record(
                    "stability.disconnect_frequency",
                    f64::from(stability.disconnect_frequency),
                    [],
                );
                debug!(
                    state = %shared.reconnect.state(),
                    score = stability.connection_stability_score,
                    "health check"
                );

                if !shared.degraded.is_active() && shared.degraded.pending_sync() > 0 {
                    shared.degraded.retry_sync();
                }
            }
        }
    }
}
