// ── Per-event processing ──
//
// Ingestion boundary for raw message callbacks: parse, measure latency,
// emit a domain event, and feed the per-event sub-breaker. Nothing that
// goes wrong here is allowed to leave this function as an error; it
// becomes an `error` domain event instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::batcher::EventBatcher;
use super::comment::{Comment, sanitize_comment};
use super::parser::parse_and_validate_comment;
use crate::breaker::EventBreaker;
use crate::events::{DomainEvent, EventPayload};
use crate::metrics::{MetricsService, Severity};

/// End-to-end latency above which a high-severity alert is raised.
pub const LATENCY_TARGET: Duration = Duration::from_millis(2000);

pub struct CommentProcessor {
    metrics: Arc<MetricsService>,
    breaker: Arc<dyn EventBreakerHandle>,
    sink: Arc<EventBatcher>,
}

/// Whatever owns the per-event sub-breaker; usually the connection
/// [`CircuitBreaker`](crate::breaker::CircuitBreaker).
pub trait EventBreakerHandle: Send + Sync {
    fn event_breaker(&self) -> &EventBreaker;
}

impl EventBreakerHandle for crate::breaker::CircuitBreaker {
    fn event_breaker(&self) -> &EventBreaker {
        self.events()
    }
}

impl EventBreakerHandle for EventBreaker {
    fn event_breaker(&self) -> &EventBreaker {
        self
    }
}

impl CommentProcessor {
    pub fn new(
        metrics: Arc<MetricsService>,
        breaker: Arc<dyn EventBreakerHandle>,
        sink: Arc<EventBatcher>,
    ) -> Self {
        Self {
            metrics,
            breaker,
            sink,
        }
    }

    /// Process one raw message received at `received_at`.
    ///
    /// Returns the emitted comment, or `None` when the payload was
    /// rejected (an `error` event is emitted instead).
    pub fn process_comment_event(&self, raw: &Value, received_at: DateTime<Utc>) -> Option<Comment> {
        let correlation = self.metrics.begin("comment.process");
        let correlation_id = correlation.id();

        let Some(comment) = parse_and_validate_comment(raw, received_at) else {
            self.reject(raw, correlation_id);
            return None;
        };
        let comment = sanitize_comment(&comment);

        let latency = (Utc::now() - received_at).to_std().unwrap_or_default();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.metrics.record(
            "comment.latency_ms",
            latency_ms,
            [("session", comment.session_id.clone())],
        );
        self.metrics.increment("comments.processed", 1);

        if latency > LATENCY_TARGET {
            self.metrics.alert(
                Severity::High,
                "comment_processor",
                format!(
                    "comment {} took {latency_ms:.0}ms end-to-end (target {}ms)",
                    comment.id,
                    LATENCY_TARGET.as_millis()
                ),
            );
        }

        self.sink.push(
            DomainEvent::new(correlation_id, EventPayload::Comment(comment.clone())).with_latency(latency),
        );

        if let Some(active) = self.breaker.event_breaker().record_success() {
            self.emit_fallback(active, "event processing recovered", correlation_id);
        }

        debug!(comment_id = %comment.id, latency_ms, "comment processed");
        Some(comment)
    }

    fn reject(&self, raw: &Value, correlation_id: uuid::Uuid) {
        self.metrics.increment("comments.rejected", 1);
        self.metrics
            .record_error("comment_processor", "comment payload failed validation");
        warn!(%correlation_id, "rejected malformed comment payload");

        self.sink.push(DomainEvent::new(
            correlation_id,
            EventPayload::Error {
                message: "invalid comment payload".into(),
                raw: Some(raw.clone()),
            },
        ));

        if let Some(active) = self.breaker.event_breaker().record_failure() {
            self.emit_fallback(active, "repeated comment validation failures", correlation_id);
        }
    }

    fn emit_fallback(&self, active: bool, reason: &str, correlation_id: uuid::Uuid) {
        self.sink.push(DomainEvent::new(
            correlation_id,
            EventPayload::Fallback {
                active,
                reason: reason.to_owned(),
            },
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::config::BatchPolicy;
    use crate::events::{DomainEventBus, EventKind};

    struct Harness {
        metrics: Arc<MetricsService>,
        breaker: Arc<EventBreaker>,
        batcher: Arc<EventBatcher>,
        seen: Arc<Mutex<Vec<DomainEvent>>>,
        processor: CommentProcessor,
    }

    fn harness() -> Harness {
        let metrics = MetricsService::new();
        let bus = Arc::new(DomainEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on_event(move |e: &DomainEvent| s.lock().unwrap().push(e.clone()));

        let batcher = EventBatcher::new(BatchPolicy::default(), bus);
        let breaker = Arc::new(EventBreaker::new(5, Arc::clone(&metrics)));
        let processor = CommentProcessor::new(
            Arc::clone(&metrics),
            Arc::clone(&breaker) as Arc<dyn EventBreakerHandle>,
            Arc::clone(&batcher),
        );
        Harness {
            metrics,
            breaker,
            batcher,
            seen,
            processor,
        }
    }

    fn valid(id: &str) -> Value {
        json!({"id": id, "userId": "u1", "username": "bob", "text": "hi"})
    }

    #[test]
    fn emits_comment_with_latency() {
        let h = harness();
        let received = Utc::now() - chrono::Duration::milliseconds(150);
        let comment = h.processor.process_comment_event(&valid("c1"), received).unwrap();
        h.batcher.flush();

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), EventKind::Comment);
        assert_eq!(seen[0].comment().unwrap(), &comment);
        assert!(seen[0].latency.unwrap() >= Duration::from_millis(150));
        assert!(h.metrics.alerts().is_empty());
    }

    #[test]
    fn slow_comment_raises_high_alert() {
        let h = harness();
        let received = Utc::now() - chrono::Duration::milliseconds(2500);
        h.processor.process_comment_event(&valid("c1"), received);
        assert_eq!(h.metrics.alerts_at_least(Severity::High).len(), 1);
    }

    #[test]
    fn rejection_emits_error_event() {
        let h = harness();
        assert!(h.processor.process_comment_event(&json!(null), Utc::now()).is_none());
        h.batcher.flush();

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), EventKind::Error);
        assert_eq!(h.breaker.stats().failures, 1);
    }

    #[test]
    fn five_failures_raise_fallback_and_success_clears_it() {
        let h = harness();
        for _ in 0..5 {
            h.processor.process_comment_event(&json!({"bogus": true}), Utc::now());
        }
        assert!(h.breaker.is_fallback_active());

        h.processor.process_comment_event(&valid("c9"), Utc::now());
        assert!(!h.breaker.is_fallback_active());

        h.batcher.flush();
        let kinds: Vec<_> = h.seen.lock().unwrap().iter().map(DomainEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Error,
                EventKind::Error,
                EventKind::Error,
                EventKind::Error,
                EventKind::Error,
                EventKind::Fallback,
                EventKind::Comment,
                EventKind::Fallback,
            ]
        );
    }

    #[test]
    fn phone_numbers_are_masked_before_emission() {
        let h = harness();
        let raw = json!({"id": "c1", "userId": "u1", "username": "bob", "text": "text 555-123-4567"});
        let comment = h.processor.process_comment_event(&raw, Utc::now()).unwrap();
        assert_eq!(comment.text, "text ***-***-****");
    }
}
