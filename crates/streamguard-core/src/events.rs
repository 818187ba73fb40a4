// ── Event fan-out ──
//
// Downstream consumers either register synchronous listeners (and get a
// `ListenerId` back to unregister with) or take a broadcast receiver for
// async consumption. Two buses exist: one for domain events, one for
// lifecycle notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::degraded::{DegradedModeCapabilities, SyncBatch};
use crate::pipeline::Comment;
use crate::reconnect::{DisconnectClassification, ReconnectionState, StabilityMetrics};

const BUS_CHANNEL_CAPACITY: usize = 1024;

// ── EventBus ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Listener registry plus a broadcast channel.
///
/// Listeners run synchronously on the emitting task, in registration
/// order. A panicking listener is logged and skipped; it never reaches
/// the emitter.
pub struct EventBus<T> {
    listeners: DashMap<ListenerId, Listener<T>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> EventBus<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    pub fn on_event(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Returns `false` if the id was unknown (or already removed).
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Async consumers. Slow receivers see `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&self, event: T) {
        self.emit_shared(Arc::new(event));
    }

    pub fn emit_shared(&self, event: Arc<T>) {
        // Snapshot first: a listener may unregister itself mid-dispatch.
        let mut listeners: Vec<(ListenerId, Listener<T>)> = self
            .listeners
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();
        listeners.sort_by_key(|(id, _)| *id);

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(listener = id.0, "event listener panicked");
            }
        }

        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

impl<T: Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

// ── Domain events ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    Comment,
    Fallback,
}

/// Serialized as the `type` tag plus a `data` body.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventPayload {
    Connect {
        identifier: String,
    },
    Disconnect {
        reason: String,
        classification: DisconnectClassification,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<serde_json::Value>,
    },
    Comment(Comment),
    Fallback {
        active: bool,
        reason: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::Error { .. } => EventKind::Error,
            Self::Comment(_) => EventKind::Comment,
            Self::Fallback { .. } => EventKind::Fallback,
        }
    }
}

/// What downstream consumers receive.
///
/// On the wire: `{type, timestamp, correlationId, data, latency?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub latency: Option<Duration>,
    #[serde(flatten)]
    pub data: EventPayload,
}

impl DomainEvent {
    pub fn new(correlation_id: Uuid, data: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id,
            latency: None,
            data,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn comment(&self) -> Option<&Comment> {
        match &self.data {
            EventPayload::Comment(c) => Some(c),
            _ => None,
        }
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }
}

// ── Lifecycle notifications ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Notification {
    #[serde(rename = "reconnection:started")]
    ReconnectionStarted {
        attempt: u32,
        reason: String,
        metrics: StabilityMetrics,
    },
    #[serde(rename = "reconnection:success")]
    ReconnectionSucceeded {
        attempt: u32,
        duration_ms: u64,
        metrics: StabilityMetrics,
    },
    #[serde(rename = "reconnection:failed")]
    ReconnectionFailed {
        attempt: u32,
        reason: String,
        consecutive_failures: u32,
        /// No further automatic attempt is pending.
        terminal: bool,
    },
    #[serde(rename = "reconnection:state:changed")]
    StateChanged {
        from: ReconnectionState,
        to: ReconnectionState,
        reason: String,
    },
    #[serde(rename = "degraded-mode:activated")]
    DegradedActivated {
        reason: String,
        estimated_recovery_ms: u64,
    },
    #[serde(rename = "degraded-mode:deactivated")]
    DegradedDeactivated { downtime_ms: u64 },
    #[serde(rename = "degraded-mode:capabilities")]
    DegradedCapabilities(DegradedModeCapabilities),
    #[serde(rename = "degraded-mode:sync")]
    DegradedSync(SyncBatch),
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReconnectionStarted { .. } => "reconnection:started",
            Self::ReconnectionSucceeded { .. } => "reconnection:success",
            Self::ReconnectionFailed { .. } => "reconnection:failed",
            Self::StateChanged { .. } => "reconnection:state:changed",
            Self::DegradedActivated { .. } => "degraded-mode:activated",
            Self::DegradedDeactivated { .. } => "degraded-mode:deactivated",
            Self::DegradedCapabilities(_) => "degraded-mode:capabilities",
            Self::DegradedSync(_) => "degraded-mode:sync",
        }
    }
}

pub type DomainEventBus = EventBus<DomainEvent>;
pub type NotificationBus = EventBus<Notification>;
