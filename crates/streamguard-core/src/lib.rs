//! Connection-resilience engine for unreliable live event streams.
//!
//! Keeps a client attached to a chat/activity stream that drops without
//! warning, and turns whatever arrives into a steady stream of validated
//! domain events:
//!
//! - **[`CircuitBreaker`]** guards connect attempts with bounded retry and
//!   a trip/probe state machine, plus a per-event sub-breaker
//!   ([`EventBreaker`]) that raises a polling fallback without touching
//!   the connection circuit.
//!
//! - **[`ReconnectionManager`]** classifies disconnects, computes jittered
//!   backoff, owns the [`ReconnectionState`] machine, and derives
//!   [`StabilityMetrics`]. At most one reconnection cycle runs at a time.
//!
//! - **[`DegradedModeManager`]** advertises a reduced capability set
//!   during outages, buffers missed events, and reconciles on recovery.
//!
//! - **Event pipeline** ([`pipeline`]) parses raw payloads into
//!   [`Comment`]s, measures latency, and batches output onto the
//!   [`DomainEventBus`].
//!
//! - **[`LiveConnection`]** wires a [`StreamAdapter`] into all of the
//!   above and runs the background tasks.
//!
//! Observability goes through an explicitly constructed
//! [`MetricsService`] shared by reference, never a global.

pub mod adapter;
pub mod breaker;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod degraded;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod reconnect;
pub mod ring;

use std::sync::{Mutex, MutexGuard, PoisonError};

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{AdapterEvent, StreamAdapter};
pub use breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitState, EventBreaker};
pub use config::{
    BatchPolicy, BreakerPolicy, ConnectionConfig, Credentials, EngineOptions, ReconnectPolicy,
};
pub use connection::LiveConnection;
pub use correlation::{CorrelationContext, CorrelationGuard};
pub use degraded::{
    BufferLimits, DegradedModeCapabilities, DegradedModeManager, Reconciler, SyncBatch,
};
pub use error::{ConfigError, CoreError, Violation};
pub use events::{DomainEvent, DomainEventBus, EventKind, EventPayload, Notification, NotificationBus};
pub use metrics::{MetricsService, Severity};
pub use pipeline::Comment;
pub use reconnect::{
    DisconnectClassification, ReconnectionManager, ReconnectionState, StabilityMetrics,
    classify_disconnect_reason,
};
pub use ring::RingBuffer;

/// Lock a std mutex, recovering the data if a holder panicked. Every
/// structure guarded this way stays consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
