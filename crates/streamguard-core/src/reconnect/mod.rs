//! Reconnection orchestration: disconnect classification, backoff,
//! the reconnection state machine, and stability metrics.

mod backoff;
mod classify;
mod manager;
mod stability;
mod state;

pub use backoff::calculate_reconnection_delay;
pub use classify::{
    DisconnectClassification, DisconnectKind, DisconnectSeverity, classify_disconnect_reason,
};
pub use manager::{CycleGuard, ReconnectVeto, ReconnectionManager};
pub use stability::{
    ConnectionEvent, ConnectionEventKind, ReconnectionCounts, STABILITY_WINDOW, StabilityMetrics,
    stability_metrics_at,
};
pub use state::ReconnectionState;
