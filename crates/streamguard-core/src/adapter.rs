// ── Upstream stream adapter ──
//
// The streaming client itself (wire protocol, handshake) lives behind
// this trait. The engine only calls `connect` / `disconnect` and reacts
// to the lifecycle events the adapter pushes into its channel.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::CoreError;

/// Suggested capacity for an adapter's event channel.
pub const ADAPTER_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle callbacks from the upstream client.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Message {
        payload: Value,
        received_at: DateTime<Utc>,
    },
}

impl AdapterEvent {
    /// A message stamped with the current time.
    pub fn message(payload: Value) -> Self {
        Self::Message {
            payload,
            received_at: Utc::now(),
        }
    }
}

/// A black-box live stream client.
///
/// `connect` resolves once the stream is up and should be followed by
/// an [`AdapterEvent::Connected`]. The event receiver is handed out
/// once; there is exactly one dispatcher per adapter.
pub trait StreamAdapter: Send + Sync + 'static {
    fn connect(&self, identifier: &str) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn take_events(&self) -> Option<mpsc::Receiver<AdapterEvent>>;
}
