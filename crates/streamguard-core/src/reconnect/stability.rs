// ── Connection stability metrics ──
//
// Derived on demand from the bounded connect/disconnect log and the
// rolling sample of reconnection cycle durations. Nothing here is
// stored; every call recomputes from scratch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::time::Instant;

/// Trailing window the uptime and disconnect frequency cover.
pub const STABILITY_WINDOW: Duration = Duration::from_secs(60 * 60);

const DISCONNECT_PENALTY: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEvent {
    #[serde(rename = "type")]
    pub kind: ConnectionEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) at: Instant,
}

impl ConnectionEvent {
    pub fn new(kind: ConnectionEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectionCounts {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityMetrics {
    pub uptime_percentage: f64,
    /// Milliseconds, mean of the rolling cycle-duration sample.
    pub average_reconnection_time: f64,
    /// Disconnects within the trailing hour.
    pub disconnect_frequency: u32,
    /// `uptime% - 5*disconnects - avg_reconnect_ms/1000`, in `[0, 100]`.
    pub connection_stability_score: f64,
    pub total_reconnections: u32,
    pub successful_reconnections: u32,
    pub failed_reconnections: u32,
}

/// Compute stability metrics as of `now`.
///
/// `events` must be in chronological order. A connect following a
/// connect (or a disconnect following a disconnect) changes nothing.
pub fn stability_metrics_at<'a>(
    events: impl IntoIterator<Item = &'a ConnectionEvent>,
    durations: impl IntoIterator<Item = &'a Duration>,
    counts: ReconnectionCounts,
    now: Instant,
) -> StabilityMetrics {
    let window_start = now.checked_sub(STABILITY_WINDOW);
    let in_window = |at: Instant| window_start.is_none_or(|start| at >= start);

    let mut connected_since: Option<Instant> = None;
    let mut connected = Duration::ZERO;
    let mut disconnects: u32 = 0;

    for event in events {
        // Clip anything before the window to its start.
        let at = match window_start {
            Some(start) if event.at < start => start,
            _ => event.at,
        }
        .min(now);

        match event.kind {
            ConnectionEventKind::Connect => {
                connected_since.get_or_insert(at);
            }
            ConnectionEventKind::Disconnect => {
                if let Some(since) = connected_since.take() {
                    connected += at.saturating_duration_since(since);
                }
                if in_window(event.at) {
                    disconnects += 1;
                }
            }
        }
    }
    if let Some(since) = connected_since {
        connected += now.saturating_duration_since(since);
    }

    let uptime_percentage =
        (connected.as_secs_f64() / STABILITY_WINDOW.as_secs_f64() * 100.0).clamp(0.0, 100.0);

    let (sum, n) = durations
        .into_iter()
        .fold((Duration::ZERO, 0_u32), |(sum, n), d| (sum + *d, n + 1));
    let average_reconnection_time = if n == 0 {
        0.0
    } else {
        (sum / n).as_secs_f64() * 1000.0
    };

    let score = uptime_percentage
        - DISCONNECT_PENALTY * f64::from(disconnects)
        - average_reconnection_time / 1000.0;

    StabilityMetrics {
        uptime_percentage,
        average_reconnection_time,
        disconnect_frequency: disconnects,
        connection_stability_score: score.clamp(0.0, 100.0),
        total_reconnections: counts.total,
        successful_reconnections: counts.successful,
        failed_reconnections: counts.failed,
    }
}
