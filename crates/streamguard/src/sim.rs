//! A simulated live stream for exercising the engine end to end.
//!
//! Connect attempts fail at a configurable rate. Once up, the feed emits
//! chat messages on a fixed tick (with the occasional malformed payload)
//! and drops the stream at random with a plausible disconnect reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use streamguard_core::adapter::ADAPTER_CHANNEL_CAPACITY;
use streamguard_core::{AdapterEvent, CoreError, StreamAdapter};

const DISCONNECT_REASONS: &[&str] = &[
    "network timeout",
    "socket hang up",
    "connection reset by peer",
    "rate limit exceeded",
    "websocket closed unexpectedly",
];

const USERS: &[&str] = &["ana_b", "kenji.t", "zoe-rivers", "mo@live", "p1xel"];

const LINES: &[&str] = &[
    "hello from the stream!",
    "what song is this?",
    "call me at +1 (555) 010-9999 lol",
    "first time here",
    "  lots of   whitespace  ",
];

#[derive(Debug, Clone, Copy)]
pub struct SimulationProfile {
    pub failure_rate: f64,
    pub disconnect_rate: f64,
    pub message_interval: Duration,
    /// Share of messages that are missing required fields.
    pub malformed_rate: f64,
}

#[derive(Debug)]
struct SimState {
    profile: SimulationProfile,
    tx: mpsc::Sender<AdapterEvent>,
    rx: Mutex<Option<mpsc::Receiver<AdapterEvent>>>,
    feed: Mutex<Option<CancellationToken>>,
    seq: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    inner: Arc<SimState>,
}

impl SimulatedAdapter {
    pub fn new(profile: SimulationProfile) -> Self {
        let (tx, rx) = mpsc::channel(ADAPTER_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SimState {
                profile,
                tx,
                rx: Mutex::new(Some(rx)),
                feed: Mutex::new(None),
                seq: AtomicU64::new(0),
            }),
        }
    }
}

impl SimState {
    fn stop_feed(&self) {
        let token = self.feed.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn next_payload(&self, identifier: &str) -> Value {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let user = pick(USERS);
        if rand::random::<f64>() < self.profile.malformed_rate {
            return json!({ "commentId": format!("c-{seq}"), "user": { "uniqueId": user } });
        }
        // Alternate between the flat and nested payload layouts.
        if seq % 2 == 0 {
            json!({
                "id": format!("c-{seq}"),
                "userId": format!("u-{user}"),
                "username": user,
                "text": pick(LINES),
                "sessionId": identifier,
            })
        } else {
            json!({
                "commentId": format!("c-{seq}"),
                "user": { "userId": format!("u-{user}"), "uniqueId": user },
                "comment": pick(LINES),
                "roomId": identifier,
            })
        }
    }
}

fn pick(items: &[&'static str]) -> &'static str {
    let idx = rand::random::<usize>() % items.len();
    items.get(idx).copied().unwrap_or_default()
}

async fn run_feed(state: Arc<SimState>, identifier: String, token: CancellationToken) {
    if state.tx.send(AdapterEvent::Connected).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(state.profile.message_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if rand::random::<f64>() < state.profile.disconnect_rate {
            let reason = pick(DISCONNECT_REASONS).to_owned();
            debug!(%reason, "simulated stream dropped");
            state.stop_feed();
            let _ = state.tx.send(AdapterEvent::Disconnected { reason }).await;
            return;
        }

        let payload = state.next_payload(&identifier);
        if state.tx.send(AdapterEvent::message(payload)).await.is_err() {
            return;
        }
    }
}

impl StreamAdapter for SimulatedAdapter {
    fn connect(&self, identifier: &str) -> impl Future<Output = Result<(), CoreError>> + Send {
        let state = Arc::clone(&self.inner);
        let identifier = identifier.to_owned();
        async move {
            let handshake = Duration::from_millis(20 + rand::random::<u64>() % 100);
            tokio::time::sleep(handshake).await;

            if rand::random::<f64>() < state.profile.failure_rate {
                debug!(%identifier, "simulated connect failure");
                return Err(CoreError::ConnectionFailed {
                    identifier,
                    reason: "simulated network failure".into(),
                });
            }

            state.stop_feed();
            let token = CancellationToken::new();
            *state.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
            tokio::spawn(run_feed(Arc::clone(&state), identifier, token));
            Ok(())
        }
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), CoreError>> + Send {
        let state = Arc::clone(&self.inner);
        async move {
            state.stop_feed();
            Ok(())
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<AdapterEvent>> {
        self.inner
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
