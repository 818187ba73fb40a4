//! `streamguard simulate`: run the engine against a flaky in-process stream.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use streamguard_core::breaker::EventBreakerStats;
use streamguard_core::degraded::DegradedStatus;
use streamguard_core::metrics::Alert;
use streamguard_core::{
    CircuitBreakerMetrics, Comment, DomainEvent, LiveConnection, Notification, ReconnectionState,
    StabilityMetrics,
};

use crate::cli::{GlobalOpts, SimulateArgs};
use crate::config;
use crate::error::CliError;
use crate::sim::{SimulatedAdapter, SimulationProfile};

const SAMPLE_COMMENTS: usize = 5;
const MALFORMED_RATE: f64 = 0.05;

#[derive(Debug, Default)]
struct Tally {
    events: Mutex<BTreeMap<String, u64>>,
    notifications: Mutex<BTreeMap<String, u64>>,
    samples: Mutex<Vec<Comment>>,
}

impl Tally {
    fn event(&self, event: &DomainEvent) {
        bump(&self.events, event.kind().to_string());
        if let Some(comment) = event.comment() {
            let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            if samples.len() < SAMPLE_COMMENTS {
                samples.push(comment.clone());
            }
        }
    }

    fn notification(&self, notification: &Notification) {
        bump(&self.notifications, notification.name().to_owned());
    }
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: String) {
    *map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_default() += 1;
}

fn take<T: Default>(m: &Mutex<T>) -> T {
    std::mem::take(&mut *m.lock().unwrap_or_else(PoisonError::into_inner))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    identifier: String,
    ran_for_ms: u64,
    final_state: ReconnectionState,
    events: BTreeMap<String, u64>,
    notifications: BTreeMap<String, u64>,
    sample_comments: Vec<Comment>,
    stability: StabilityMetrics,
    circuit: CircuitBreakerMetrics,
    event_breaker: EventBreakerStats,
    degraded: DegradedStatus,
    alerts: Vec<Alert>,
    counters: BTreeMap<String, u64>,
}

pub async fn handle(args: &SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::resolve_path(global);
    let runtime = config::load_runtime(&path)?;

    let adapter = SimulatedAdapter::new(SimulationProfile {
        failure_rate: args.failure_rate,
        disconnect_rate: args.disconnect_rate,
        message_interval: args.message_interval,
        malformed_rate: MALFORMED_RATE,
    });
    let conn = LiveConnection::new(runtime.connection, runtime.options, adapter);

    let tally = Arc::new(Tally::default());
    let t = Arc::clone(&tally);
    conn.events().on_event(move |event: &DomainEvent| t.event(event));
    let t = Arc::clone(&tally);
    conn.notifications().on_event(move |n: &Notification| {
        info!(notification = n.name(), "lifecycle");
        t.notification(n);
    });

    info!(
        identifier = %args.identifier,
        duration = %humantime::format_duration(args.duration),
        failure_rate = args.failure_rate,
        disconnect_rate = args.disconnect_rate,
        "starting simulation"
    );
    let started = Instant::now();
    if let Err(err) = conn.start(&args.identifier).await {
        conn.shutdown().await;
        return Err(err.into());
    }

    tokio::select! {
        () = tokio::time::sleep(args.duration) => {}
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("interrupted"),
            Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
        },
    }

    let final_state = conn.current_state();
    conn.shutdown().await;

    let snapshot = conn.metrics().snapshot();
    let report = SimulationReport {
        identifier: args.identifier.clone(),
        ran_for_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        final_state,
        events: take(&tally.events),
        notifications: take(&tally.notifications),
        sample_comments: take(&tally.samples),
        stability: conn.stability_metrics(),
        circuit: conn.breaker().metrics(),
        event_breaker: conn.breaker().events().stats(),
        degraded: conn.degraded().status(),
        alerts: snapshot.alerts,
        counters: snapshot.counters,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &SimulationReport) {
    println!(
        "simulated '{}' for {}ms, final state {}",
        report.identifier, report.ran_for_ms, report.final_state
    );

    println!("\nevents:");
    for (kind, count) in &report.events {
        println!("  {kind:<12} {count}");
    }
    println!("\nnotifications:");
    for (name, count) in &report.notifications {
        println!("  {name:<28} {count}");
    }

    let s = &report.stability;
    println!("\nstability:");
    println!("  uptime             {:.1}%", s.uptime_percentage);
    println!("  score              {:.1}", s.connection_stability_score);
    println!("  disconnects/hour   {}", s.disconnect_frequency);
    println!(
        "  reconnections      {} ok / {} failed",
        s.successful_reconnections, s.failed_reconnections
    );
    println!("  avg reconnect      {:.0}ms", s.average_reconnection_time);

    let c = &report.circuit;
    println!(
        "\ncircuit: {} ({} ok / {} failed / {} rejected)",
        c.state, c.successful_requests, c.failed_requests, c.rejected_requests
    );

    if !report.alerts.is_empty() {
        println!("\nalerts:");
        for alert in &report.alerts {
            println!("  [{}] {}: {}", alert.severity, alert.source, alert.message);
        }
    }

    if !report.sample_comments.is_empty() {
        println!("\nsample comments:");
        for comment in &report.sample_comments {
            println!("  <{}> {}", comment.username, comment.text);
        }
    }
}
