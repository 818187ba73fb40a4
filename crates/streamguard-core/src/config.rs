// ── Runtime connection configuration ──
//
// These types describe *how* to connect to the live stream and how hard
// to fight for the connection. They carry credential data and tuning,
// but never touch disk. `streamguard-config` builds them from files.

use std::ops::RangeInclusive;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, Violation};

pub const TIMEOUT_RANGE_MS: RangeInclusive<u64> = 5_000..=120_000;
pub const RETRY_ATTEMPTS_RANGE: RangeInclusive<u32> = 0..=10;
pub const RETRY_DELAY_RANGE_MS: RangeInclusive<u64> = 100..=30_000;

/// Credential data handed to the adapter on connect.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// Public streams that need no authentication.
    #[default]
    Anonymous,
    /// Signing / API key for the upstream service.
    ApiKey(SecretString),
    /// Session cookie of an authenticated account.
    Session { session_id: SecretString },
}

/// Validated connection settings.
///
/// Immutable once built. There is no way to construct one that violates
/// its ranges: values are rejected, never clamped.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    credentials: Credentials,
}

impl ConnectionConfig {
    pub fn new(
        timeout: Duration,
        retry_attempts: u32,
        retry_delay: Duration,
        credentials: Credentials,
    ) -> Result<Self, ConfigError> {
        let mut violations = Vec::new();

        let timeout_ms = duration_ms(timeout);
        if !TIMEOUT_RANGE_MS.contains(&timeout_ms) {
            violations.push(Violation {
                field: "timeout",
                reason: format!(
                    "{timeout_ms}ms is outside {}..={}ms",
                    TIMEOUT_RANGE_MS.start(),
                    TIMEOUT_RANGE_MS.end()
                ),
            });
        }

        if !RETRY_ATTEMPTS_RANGE.contains(&retry_attempts) {
            violations.push(Violation {
                field: "retry_attempts",
                reason: format!(
                    "{retry_attempts} is outside {}..={}",
                    RETRY_ATTEMPTS_RANGE.start(),
                    RETRY_ATTEMPTS_RANGE.end()
                ),
            });
        }

        let delay_ms = duration_ms(retry_delay);
        if !RETRY_DELAY_RANGE_MS.contains(&delay_ms) {
            violations.push(Violation {
                field: "retry_delay",
                reason: format!(
                    "{delay_ms}ms is outside {}..={}ms",
                    RETRY_DELAY_RANGE_MS.start(),
                    RETRY_DELAY_RANGE_MS.end()
                ),
            });
        }

        if !violations.is_empty() {
            return Err(ConfigError::Validation { violations });
        }

        Ok(Self {
            timeout,
            retry_attempts,
            retry_delay,
            credentials,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            credentials: Credentials::Anonymous,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Policies ─────────────────────────────────────────────────────────

/// Backoff and attempt limits for the reconnection orchestrator.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay for the first attempt and the lower clamp. Default: 5s.
    pub base_delay: Duration,
    /// Upper clamp on any delay. Default: 300s.
    pub max_delay: Duration,
    /// Growth factor per attempt. Default: 2.0.
    pub multiplier: f64,
    /// Attempts per outage before giving up. Default: 10.
    pub max_attempts: u32,
    /// Upper bound of the uniform jitter fraction. Default: 0.1.
    pub jitter: f64,
    /// Consecutive failed cycles that raise a high-severity alert. Default: 5.
    pub failure_alert_threshold: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            max_attempts: 10,
            jitter: 0.1,
            failure_alert_threshold: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    /// Consecutive failed calls that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive per-event failures that raise the polling fallback.
    pub event_failure_threshold: u32,
    /// How long retry diagnostics are kept.
    pub retry_history_window: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            event_failure_threshold: 5,
            retry_history_window: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval: Duration::from_millis(100),
        }
    }
}

/// Everything a [`LiveConnection`](crate::LiveConnection) needs besides
/// the adapter itself.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub reconnect: ReconnectPolicy,
    pub breaker: BreakerPolicy,
    pub batch: BatchPolicy,
    /// Period of the stability health check. Default: 30s.
    pub health_check_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            breaker: BreakerPolicy::default(),
            batch: BatchPolicy::default(),
            health_check_interval: Duration::from_secs(30),
        }
    }
}
