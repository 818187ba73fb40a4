// ── Core error types ──
//
// Errors surfaced by the resilience engine. Adapters translate their own
// transport failures into these variants so the breaker and the
// reconnection manager can reason about retryability without knowing
// anything about the wire protocol.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to stream '{identifier}': {reason}")]
    ConnectionFailed { identifier: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connection attempt timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // ── Resilience errors ────────────────────────────────────────────
    /// Synthetic rejection: the wrapped operation was never invoked.
    #[error("Circuit '{name}' is open, retry in {retry_in:?}")]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("Reconnection attempts exhausted ({attempts} of {max})")]
    ReconnectionExhausted { attempts: u32, max: u32 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // ── Degraded mode ────────────────────────────────────────────────
    #[error("Synchronization of missed events failed: {message}")]
    SyncFailed { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error(transparent)]
    Config(#[from] ConfigError),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Bad credentials stay bad, and a circuit-open rejection is already
    /// the result of too many retries.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::CircuitOpen { .. }
                | Self::ReconnectionExhausted { .. }
                | Self::Config(_)
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

// ── Configuration validation ─────────────────────────────────────────

/// A single violated configuration constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Every violated constraint, never just the first one.
    #[error("invalid connection config: {}", join_violations(.violations))]
    Validation { violations: Vec<Violation> },
}

impl ConfigError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation { violations } => violations,
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
