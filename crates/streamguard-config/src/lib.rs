//! Configuration for streamguard.
//!
//! TOML file + `STREAMGUARD_` environment overrides, credential
//! resolution (env var named in the file, then plaintext), and
//! translation into the validated `streamguard_core` runtime types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use streamguard_core::{
    BatchPolicy, BreakerPolicy, ConnectionConfig, Credentials, EngineOptions, ReconnectPolicy,
    Violation,
};

/// Prefix of environment overrides; nested keys split on `__`
/// (`STREAMGUARD_CONNECTION__TIMEOUT=10s`).
pub const ENV_PREFIX: &str = "STREAMGUARD_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] streamguard_core::ConfigError),

    #[error("no credentials configured for auth mode '{mode}'")]
    NoCredentials { mode: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSection,
    pub reconnect: ReconnectSection,
    pub breaker: BreakerSection,
    pub batch: BatchSection,
    pub health: HealthSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Anonymous,
    ApiKey,
    Session,
}

impl AuthMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::ApiKey => "api_key",
            Self::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSection {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,

    pub auth_mode: AuthMode,
    /// API key (plaintext; prefer `api_key_env`).
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Session id (plaintext; prefer `session_id_env`).
    pub session_id: Option<String>,
    /// Environment variable holding the session id.
    pub session_id_env: Option<String>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        let core = ConnectionConfig::default();
        Self {
            timeout: core.timeout(),
            retry_attempts: core.retry_attempts(),
            retry_delay: core.retry_delay(),
            auth_mode: AuthMode::Anonymous,
            api_key: None,
            api_key_env: None,
            session_id: None,
            session_id_env: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    #[serde(with = "duration_str")]
    pub base_delay: Duration,
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter: f64,
    pub failure_alert_threshold: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let p = ReconnectPolicy::default();
        Self {
            base_delay: p.base_delay,
            max_delay: p.max_delay,
            multiplier: p.multiplier,
            max_attempts: p.max_attempts,
            jitter: p.jitter,
            failure_alert_threshold: p.failure_alert_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub event_failure_threshold: u32,
    #[serde(with = "duration_str")]
    pub retry_history_window: Duration,
}

impl Default for BreakerSection {
    fn default() -> Self {
        let p = BreakerPolicy::default();
        Self {
            failure_threshold: p.failure_threshold,
            event_failure_threshold: p.event_failure_threshold,
            retry_history_window: p.retry_history_window,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchSection {
    pub max_batch_size: usize,
    #[serde(with = "duration_str")]
    pub flush_interval: Duration,
}

impl Default for BatchSection {
    fn default() -> Self {
        let p = BatchPolicy::default();
        Self {
            max_batch_size: p.max_batch_size,
            flush_interval: p.flush_interval,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthSection {
    #[serde(with = "duration_str")]
    pub check_interval: Duration,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval: EngineOptions::default().health_check_interval,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    pub json: bool,
}

/// Humantime strings ("1s", "5m 30s") for `Duration` fields.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "streamguard", "streamguard").map_or_else(
        || PathBuf::from(".streamguard.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults ← TOML file ← environment.
///
/// `path` overrides the platform config path. A missing file is not an
/// error; the defaults and environment still apply.
pub fn figment(path: Option<&Path>) -> Figment {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_from(&figment(path))
}

pub fn load_config_from(figment: &Figment) -> Result<Config, ConfigError> {
    Ok(figment.extract()?)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Translation to runtime types ────────────────────────────────────

/// Validated settings ready for a `LiveConnection`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub connection: ConnectionConfig,
    pub options: EngineOptions,
}

impl Config {
    /// Resolve credentials and validate everything, reporting every
    /// violated constraint at once.
    pub fn to_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        let credentials = resolve_credentials(&self.connection)?;

        let mut violations = self.policy_violations();
        let connection = match ConnectionConfig::new(
            self.connection.timeout,
            self.connection.retry_attempts,
            self.connection.retry_delay,
            credentials,
        ) {
            Ok(c) => Some(c),
            Err(e) => {
                violations.extend_from_slice(e.violations());
                None
            }
        };

        match connection {
            Some(connection) if violations.is_empty() => Ok(RuntimeConfig {
                connection,
                options: self.engine_options(),
            }),
            _ => Err(streamguard_core::ConfigError::Validation { violations }.into()),
        }
    }

    fn engine_options(&self) -> EngineOptions {
        let r = &self.reconnect;
        EngineOptions {
            reconnect: ReconnectPolicy {
                base_delay: r.base_delay,
                max_delay: r.max_delay,
                multiplier: r.multiplier,
                max_attempts: r.max_attempts,
                jitter: r.jitter,
                failure_alert_threshold: r.failure_alert_threshold,
            },
            breaker: BreakerPolicy {
                failure_threshold: self.breaker.failure_threshold,
                event_failure_threshold: self.breaker.event_failure_threshold,
                retry_history_window: self.breaker.retry_history_window,
            },
            batch: BatchPolicy {
                max_batch_size: self.batch.max_batch_size,
                flush_interval: self.batch.flush_interval,
            },
            health_check_interval: self.health.check_interval,
        }
    }

    fn policy_violations(&self) -> Vec<Violation> {
        let mut v = Vec::new();
        let mut check = |ok: bool, field: &'static str, reason: String| {
            if !ok {
                v.push(Violation { field, reason });
            }
        };

        let r = &self.reconnect;
        check(
            !r.base_delay.is_zero(),
            "reconnect.base_delay",
            "must be greater than zero".into(),
        );
        check(
            r.max_delay >= r.base_delay,
            "reconnect.max_delay",
            format!(
                "{} is below base_delay {}",
                humantime::format_duration(r.max_delay),
                humantime::format_duration(r.base_delay)
            ),
        );
        check(
            r.multiplier.is_finite() && r.multiplier >= 1.0,
            "reconnect.multiplier",
            format!("{} must be a finite number >= 1", r.multiplier),
        );
        check(
            (0.0..=1.0).contains(&r.jitter),
            "reconnect.jitter",
            format!("{} is outside 0..=1", r.jitter),
        );
        check(
            r.max_attempts >= 1,
            "reconnect.max_attempts",
            "must be at least 1".into(),
        );
        check(
            self.breaker.failure_threshold >= 1,
            "breaker.failure_threshold",
            "must be at least 1".into(),
        );
        check(
            self.breaker.event_failure_threshold >= 1,
            "breaker.event_failure_threshold",
            "must be at least 1".into(),
        );
        check(
            self.batch.max_batch_size >= 1,
            "batch.max_batch_size",
            "must be at least 1".into(),
        );
        check(
            !self.batch.flush_interval.is_zero(),
            "batch.flush_interval",
            "must be greater than zero".into(),
        );
        check(
            !self.health.check_interval.is_zero(),
            "health.check_interval",
            "must be greater than zero".into(),
        );
        v
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve credentials for the configured auth mode: the named env var
/// first, then the plaintext value in the file.
pub fn resolve_credentials(section: &ConnectionSection) -> Result<Credentials, ConfigError> {
    let from_chain = |env_name: Option<&String>, plaintext: Option<&String>| {
        env_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
            .or_else(|| plaintext.cloned())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::NoCredentials {
                mode: section.auth_mode.as_str().into(),
            })
    };

    match section.auth_mode {
        AuthMode::Anonymous => Ok(Credentials::Anonymous),
        AuthMode::ApiKey => Ok(Credentials::ApiKey(from_chain(
            section.api_key_env.as_ref(),
            section.api_key.as_ref(),
        )?)),
        AuthMode::Session => Ok(Credentials::Session {
            session_id: from_chain(section.session_id_env.as_ref(), section.session_id.as_ref())?,
        }),
    }
}
