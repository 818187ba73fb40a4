//! CLI error types with miette diagnostics.

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

use streamguard_config::ConfigError;
use streamguard_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("Stream connection failed")]
    #[diagnostic(
        code(streamguard::connection_failed),
        help("Check the stream identifier, or lower --failure-rate for the simulator.")
    )]
    ConnectionFailed {
        #[source]
        source: CoreError,
    },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(streamguard::auth_failed),
        help("Verify connection.auth_mode and the credential env var in your config.")
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for auth mode '{mode}'")]
    #[diagnostic(
        code(streamguard::no_credentials),
        help(
            "Set connection.api_key_env (or session_id_env) in the config file,\n\
             or switch connection.auth_mode to \"anonymous\"."
        )
    )]
    NoCredentials { mode: String },

    #[error("Invalid configuration")]
    #[diagnostic(code(streamguard::config), help("Config file: {path}"))]
    Config {
        path: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(streamguard::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Config { .. } => exit_code::USAGE,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            other => Self::ConnectionFailed { source: other },
        }
    }
}

impl CliError {
    /// Wrap a config failure, keeping the file it came from for the help text.
    pub fn config(path: &Path) -> impl FnOnce(ConfigError) -> Self + '_ {
        move |err| match err {
            ConfigError::NoCredentials { mode } => Self::NoCredentials { mode },
            other => Self::Config {
                path: path.display().to_string(),
                source: Box::new(other),
            },
        }
    }
}
