//! Error types for the Surfer core library.
//!
//! Every failure the orchestration core can surface is a [`SurferError`]
//! carrying a stable code, so the display side can match on codes without
//! parsing messages.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Run | Run/Task/Step identity and lifecycle errors |
//! | E2001-E2099 | Session | Browser session attach and capacity errors |
//! | E3001-E3099 | Driver | Extraction driver failures and lookup errors |
//! | E4001-E4099 | Storage | Persistence and serialization errors |
//! | E5001-E5099 | Config | Configuration loading and validation errors |
//! | E9001-E9099 | General | IO, channel and internal errors |

use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// The kind of entity a [`SurferError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Run,
    Task,
    Step,
    Platform,
    SubRun,
    Session,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Run => write!(f, "run"),
            EntityKind::Task => write!(f, "task"),
            EntityKind::Step => write!(f, "step"),
            EntityKind::Platform => write!(f, "platform"),
            EntityKind::SubRun => write!(f, "sub-run"),
            EntityKind::Session => write!(f, "session"),
        }
    }
}

/// The main error type for the Surfer core library.
#[derive(Debug, Error)]
pub enum SurferError {
    // ========================================================================
    // Run Errors (E1001-E1099)
    // ========================================================================
    /// A run with this id already exists. Never expected under the id scheme,
    /// but creation fails closed instead of overwriting.
    #[error("[E1001] Run already exists: {0}")]
    DuplicateRun(String),

    /// The addressed run, task, step or catalog entry does not exist
    #[error("[E1002] {kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A non-terminal run already holds the session slot for this platform
    #[error("[E1003] A run is already active for platform '{0}'")]
    RunAlreadyActive(String),

    // ========================================================================
    // Session Errors (E2001-E2099)
    // ========================================================================
    /// The browser session could not be created or bound
    #[error("[E2001] Failed to attach a session for run '{run_id}': {message}")]
    SessionAttach { run_id: String, message: String },

    /// Too many concurrent sessions
    #[error("[E2002] Session limit reached ({0})")]
    SessionLimit(usize),

    // ========================================================================
    // Driver Errors (E3001-E3099)
    // ========================================================================
    /// An extraction driver failed mid-step
    #[error("[E3001] Driver failed at step '{step}': {message}")]
    Driver { step: String, message: String },

    /// No driver is registered for a platform sub-resource
    #[error("[E3002] No extraction driver for {platform}/{sub_run}")]
    DriverNotFound { platform: String, sub_run: String },

    // ========================================================================
    // Storage Errors (E4001-E4099)
    // ========================================================================
    /// Database operation failed
    #[error("[E4001] Database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed
    #[error("[E4002] Serialization error: {0}")]
    Serialization(String),

    // ========================================================================
    // Configuration Errors (E5001-E5099)
    // ========================================================================
    /// Configuration could not be loaded or is invalid
    #[error("[E5001] Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// IO error
    #[error("[E9001] IO error: {0}")]
    Io(String),

    /// The other end of a bridge channel has gone away
    #[error("[E9002] Bridge channel closed: {0}")]
    BridgeClosed(String),

    /// Internal error (unexpected condition)
    #[error("[E9003] Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Surfer operations.
pub type SurferResult<T> = Result<T, SurferError>;

impl SurferError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        SurferError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn session_attach(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        SurferError::SessionAttach {
            run_id: run_id.into(),
            message: message.into(),
        }
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            SurferError::DuplicateRun(_) => "E1001",
            SurferError::NotFound { .. } => "E1002",
            SurferError::RunAlreadyActive(_) => "E1003",
            SurferError::SessionAttach { .. } => "E2001",
            SurferError::SessionLimit(_) => "E2002",
            SurferError::Driver { .. } => "E3001",
            SurferError::DriverNotFound { .. } => "E3002",
            SurferError::Database(_) => "E4001",
            SurferError::Serialization(_) => "E4002",
            SurferError::Config(_) => "E5001",
            SurferError::Io(_) => "E9001",
            SurferError::BridgeClosed(_) => "E9002",
            SurferError::Internal(_) => "E9003",
        }
    }

    /// True for errors that end a single run and never touch other runs.
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self,
            SurferError::SessionAttach { .. }
                | SurferError::SessionLimit(_)
                | SurferError::Driver { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SurferError::NotFound { .. })
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            SurferError::RunAlreadyActive(_) => {
                Some("Wait for the current export to finish or stop it first")
            }
            SurferError::SessionLimit(_) => {
                Some("Close a finished session or raise sessions.max_sessions")
            }
            SurferError::Driver { .. } => {
                Some("Start a new export; failed runs are never retried automatically")
            }
            SurferError::DriverNotFound { .. } => {
                Some("Run 'surfer platforms' to see which sub-resources can be exported")
            }
            SurferError::Database(_) => Some("Check that database.url points to a writable file"),
            SurferError::Config(_) => Some("Check surfer.toml and SURFER_* environment variables"),
            _ => None,
        }
    }

    /// Log this error with a severity matching its blast radius.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_not_found() || self.is_run_scoped() {
            warn!(error_code = %code, suggestion = suggestion, "{}", self);
        } else {
            error!(error_code = %code, suggestion = suggestion, "{}", self);
        }
    }
}

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<sqlx::Error> for SurferError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolClosed => SurferError::Database("Connection pool is closed".into()),
            sqlx::Error::Database(db_err) => SurferError::Database(db_err.to_string()),
            _ => SurferError::Database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for SurferError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SurferError::Database(format!("migration failed: {}", err))
    }
}

impl From<serde_json::Error> for SurferError {
    fn from(err: serde_json::Error) -> Self {
        SurferError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SurferError {
    fn from(err: toml::de::Error) -> Self {
        SurferError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SurferError {
    fn from(err: std::io::Error) -> Self {
        SurferError::Io(err.to_string())
    }
}

impl From<crate::config::ConfigLoadError> for SurferError {
    fn from(err: crate::config::ConfigLoadError) -> Self {
        SurferError::Config(err.to_string())
    }
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with its suggestion.
pub struct CliErrorDisplay<'a> {
    error: &'a SurferError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a SurferError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        Ok(())
    }
}
