// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every collaborator the monitors talk to. Only configuration
// errors and an unreachable store at startup are fatal; everything a tick can
// produce is logged and the loop continues.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Top-level Monitor Errors
// ----------------------------------------------------------------------------

/// The main error type for the monitors.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum MonitorError {
    // ---- Configuration Errors ----
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ---- Source Errors ----
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    // ---- Sink Errors ----
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Partial data: {reachable} of {configured} producers reachable")]
    PartialData { reachable: usize, configured: usize },

    #[error("Store unavailable at startup: {0}")]
    StoreUnavailable(SourceError),

    // ---- IO Errors ----
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Config(_) => false,
            MonitorError::Source(e) => e.is_recoverable(),
            MonitorError::Sink(_) => true,
            MonitorError::PartialData { .. } => true,
            MonitorError::StoreUnavailable(_) => false,
            MonitorError::Io(_) => true,
            MonitorError::Internal(_) => false,
        }
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::Source(_) => "source",
            MonitorError::Sink(_) => "sink",
            MonitorError::PartialData { .. } => "partial_data",
            MonitorError::StoreUnavailable(_) => "store_unavailable",
            MonitorError::Io(_) => "io",
            MonitorError::Internal(_) => "internal",
        }
    }

    /// Get suggested recovery action
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            MonitorError::Config(_) => RecoveryHint::FixConfiguration,
            MonitorError::Source(e) => e.recovery_hint(),
            MonitorError::PartialData { .. } => RecoveryHint::Skip,
            MonitorError::StoreUnavailable(_) => RecoveryHint::AlertOperator,
            _ => RecoveryHint::RetryWithBackoff,
        }
    }
}

/// Hints for how to recover from an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Retry with backoff
    RetryWithBackoff,
    /// Reconnect to the service
    Reconnect,
    /// Fix configuration and restart
    FixConfiguration,
    /// Skip this sample and continue
    Skip,
    /// Alert operator for manual intervention
    AlertOperator,
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        ConfigError::MissingField {
            field: field.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Source Errors
// ----------------------------------------------------------------------------

/// Errors talking to producers, the store or the queue broker.
/// These are always transient from the monitor's point of view.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Connection to '{endpoint}' failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Timeout waiting for '{endpoint}' (waited {timeout_ms}ms)")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("'{endpoint}' returned HTTP {status}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("Invalid response from '{endpoint}': {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Queue '{queue}' not found")]
    QueueNotFound { queue: String },
}

impl SourceError {
    pub fn is_recoverable(&self) -> bool {
        true
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            SourceError::ConnectionFailed { .. } => RecoveryHint::Reconnect,
            SourceError::Timeout { .. } => RecoveryHint::RetryWithBackoff,
            SourceError::HttpStatus { .. } => RecoveryHint::RetryWithBackoff,
            SourceError::InvalidResponse { .. } => RecoveryHint::Skip,
            SourceError::QueueNotFound { .. } => RecoveryHint::Skip,
        }
    }

    /// True for failures below the HTTP layer (refused, reset, timed out).
    pub fn is_connection_level(&self) -> bool {
        matches!(self, SourceError::ConnectionFailed { .. } | SourceError::Timeout { .. })
    }

    /// Classify a `reqwest` failure against the endpoint it was sent to.
    pub fn from_reqwest(endpoint: impl Into<String>, timeout_ms: u64, err: reqwest::Error) -> Self {
        let endpoint = endpoint.into();
        if err.is_timeout() {
            SourceError::Timeout { endpoint, timeout_ms }
        } else if let Some(status) = err.status() {
            SourceError::HttpStatus {
                endpoint,
                status: status.as_u16(),
            }
        } else if err.is_decode() || err.is_body() {
            SourceError::InvalidResponse {
                endpoint,
                message: err.to_string(),
            }
        } else {
            SourceError::ConnectionFailed {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Sink Errors
// ----------------------------------------------------------------------------

/// Errors from the metrics exporter and the snapshot writer
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write snapshot '{path}': {source}")]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read snapshot '{path}': {source}")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("Failed to bind exporter on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;
