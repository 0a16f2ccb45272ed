//! Structured error types for Vigil
//!
//! Provides type-safe error handling with rich context for debugging,
//! honest user-facing messages, and retry classification.

use std::time::Duration;
use thiserror::Error;

use crate::signal::SignalType;

/// Primary error type for Vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    // =========================================================================
    // Transient I/O
    // =========================================================================
    /// Outbound call exceeded its deadline
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Network/connection error
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Provider asked us to back off (429)
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Provider returned an error status
    #[error("provider error: {status} - {message}")]
    ProviderError { status: u16, message: String },

    /// Channel reported itself unavailable
    #[error("channel unavailable: {name}")]
    ChannelUnavailable { name: String },

    // =========================================================================
    // Circuit breaker
    // =========================================================================
    /// Breaker is open; the wrapped dependency was not invoked
    #[error("circuit open for {name}")]
    CircuitOpen { name: String },

    // =========================================================================
    // Protocol errors (non-retryable)
    // =========================================================================
    /// Message target does not exist or is malformed
    #[error("invalid target: {target}")]
    InvalidTarget { target: String },

    /// The remote side refused the operation
    #[error("permission denied: {what}")]
    PermissionDenied { what: String },

    // =========================================================================
    // Policy violations
    // =========================================================================
    /// Intent rejected by policy; state is unchanged
    #[error("policy violation: {reason}")]
    PolicyViolation { reason: String },

    /// Attempt to write a field the state machine owns
    #[error("field '{field}' is automatic and cannot be updated by tools")]
    AutomaticField { field: String },

    // =========================================================================
    // Budget exhaustion (dropped silently with a metric, never user-facing)
    // =========================================================================
    /// Per-tick or per-turn budget spent
    #[error("budget exhausted: {what}")]
    BudgetExhausted { what: String },

    /// Thought chain exceeded the maximum depth
    #[error("thought depth {depth} exceeds maximum {max}")]
    MaxThoughtDepth { depth: u8, max: u8 },

    // =========================================================================
    // Signals
    // =========================================================================
    /// Signal failed validation; logged, dropped, counted
    #[error("malformed signal: {reason}")]
    MalformedSignal { reason: String },

    /// Bus is at capacity and the signal was droppable
    #[error("bus full, dropped {signal_type} signal")]
    BusFull { signal_type: SignalType },

    // =========================================================================
    // Tools
    // =========================================================================
    /// Tool not found
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    /// Tool is registered but disabled
    #[error("tool '{name}' is disabled: {reason}")]
    ToolDisabled { name: String, reason: String },

    /// Tool execution failed
    #[error("tool execution failed: {name} - {message}")]
    ToolFailed { name: String, message: String },

    // =========================================================================
    // Configuration / plugins (fatal at init)
    // =========================================================================
    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Missing required config
    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    /// Plugin refused at load time
    #[error("plugin '{id}' refused: {reason}")]
    PluginRefused { id: String, reason: String },

    // =========================================================================
    // Storage / scheduling
    // =========================================================================
    /// Storage queries must be prefix-bounded
    #[error("storage query requires a non-empty prefix")]
    UnboundedQuery,

    /// Storage backend failure
    #[error("storage error: {message}")]
    StorageError { message: String },

    /// Recurrence rule could not produce a next firing time
    #[error("invalid recurrence: {reason}")]
    InvalidRecurrence { reason: String },

    // =========================================================================
    // Internal
    // =========================================================================
    /// Internal invariant violated
    #[error("internal error: {message}")]
    Internal { message: String },

    // =========================================================================
    // External wrappers
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl VigilError {
    /// Check if the error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::RateLimited { .. } => true,
            Self::ChannelUnavailable { .. } => true,

            // Provider errors - depends on status
            Self::ProviderError { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),

            // IO errors - some are retryable
            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            // Never retry these
            Self::CircuitOpen { .. }
            | Self::InvalidTarget { .. }
            | Self::PermissionDenied { .. }
            | Self::PolicyViolation { .. }
            | Self::AutomaticField { .. }
            | Self::BudgetExhausted { .. }
            | Self::MaxThoughtDepth { .. }
            | Self::MalformedSignal { .. }
            | Self::BusFull { .. }
            | Self::ToolNotFound { .. }
            | Self::ToolDisabled { .. }
            | Self::ToolFailed { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::PluginRefused { .. }
            | Self::UnboundedQuery
            | Self::StorageError { .. }
            | Self::InvalidRecurrence { .. }
            | Self::Internal { .. }
            | Self::Json { .. } => false,
        }
    }

    /// Get suggested retry delay for retryable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => {
                Some(retry_after.unwrap_or(Duration::from_secs(5)))
            }
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(2)),
            Self::ChannelUnavailable { .. } => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// Budget errors are dropped with a counter, never surfaced to the user
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::BudgetExhausted { .. } | Self::MaxThoughtDepth { .. } | Self::BusFull { .. }
        )
    }

    /// Get an honest, user-friendly message for failures that surface in chat
    pub fn user_message(&self) -> String {
        match self {
            Self::ToolFailed { name, .. } => {
                format!("I tried to use '{}' but it failed.", name)
            }
            Self::CircuitOpen { .. } | Self::ChannelUnavailable { .. } => {
                "I'm having trouble reaching the outside world right now.".to_string()
            }
            Self::Timeout { .. } | Self::ConnectionFailed { .. } => {
                "That took too long and I gave up. I'll try again later.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Convert from serde_json::Error to VigilError
impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;
