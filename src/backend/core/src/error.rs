//! Error handling for the Blueprint kernel.
//!
//! This module provides:
//! - A single structured error type with a stable, machine-readable code
//! - Retryable vs fatal classification (optimistic-concurrency conflicts are
//!   retryable, corrupt streams are fatal)
//! - User-facing messages vs internal detail for logs
//! - Logging with tracing integration and an error counter
//!
//! # Usage
//!
//! ```rust,ignore
//! use blueprint_core::error::{ErrorContext, Result};
//! use blueprint_core::modules::ModuleManifest;
//!
//! fn load_manifest(raw: &str) -> Result<ModuleManifest> {
//!     ModuleManifest::from_toml(raw).context("Failed to parse module manifest")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic handling,
/// most importantly to decide between "fix input", "reload and retry" and
/// "stop, the stream is broken".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain Errors (1000-1099)
    InvalidStateTransition,
    DependencyNotMet,
    CausalityViolation,
    TenantMismatch,

    // Event Store Errors (2000-2099)
    ConcurrencyConflict,
    StorageUnavailable,
    Corruption,
    UnknownEventType,
    StreamMismatch,
    RecordNotFound,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Validation Errors (4100-4199)
    ValidationError,
    MissingRequiredField,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidStateTransition => 1000,
            Self::DependencyNotMet => 1001,
            Self::CausalityViolation => 1002,
            Self::TenantMismatch => 1003,

            Self::ConcurrencyConflict => 2000,
            Self::StorageUnavailable => 2001,
            Self::Corruption => 2002,
            Self::UnknownEventType => 2003,
            Self::StreamMismatch => 2004,
            Self::RecordNotFound => 2005,

            Self::SerializationError => 2200,

            Self::ValidationError => 4100,
            Self::MissingRequiredField => 4101,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Whether an operation failing with this code may succeed if retried.
    ///
    /// A concurrency conflict needs a reload before the retry; storage
    /// unavailability needs a backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict | Self::StorageUnavailable)
    }

    /// Whether this code signals a defect or broken stream that must not be
    /// skipped or retried.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corruption | Self::UnknownEventType | Self::StreamMismatch | Self::InternalError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "domain",
            2000..=2099 => "event_store",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Business rejections and bad input
    Low,
    /// Expected operational conditions (conflicts, transient storage)
    Medium,
    /// Misconfiguration and serialization failures
    High,
    /// Broken streams and programming defects
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidStateTransition
            | ErrorCode::DependencyNotMet
            | ErrorCode::CausalityViolation
            | ErrorCode::RecordNotFound => Self::Low,

            ErrorCode::ConcurrencyConflict
            | ErrorCode::StorageUnavailable
            | ErrorCode::TenantMismatch => Self::Medium,

            ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::Corruption
            | ErrorCode::UnknownEventType
            | ErrorCode::StreamMismatch
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (aggregate, module, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the kernel.
#[derive(Error, Debug)]
pub struct KernelError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-facing error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl KernelError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a missing required field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("Missing required field: {}", field),
        )
        .with_context("field", &field)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Check if this error is fatal for the stream or operation.
    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "blueprint_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| KernelError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| KernelError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| KernelError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| KernelError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for KernelError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::RecordNotFound, "File or resource not found"),
            ErrorKind::TimedOut | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::StorageUnavailable, "Storage is temporarily unavailable")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for KernelError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<KernelError>() {
            Ok(kernel_error) => kernel_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for KernelError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<crate::modules::ManifestError> for KernelError {
    fn from(error: crate::modules::ManifestError) -> Self {
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Module manifest is invalid",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Kernel Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl KernelError {
    // ─────────────────────────────────────────────────────────────────────────
    // Domain Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an invalid state transition error.
    ///
    /// The message is the user-facing reason, e.g. "Workspace is already archived".
    pub fn invalid_state_transition(
        aggregate_type: &str,
        aggregate_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::InvalidStateTransition, message.into())
            .with_details(ErrorDetails::new().with_entity(aggregate_type, aggregate_id))
    }

    /// Create a dependency not met error listing every missing module.
    pub fn dependency_not_met(module_key: &str, missing: &[String]) -> Self {
        Self::new(
            ErrorCode::DependencyNotMet,
            format!(
                "Module '{}' requires modules that are not enabled: {}",
                module_key,
                missing.join(", ")
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("module", module_key)
                .with_context("missing", missing)
                .with_suggestion("Enable the missing modules first"),
        )
    }

    /// Create a causality violation error (incomplete event provenance).
    pub fn causality(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CausalityViolation, message.into())
            .with_details(ErrorDetails::new().with_suggestion("Supply actor, action and blueprint"))
    }

    /// Create a tenant mismatch error.
    pub fn tenant_mismatch(stream: &str, established: &str, attempted: Option<&str>) -> Self {
        Self::new(
            ErrorCode::TenantMismatch,
            format!(
                "Stream {} belongs to blueprint '{}', refused event for blueprint '{}'",
                stream,
                established,
                attempted.unwrap_or("<none>")
            ),
        )
        .with_context("stream", stream)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Store Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an optimistic concurrency conflict.
    pub fn concurrency_conflict(stream: &str, expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::ConcurrencyConflict,
            format!(
                "Concurrency conflict on {}: expected version {}, found {}",
                stream, expected, actual
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("stream", stream)
                .with_context("expected_version", expected)
                .with_context("actual_version", actual)
                .with_suggestion("Reload the aggregate, reapply the command and retry"),
        )
    }

    /// Create a transient storage error.
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StorageUnavailable,
            "Event storage is temporarily unavailable",
            message,
        )
    }

    /// Create a corruption error for a stored event that fails its schema.
    pub fn corruption(stream: &str, event_id: &str, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::Corruption,
            format!("Corrupt event {} in stream {}", event_id, stream),
            reason,
        )
        .with_context("stream", stream)
        .with_context("event_id", event_id)
    }

    /// Create an unknown event type error (a missing case, i.e. a bug).
    pub fn unknown_event_type(aggregate_type: &str, event_type: &str) -> Self {
        Self::new(
            ErrorCode::UnknownEventType,
            format!(
                "Aggregate '{}' has no handler for event type '{}'",
                aggregate_type, event_type
            ),
        )
        .with_context("event_type", event_type)
    }

    /// Create a stream mismatch error (wrong stream or non-contiguous version).
    pub fn stream_mismatch(stream: &str, message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StreamMismatch,
            format!("Event does not belong at this position of stream {}", stream),
            message,
        )
        .with_context("stream", stream)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
