//! Error types for frametrace operations
//!
//! Every boundary-facing operation returns a [`Result`]; nothing in this
//! crate panics or aborts the host on bad input. Errors carry:
//! - A human-readable message
//! - A stable string code for logging (`error_code()`)
//! - One of the four numeric boundary codes (`code()`) that cross the C ABI
//!
//! Internal helpers (string copies, registry lookups, UTF-16 conversion)
//! never produce errors; they truncate or fall back to defaults instead.
//!
//! # Example
//!
//! ```rust
//! use frametrace_core::error::{ErrorCode, TraceError};
//!
//! let err = TraceError::invalid_state("capture already enabled");
//! assert_eq!(err.code(), ErrorCode::InvalidState);
//! assert_eq!(err.code().as_raw(), -3);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for frametrace operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Numeric status codes exchanged across the C boundary
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Operation was successful
    NoError = 0,
    /// Requested capability is not available in this process
    NotAvailable = -1,
    /// One or more arguments failed validation
    InvalidArgument = -2,
    /// Operation attempted in the wrong state
    InvalidState = -3,
}

impl ErrorCode {
    /// Raw value as passed across the C ABI
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Parse a raw status value
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ErrorCode::NoError),
            -1 => Some(ErrorCode::NotAvailable),
            -2 => Some(ErrorCode::InvalidArgument),
            -3 => Some(ErrorCode::InvalidState),
            _ => None,
        }
    }

    /// Status code for a unit result
    pub fn of(result: &Result<()>) -> Self {
        match result {
            Ok(()) => ErrorCode::NoError,
            Err(err) => err.code(),
        }
    }
}

/// Errors that can occur in frametrace operations
#[derive(Error, Debug)]
pub enum TraceError {
    /// An optional capability (native tracer, extern tracer, plugin context)
    /// is absent. Callers treat this as a normal, checked condition.
    #[error("{capability} is not available in this process")]
    NotAvailable { capability: &'static str },

    /// Caller-supplied buffer, capacity or callback failed validation
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Operation attempted in the wrong state (double enable, disable while disabled, ...)
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    /// A category id does not fit in the section group registry
    #[error("Section group registry holds {capacity} entries; category '{name}' dropped. Raise section_group_capacity.")]
    RegistryFull { capacity: usize, name: String },

    /// The process-wide plugin context was unloaded and cannot be rebuilt
    #[error("Plugin context has been unloaded and cannot be recreated in this process")]
    ContextTornDown,

    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl TraceError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        TraceError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        TraceError::InvalidState {
            reason: reason.into(),
        }
    }

    /// Returns the numeric boundary code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            TraceError::NotAvailable { .. } => ErrorCode::NotAvailable,
            TraceError::InvalidArgument { .. } | TraceError::Config(_) => {
                ErrorCode::InvalidArgument
            }
            TraceError::InvalidState { .. }
            | TraceError::RegistryFull { .. }
            | TraceError::ContextTornDown => ErrorCode::InvalidState,
        }
    }

    /// Returns the stable string code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            TraceError::NotAvailable { .. } => "NOT_AVAILABLE",
            TraceError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            TraceError::InvalidState { .. } => "INVALID_STATE",
            TraceError::RegistryFull { .. } => "REGISTRY_FULL",
            TraceError::ContextTornDown => "CONTEXT_TORN_DOWN",
            TraceError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if the same call may succeed once the caller changes state
    ///
    /// `InvalidState` is recoverable (disable first, then enable again);
    /// argument errors and a torn-down context are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TraceError::InvalidState { .. })
    }
}

impl From<&TraceError> for ErrorCode {
    fn from(err: &TraceError) -> Self {
        err.code()
    }
}
