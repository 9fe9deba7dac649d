//! Error types for the Firebird statement engine
//!
//! This module defines all error types that can occur while preparing,
//! executing and navigating statements, plus the non-fatal [`Warning`]
//! diagnostics that accumulate on a statement.

use std::io;
use thiserror::Error;

use crate::batch::BatchReport;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Firebird GDS error codes this engine classifies on.
///
/// Transports report raw codes inside [`Error::Execution`]; the engine
/// re-classifies the conflict class during positioned mutations and the
/// cancel class after a cooperative cancel.
pub mod gds {
    /// Deadlock between transactions
    pub const DEADLOCK: i32 = 335544336;
    /// Lock conflict on no-wait transaction
    pub const LOCK_CONFLICT: i32 = 335544345;
    /// Update conflicts with concurrent update
    pub const UPDATE_CONFLICT: i32 = 335544878;
    /// Operation was cancelled
    pub const CANCELLED: i32 = 335544794;
}

/// Main error type for the statement engine
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Call Syntax Errors
    // =========================================================================
    /// Malformed call-escape text. Non-retryable; the statement text must be
    /// fixed by the caller.
    #[error("call syntax error near '{fragment}': {message}")]
    Syntax { fragment: String, message: String },

    // =========================================================================
    // State and Capability Errors
    // =========================================================================
    /// Operation is not valid for the current cursor mode or statement state
    #[error("operation not supported here: {0}")]
    Capability(String),

    /// Statement has been closed
    #[error("statement is closed")]
    StatementClosed,

    /// Cursor has been closed
    #[error("cursor is closed")]
    CursorClosed,

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// Server-reported execution failure
    #[error("execution error{}{}: {}",
        code.map(|c| format!(" (gds {})", c)).unwrap_or_default(),
        context.as_deref().map(|c| format!(" [{}]", c)).unwrap_or_default(),
        message)]
    Execution {
        code: Option<i32>,
        message: String,
        context: Option<String>,
    },

    /// Positioned mutation conflicted with another transaction's view
    #[error("concurrent update conflict (gds {code}): {message}")]
    Concurrency { code: i32, message: String },

    /// Execution was cancelled cooperatively
    #[error("operation cancelled")]
    Cancelled,

    /// Batch execution finished with one or more failed items; the report
    /// carries the ordered per-item outcomes
    #[error("batch execution failed: {0}")]
    Batch(BatchReport),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a call syntax error naming the offending fragment
    pub fn syntax(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Syntax {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// Create a capability error
    pub fn capability(message: impl Into<String>) -> Self {
        Error::Capability(message.into())
    }

    /// Create a server execution error with a GDS code
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Error::Execution {
            code: Some(code),
            message: message.into(),
            context: None,
        }
    }

    /// Create an execution error without a server code
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            code: None,
            message: message.into(),
            context: None,
        }
    }

    /// Attach positional context (statement fragment, batch index, row
    /// ordinal) to an execution error; other variants pass through unchanged
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        match self {
            Error::Execution { code, message, context: None } => Error::Execution {
                code,
                message,
                context: Some(ctx.into()),
            },
            other => other,
        }
    }

    /// Check if this is a call syntax error
    pub fn is_syntax(&self) -> bool {
        matches!(self, Error::Syntax { .. })
    }

    /// Check if this error was caused by cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
            || matches!(self, Error::Execution { code: Some(c), .. } if *c == gds::CANCELLED)
    }

    /// Check if this error is in the transaction conflict class
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Concurrency { .. } => true,
            Error::Execution { code: Some(c), .. } => is_conflict_code(*c),
            _ => false,
        }
    }

    /// Check if the operation may be retried after resolving the cause
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

/// Check whether a GDS code belongs to the lock/update conflict class
pub fn is_conflict_code(code: i32) -> bool {
    matches!(
        code,
        gds::DEADLOCK | gds::LOCK_CONFLICT | gds::UPDATE_CONFLICT
    )
}

/// A non-fatal diagnostic raised during statement processing.
///
/// Warnings never abort an operation; they accumulate on the statement and
/// are drained with `Statement::take_warnings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Human-readable description
    pub message: String,
}

impl Warning {
    /// Create a new warning
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "warning: {}", self.message)
    }
}
