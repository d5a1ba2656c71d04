//! Error types for newcore
//!
//! Lifecycle rejections are reported through these variants instead of being
//! silently swallowed, so callers and tests can observe them.

use thiserror::Error;

/// Main error type for newcore operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The target has begun (or finished) shutting down and accepts nothing new
    #[error("{target} is shutting down")]
    ShuttingDown {
        /// What rejected the operation (e.g. "scheduler 3")
        target: String,
    },

    /// Operation is not legal in the current lifecycle state
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state that was observed
        state: String,
    },

    /// Runtime error
    #[error("Runtime error: {reason}")]
    RuntimeError {
        /// Reason for the runtime error
        reason: String,
    },
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
