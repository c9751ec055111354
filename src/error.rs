//! Error types for the runner.
//!
//! This module defines error codes, the serializable error report and the
//! main error type used throughout the runner. The distinguished exit
//! signal is one variant of [`RunnerError`] so callers can tell "exited"
//! apart from "crashed" with a single `match`.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Module bytes failed to compile
    CompilationError,
    /// Module failed to link or instantiate
    InstantiationError,
    /// Module reported native stack exhaustion
    StackOverflow,
    /// Module called `proc_exit`
    Exit,
    /// Wasm trap or host function failure during execution
    ExecutionError,
    /// Import unit failed while binding or starting
    ImportUnitError,
    /// Invalid configuration
    InvalidArgument,
    /// Dev server transport error
    TransportError,
    /// Serialization/deserialization error
    SerializationError,
    /// Internal runner error (bug)
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::CompilationError => write!(f, "COMPILATION_ERROR"),
            ErrorCode::InstantiationError => write!(f, "INSTANTIATION_ERROR"),
            ErrorCode::StackOverflow => write!(f, "STACK_OVERFLOW"),
            ErrorCode::Exit => write!(f, "EXIT"),
            ErrorCode::ExecutionError => write!(f, "EXECUTION_ERROR"),
            ErrorCode::ImportUnitError => write!(f, "IMPORT_UNIT_ERROR"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::TransportError => write!(f, "TRANSPORT_ERROR"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Serializable error details, suitable for logs and reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Exit code carried by the exit signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Wasm backtrace, when the failure was a trap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorReport {
    /// Create a new report
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            exit_code: None,
            stack: None,
        }
    }

    /// Attach the exit code
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attach a stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Main error type for the runner
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The module bytes could not be compiled
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// The module could not be linked or instantiated
    #[error("Instantiation error: {0}")]
    Instantiation(String),

    /// `__stack_sanitizer.report_stack_overflow` was called
    #[error("Detected stack buffer overflow.")]
    StackOverflow,

    /// The module exited through WASI `proc_exit`
    #[error("WASI Exit error: {0}")]
    Exit(i32),

    /// A Wasm trap (message carries the Wasm backtrace)
    #[error("Wasm trap: {message}")]
    Trap {
        /// Trap description
        message: String,
        /// Wasm backtrace, if captured
        backtrace: Option<String>,
    },

    /// Any other failure raised by host code during execution
    #[error("{0}")]
    Host(String),

    /// Import unit failure
    #[error("Import unit error: {0}")]
    ImportUnit(String),

    /// Wrong invocation
    #[error("{0}")]
    Usage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Dev server transport error (socket or fetch)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RunnerError {
    /// Classify an error returned by a Wasm call.
    ///
    /// `proc_exit` surfaces as `wasmtime_wasi::I32Exit`, the sanitizer as
    /// [`RunnerError::StackOverflow`], everything else as a trap or a host
    /// failure.
    pub fn from_execution(err: anyhow::Error) -> Self {
        if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
            return RunnerError::Exit(exit.0);
        }
        if let Some(RunnerError::StackOverflow) = err.downcast_ref::<RunnerError>() {
            return RunnerError::StackOverflow;
        }
        if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
            let backtrace = err
                .downcast_ref::<wasmtime::WasmBacktrace>()
                .map(|bt| bt.to_string());
            return RunnerError::Trap {
                message: trap.to_string(),
                backtrace,
            };
        }
        match err.downcast::<RunnerError>() {
            Ok(inner) => inner,
            Err(err) => RunnerError::Host(format!("{:#}", err)),
        }
    }

    /// Exit code if this is the distinguished exit signal
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunnerError::Exit(code) => Some(*code),
            _ => None,
        }
    }

    /// The error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RunnerError::Compilation(_) => ErrorCode::CompilationError,
            RunnerError::Instantiation(_) => ErrorCode::InstantiationError,
            RunnerError::StackOverflow => ErrorCode::StackOverflow,
            RunnerError::Exit(_) => ErrorCode::Exit,
            RunnerError::Trap { .. } | RunnerError::Host(_) => ErrorCode::ExecutionError,
            RunnerError::ImportUnit(_) => ErrorCode::ImportUnitError,
            RunnerError::Usage(_) | RunnerError::Config(_) => ErrorCode::InvalidArgument,
            RunnerError::Transport(_) => ErrorCode::TransportError,
            RunnerError::Serialization(_) => ErrorCode::SerializationError,
            RunnerError::Io(_) | RunnerError::InvalidState(_) => ErrorCode::InternalError,
        }
    }

    /// Convert to a serializable report
    pub fn to_report(&self) -> ErrorReport {
        let report = ErrorReport::new(self.code(), self.to_string());
        match self {
            RunnerError::Exit(code) => report.with_exit_code(*code),
            RunnerError::Trap {
                backtrace: Some(bt),
                ..
            } => report.with_stack(bt.clone()),
            _ => report,
        }
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for RunnerError {
    fn from(e: reqwest::Error) -> Self {
        RunnerError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RunnerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RunnerError::Transport(e.to_string())
    }
}

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// WASI errno values returned by the patched host functions
pub mod errno {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// Bad address
    pub const FAULT: i32 = 21;
    /// Invalid argument
    pub const INVAL: i32 = 28;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Exit.to_string(), "EXIT");
        assert_eq!(ErrorCode::StackOverflow.to_string(), "STACK_OVERFLOW");
    }

    #[test]
    fn test_exit_signal_classification() {
        let err = anyhow::Error::new(wasmtime_wasi::I32Exit(5));
        let classified = RunnerError::from_execution(err);
        assert_eq!(classified.exit_code(), Some(5));
        assert_eq!(classified.to_string(), "WASI Exit error: 5");
    }

    #[test]
    fn test_stack_overflow_classification() {
        let err = anyhow::Error::new(RunnerError::StackOverflow);
        let classified = RunnerError::from_execution(err);
        assert!(matches!(classified, RunnerError::StackOverflow));
        assert_eq!(classified.to_string(), "Detected stack buffer overflow.");
    }

    #[test]
    fn test_host_error_is_not_exit() {
        let classified = RunnerError::from_execution(anyhow::anyhow!("boom"));
        assert_eq!(classified.exit_code(), None);
        assert_eq!(classified.code(), ErrorCode::ExecutionError);
    }

    #[test]
    fn test_report_serialization() {
        let report = RunnerError::Exit(3).to_report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"code\":\"EXIT\""));
        assert!(json.contains("\"exitCode\":3"));
    }
}
