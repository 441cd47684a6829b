//! Error types for the debugger
//!
//! Every failure a client can observe maps to a stable code, so DAP clients
//! and REPL users see the same classification for the same problem.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("Cannot {action} while the session is {state}")]
    InvalidState { action: String, state: String },

    #[error("No stack available: the program is not stopped")]
    NoActiveStack,

    #[error("Unknown {kind} reference {id}. References are invalidated when execution resumes")]
    UnknownReference { kind: &'static str, id: i64 },

    // === Evaluator Errors ===
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Evaluator failure: {0}")]
    FatalEvaluator(String),

    #[error("Failed to load '{path}': {error}")]
    SourceLoad { path: String, error: String },

    #[error("Invalid bindings: {0}")]
    InvalidBindings(String),

    // === Protocol Errors ===
    #[error("Malformed message: {0}")]
    Transport(String),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error("Invalid arguments for '{command}': {message}")]
    InvalidArguments { command: String, message: String },

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("Timed out after {0} seconds waiting for the debugger")]
    Timeout(u64),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create an unknown reference error
    pub fn unknown_reference(kind: &'static str, id: i64) -> Self {
        Self::UnknownReference { kind, id }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(command: &str, message: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Stable string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::NoActiveStack => "NO_ACTIVE_STACK",
            Error::UnknownReference { .. } => "UNKNOWN_REFERENCE",
            Error::Evaluation(_) => "EVALUATION_ERROR",
            Error::FatalEvaluator(_) => "FATAL_EVALUATOR_ERROR",
            Error::SourceLoad { .. } | Error::FileRead { .. } => "SOURCE_LOAD_FAILED",
            Error::InvalidBindings(_) => "INVALID_BINDINGS",
            Error::Transport(_) | Error::Json(_) => "TRANSPORT_ERROR",
            Error::UnsupportedCommand(_) => "UNSUPPORTED_COMMAND",
            Error::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Error::Timeout(_) => "TIMEOUT",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Stable numeric id for this error, used in DAP `Message.id`
    pub fn numeric_id(&self) -> i64 {
        match self.code() {
            "INVALID_STATE" => 1001,
            "NO_ACTIVE_STACK" => 1002,
            "UNKNOWN_REFERENCE" => 1003,
            "EVALUATION_ERROR" => 1004,
            "FATAL_EVALUATOR_ERROR" => 1005,
            "TRANSPORT_ERROR" => 1006,
            "UNSUPPORTED_COMMAND" => 1007,
            "INVALID_ARGUMENTS" => 1008,
            "SOURCE_LOAD_FAILED" => 1009,
            "INVALID_BINDINGS" => 1010,
            "TIMEOUT" => 1011,
            _ => 1999,
        }
    }

    /// Whether this error ends the debug session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalEvaluator(_))
    }
}

/// Serializable error for responses
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub id: i64,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            id: e.numeric_id(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_code_is_stable() {
        let err = Error::invalid_state("pause", "configuring");
        let info = ErrorInfo::from(&err);
        assert_eq!(info.code, "INVALID_STATE");
        assert_eq!(info.id, 1001);
        assert_eq!(info.message, "Cannot pause while the session is configuring");
    }

    #[test]
    fn test_only_evaluator_failures_are_fatal() {
        assert!(Error::FatalEvaluator("boom".into()).is_fatal());
        assert!(!Error::Evaluation("bad".into()).is_fatal());
        assert!(!Error::NoActiveStack.is_fatal());
    }
}
