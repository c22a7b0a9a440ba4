//! Error types for the judging core
//!
//! Judged outcomes (wrong answer, runtime error, ...) are never errors: they
//! travel as [`crate::core::status::Status`] inside case results. The types here
//! are reserved for faults that abort a run or a sandbox call.

use thiserror::Error;

use crate::core::message::Message;

/// Fault raised by the sandbox RPC client
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox service could not be reached or the request failed in flight
    #[error("Cannot connect to sandbox service: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sandbox answered with a body we could not interpret
    #[error("Malformed sandbox response: {0}")]
    Protocol(String),

    /// The sandbox answered with a non-success HTTP status
    #[error("Sandbox returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Streaming connection failure
    #[error("Sandbox stream error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Fault that aborts (part of) a judging run
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Malformed or policy-violating test data / configuration
    #[error("Format error: {0}")]
    Format(Message),

    /// Compilation failed; carries the compiler's captured output
    #[error("Compile error")]
    Compile {
        stdout: String,
        stderr: String,
        message: Option<String>,
    },

    /// Infrastructure fault (unknown checker, missing language, ...)
    #[error("System error: {0}")]
    System(Message),

    /// Sandbox transport/protocol fault
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl JudgeError {
    pub fn format(message: impl Into<String>) -> Self {
        JudgeError::Format(Message::new(message))
    }

    pub fn format_with(message: impl Into<String>, params: Vec<String>) -> Self {
        JudgeError::Format(Message::with_params(message, params))
    }

    pub fn system(message: impl Into<String>) -> Self {
        JudgeError::System(Message::new(message))
    }

    pub fn system_with(message: impl Into<String>, params: Vec<String>) -> Self {
        JudgeError::System(Message::with_params(message, params))
    }

    pub fn compile(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        JudgeError::Compile {
            stdout: stdout.into(),
            stderr: stderr.into(),
            message: None,
        }
    }

    pub fn compile_message(message: impl Into<String>) -> Self {
        JudgeError::Compile {
            stdout: String::new(),
            stderr: String::new(),
            message: Some(message.into()),
        }
    }

    /// Errors that must abort the whole run even when raised for a single case
    pub fn is_fatal(&self) -> bool {
        matches!(self, JudgeError::Format(_) | JudgeError::Compile { .. })
    }
}

impl From<std::io::Error> for JudgeError {
    fn from(e: std::io::Error) -> Self {
        JudgeError::system_with("IO error: {0}", vec![e.to_string()])
    }
}

pub type Result<T, E = JudgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(JudgeError::format("bad").is_fatal());
        assert!(JudgeError::compile("", "boom").is_fatal());
        assert!(!JudgeError::system("down").is_fatal());
        assert!(!JudgeError::Sandbox(SandboxError::Protocol("x".into())).is_fatal());
    }

    #[test]
    fn test_format_error_renders_params() {
        let err = JudgeError::format_with("Cannot find input file {0}.", vec!["1.in".into()]);
        assert_eq!(err.to_string(), "Format error: Cannot find input file 1.in.");
    }
}
