use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable error classification shared by every runner component.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Local I/O failure (reading lessons, config, local sandbox files).
    #[serde(rename = "E_IO")]
    Io,
    /// The sandbox could not be booted. Fatal for the session.
    #[serde(rename = "E_SANDBOX_BOOT")]
    SandboxBoot,
    /// A sandbox call (mount, fs, spawn) failed.
    #[serde(rename = "E_SANDBOX")]
    Sandbox,
    /// A sandboxed process could not be driven.
    #[serde(rename = "E_PROCESS")]
    Process,
    /// Lesson data violates a schema constraint.
    #[serde(rename = "E_INVALID_SCHEMA")]
    InvalidSchema,
    /// Work was cancelled and the caller asked to observe it as a failure.
    #[serde(rename = "E_CANCELLED")]
    Cancelled,
    /// Should-never-happen bookkeeping failure.
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "E_IO",
            Self::SandboxBoot => "E_SANDBOX_BOOT",
            Self::Sandbox => "E_SANDBOX",
            Self::Process => "E_PROCESS",
            Self::InvalidSchema => "E_INVALID_SCHEMA",
            Self::Cancelled => "E_CANCELLED",
            Self::Internal => "E_INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("{code}: {message}")]
#[diagnostic(code(tutorial_runner::error))]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Io, message).with_source(err)
    }

    pub fn boot(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::SandboxBoot, message).with_source(err)
    }

    pub fn sandbox(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Sandbox, message).with_source(err)
    }

    pub fn process(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Process, message).with_source(err)
    }

    pub fn invalid_schema(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::InvalidSchema,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "task was cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    fn with_source(self, err: impl fmt::Display) -> Self {
        self.with_context(serde_json::json!({ "source": err.to_string() }))
    }
}
