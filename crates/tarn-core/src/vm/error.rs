//! Runtime error types and host exit codes.

use std::fmt;

/// What class of runtime failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator or operation applied to incompatible types.
    Type,
    /// Division or modulo by zero.
    Arithmetic,
    /// nil (or NaN) used as a table key.
    Key,
    /// Stack overflow, bad global, or another resource limit.
    Limit,
}

/// A runtime error carried up the dispatch loop as a `Result`.
/// The VM attaches source lines and the stack trace when it surfaces
/// the error to the host.
#[derive(Clone, Debug)]
pub struct VmError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
        }
    }

    pub fn type_err(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arithmetic, message)
    }

    pub fn key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Key, message)
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Limit, message)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VmError {}

/// Outcome of running a chunk, as reported to the embedder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    CompileError,
    RuntimeError,
}

impl ExitCode {
    /// Conventional process exit code for this outcome.
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::CompileError => 65,
            ExitCode::RuntimeError => 70,
        }
    }
}
