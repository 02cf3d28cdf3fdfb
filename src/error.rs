//! Error types for the execution host.
//!
//! Every failure mode in the host is recoverable and surfaces as a
//! [`HostError`]; no script input or cache blob may terminate the process.

use thiserror::Error;

/// Source location information for compile errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One frame of a script stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub function: Option<String>,
    pub filename: Option<String>,
    pub line: u32,
}

impl std::fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.function.as_deref().unwrap_or("<anonymous>");
        let file = self.filename.as_deref().unwrap_or("<eval>");
        write!(f, "    at {} ({}:{})", name, file, self.line)
    }
}

/// Structured record of a script-level exception.
///
/// `native_origin` is set when the exception originated in a native binding
/// rather than in script code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub message: String,
    pub stack: Vec<FrameInfo>,
    pub native_origin: bool,
}

impl std::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.stack {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

/// Main error type for the execution host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("CompileError: {message} at {location}")]
    Compile {
        message: String,
        location: SourceLocation,
    },

    #[error("Exception: {0}")]
    Exception(ExceptionInfo),

    #[error("OutOfMemory: heap limit of {limit} bytes exceeded")]
    OutOfMemory { limit: usize },

    #[error("Interrupted: execution cancelled")]
    Interrupted,

    #[error("MarshalError: {0}")]
    Marshal(String),

    #[error("InvalidHandle: {0} used after destruction")]
    InvalidHandle(&'static str),

    #[error("ContextBusy: context is already running")]
    ContextBusy,

    #[error("CacheVersionMismatch: {reason} (expected {expected}, found {found})")]
    CacheVersionMismatch {
        reason: &'static str,
        expected: String,
        found: String,
    },

    #[error("LiveContexts: engine still owns {count} live context(s)")]
    LiveContexts { count: usize },

    /// Unexpected interpreter state; indicates a bug in the host, never a
    /// script-triggerable condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    pub fn compile(message: impl Into<String>, line: u32, column: u32) -> Self {
        HostError::Compile {
            message: message.into(),
            location: SourceLocation { line, column },
        }
    }

    pub fn marshal(message: impl Into<String>) -> Self {
        HostError::Marshal(message.into())
    }

    /// True when the error carries a script-thrown exception (as opposed to
    /// a host-level failure such as an invalid handle).
    pub fn is_exception(&self) -> bool {
        matches!(self, HostError::Exception(_))
    }

    /// The exception record, if this error is one.
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match self {
            HostError::Exception(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_display_includes_stack() {
        let err = HostError::Exception(ExceptionInfo {
            message: "Error: boom".to_string(),
            stack: vec![FrameInfo {
                function: Some("f".to_string()),
                filename: Some("main.js".to_string()),
                line: 3,
            }],
            native_origin: false,
        });
        let text = err.to_string();
        assert!(text.contains("Error: boom"));
        assert!(text.contains("at f (main.js:3)"));
    }

    #[test]
    fn compile_error_carries_location() {
        let err = HostError::compile("unexpected token", 2, 7);
        assert_eq!(err.to_string(), "CompileError: unexpected token at 2:7");
    }
}
