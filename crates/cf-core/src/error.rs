//! Unified error type for clipforge.
//!
//! Every crate funnels its failures into [`Error`], which carries enough
//! context for the HTTP layer to derive a status code via
//! [`Error::http_status`] and a stable machine code via [`Error::code`].
//! Messages never carry scratch-directory paths; engine diagnostics are
//! reduced through [`diagnostic_excerpt`] before they reach a variant.

use std::path::Path;
use std::time::Duration;

/// Maximum number of characters of engine output kept in an error.
pub const EXCERPT_LIMIT: usize = 200;

/// Unified error type covering all failure modes in clipforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation parameters were malformed or out of range. Raised before any
    /// subprocess is launched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A pipeline stage ran to completion but exited unsuccessfully.
    #[error("Stage '{stage}' failed ({}): {excerpt}", describe_exit(.exit_code))]
    StageExecution {
        /// Label of the stage that failed.
        stage: String,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
        /// Bounded, path-redacted tail of the captured engine output.
        excerpt: String,
    },

    /// A pipeline stage exceeded its timeout and was forcibly terminated.
    #[error("Stage '{stage}' timed out after {}s", .timeout.as_secs())]
    StageTimeout {
        /// Label of the stage that timed out.
        stage: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The external engine could not be started at all.
    #[error("Failed to launch {tool}: {message}")]
    Launch {
        /// Name of the tool that could not be started.
        tool: String,
        /// Human-readable cause (missing binary, permission denied, ...).
        message: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller exceeded its admission quota.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound { .. } => 404,
            Error::RateLimited => 429,
            Error::StageExecution { .. } => 502,
            Error::Launch { .. } => 503,
            Error::StageTimeout { .. } => 504,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::StageExecution { .. } => "stage_failed",
            Error::StageTimeout { .. } => "stage_timeout",
            Error::Launch { .. } => "launch_failed",
            Error::NotFound { .. } => "not_found",
            Error::RateLimited => "rate_limited",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Launch`].
    pub fn launch(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Launch {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Reduce raw engine output to something safe to show a caller.
///
/// Occurrences of `redact` (the scratch directory) are replaced with
/// `<scratch>`, surrounding whitespace is trimmed, and the result is bounded
/// to [`EXCERPT_LIMIT`] characters. The tail is kept because engines report
/// the actual failure last, after their banner.
pub fn diagnostic_excerpt(output: &str, redact: Option<&Path>) -> String {
    let redacted = match redact {
        Some(dir) => {
            let needle = dir.to_string_lossy();
            if needle.is_empty() {
                output.to_string()
            } else {
                output.replace(needle.as_ref(), "<scratch>")
            }
        }
        None => output.to_string(),
    };
    let trimmed = redacted.trim();

    let count = trimmed.chars().count();
    if count <= EXCERPT_LIMIT {
        return trimmed.to_string();
    }

    let tail: String = trimmed.chars().skip(count - (EXCERPT_LIMIT - 1)).collect();
    format!("…{tail}")
}
