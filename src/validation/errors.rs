//! Validation error types.
//!
//! [`ValidationError`] is the single record used both for validation findings
//! and for fatal composition failures. It carries a stable [`ErrorCode`], the
//! qualified slot `path` of the offending input/parameter/output, a
//! human-readable `message`, and an optional `hint`.
//!
//! [`Finding`] is the flattened `{message, kind}` shape returned when
//! validation runs in non-raising mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error_code::ErrorCode;

// ─── Validation error ───────────────────────────────────────────────────────

/// A problem found in a composed pipeline or one of its nodes.
///
/// # Display format
///
/// ```text
/// [not_enabled] /train/sweep/runsettings/sweep.early_termination.slack_factor: ...
/// ```
///
/// # JSON format
///
/// ```json
/// {
///   "code": "missing_input",
///   "path": "/train/scorer/inputs/model",
///   "message": "Required input 'model' is not provided",
///   "hint": "Bind the input to a dataset or another node's output"
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {path}: {message}")]
pub struct ValidationError {
    /// Stable error code for programmatic matching.
    pub code: ErrorCode,

    /// Qualified slot name, e.g. `"/pipeline/node/inputs/x"`, or `""` for
    /// pipeline-level problems.
    pub path: String,

    /// Human-readable description naming the offending slot.
    pub message: String,

    /// Optional suggestion for how to fix the problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(code: ErrorCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a hint suggesting how to fix the problem.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Convert into the non-raising `{message, kind}` shape.
    pub fn to_finding(&self) -> Finding {
        Finding {
            message: if self.path.is_empty() {
                self.message.clone()
            } else {
                format!("{}: {}", self.path, self.message)
            },
            kind: self.code,
        }
    }
}

// ─── Finding ────────────────────────────────────────────────────────────────

/// One entry of a non-raising validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub message: String,
    pub kind: ErrorCode,
}

impl From<&ValidationError> for Finding {
    fn from(err: &ValidationError) -> Self {
        err.to_finding()
    }
}
