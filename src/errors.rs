//! Error types for ml_component
//!
//! Composition, lowering and catalogue failures all surface through
//! [`ComponentError`]. Every variant maps to a stable
//! [`ErrorCode`](crate::validation::ErrorCode) via [`ComponentError::code`].

use thiserror::Error;

use crate::validation::{ErrorCode, ValidationError};

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ComponentError>;

/// Main error type for ml_component
#[derive(Error, Debug, Clone)]
pub enum ComponentError {
    /// A code-tagged problem with a specific slot (validation finding or
    /// fatal composition error)
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Batch definition lookup returned partial results
    #[error(
        "Batch load failed, failed version_ids: {failed_ids:?}, failed identifiers: {failed_selectors:?}"
    )]
    Registry {
        failed_ids: Vec<String>,
        failed_selectors: Vec<String>,
    },

    /// Builder stack exceeded its maximum depth
    #[error("Pipeline recursion: builder depth {depth} exceeded{}", render_cycle(.cycle))]
    Recursion { depth: usize, cycle: Vec<String> },

    /// Configuration validation failed
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A component spec could not be interpreted
    #[error("Invalid component spec: {message}")]
    InvalidSpec { message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A node handle does not refer to a node of the expected kind
    #[error("Unknown node: {message}")]
    UnknownNode { message: String },
}

fn render_cycle(cycle: &[String]) -> String {
    if cycle.is_empty() {
        String::new()
    } else {
        format!(", detected cycle: {}", cycle.join(" -> "))
    }
}

impl ComponentError {
    /// Create a code-tagged error for `path`
    pub fn validation(code: ErrorCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(code, path, message))
    }

    /// Create a registry failure error
    pub fn registry(failed_ids: Vec<String>, failed_selectors: Vec<String>) -> Self {
        Self::Registry {
            failed_ids,
            failed_selectors,
        }
    }

    /// Create a recursion error
    pub fn recursion(depth: usize, cycle: Vec<String>) -> Self {
        Self::Recursion { depth, cycle }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid spec error
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an unknown node error
    pub fn unknown_node(message: impl Into<String>) -> Self {
        Self::UnknownNode {
            message: message.into(),
        }
    }

    /// Fill in the slot path of a validation error raised without one
    pub fn at_path(self, path: &str) -> Self {
        match self {
            Self::Validation(mut err) if err.path.is_empty() => {
                err.path = path.to_string();
                Self::Validation(err)
            }
            other => other,
        }
    }

    /// Stable kind tag for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(err) => err.code,
            Self::Registry { .. } => ErrorCode::RegistryFailure,
            Self::Recursion { .. } => ErrorCode::PipelineRecursion,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::InvalidSpec { .. } => ErrorCode::InvalidSpec,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::UnknownNode { .. } => ErrorCode::UnknownNode,
        }
    }

    /// The underlying validation record, if this is a slot-level error
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ComponentError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
