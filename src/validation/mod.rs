//! Validation of composed pipelines.
//!
//! - [`error_code`]: stable kind tags shared with composition errors
//! - [`errors`]: the code-tagged [`ValidationError`] record and [`Finding`]
//! - [`engine`]: per-node rules and the pipeline-level checks
//! - [`compatibility`]: interface diff used before replacing a component

pub mod compatibility;
pub mod engine;
pub mod error_code;
pub mod errors;

pub use compatibility::{
    validate_compatibility, CompatibilityIssue, CompatibilityReport, IssueKind, SlotFamily,
};
pub use engine::{NodeContext, ValidateOptions, ValidationEngine, ValidationMode, ValidationRule};
pub use error_code::ErrorCode;
pub use errors::{Finding, ValidationError};
