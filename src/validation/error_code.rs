//! Stable error codes shared by validation findings and composition errors.
//!
//! Codes serialize as `snake_case` strings and display the same way, so the
//! value a caller matches on is the value printed in messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Short, stable kind tag attached to every finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ─── Slot presence ──────────────────────────────────────────────────
    MissingInput,
    MissingParameter,
    MissingRunSetting,

    // ─── Value constraints ──────────────────────────────────────────────
    TypeMismatch,
    OutOfRange,
    NotInEnum,
    NotEnabled,
    Disabled,

    // ─── Environment ────────────────────────────────────────────────────
    InvalidCompute,
    InvalidDatastore,

    // ─── Composition ────────────────────────────────────────────────────
    InvalidInputPort,
    DuplicateNode,
    WorkspaceAffinity,
    PipelineRecursion,
    UnknownArgument,
    OutOfScope,
    UnresolvedReference,

    // ─── Pipeline level ─────────────────────────────────────────────────
    EmptyPipeline,
    ModuleCycle,
    DependencyCycle,
    IncompatibleInterface,

    // ─── Catalogue & plumbing ───────────────────────────────────────────
    RegistryFailure,
    InvalidSelector,
    InvalidSpec,
    InvalidConfig,
    UnknownNode,
    Serialization,
}

impl ErrorCode {
    /// Returns the serialized tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInput => "missing_input",
            Self::MissingParameter => "missing_parameter",
            Self::MissingRunSetting => "missing_run_setting",
            Self::TypeMismatch => "type_mismatch",
            Self::OutOfRange => "out_of_range",
            Self::NotInEnum => "not_in_enum",
            Self::NotEnabled => "not_enabled",
            Self::Disabled => "disabled",
            Self::InvalidCompute => "invalid_compute",
            Self::InvalidDatastore => "invalid_datastore",
            Self::InvalidInputPort => "invalid_input_port",
            Self::DuplicateNode => "duplicate_node",
            Self::WorkspaceAffinity => "workspace_affinity",
            Self::PipelineRecursion => "pipeline_recursion",
            Self::UnknownArgument => "unknown_argument",
            Self::OutOfScope => "out_of_scope",
            Self::UnresolvedReference => "unresolved_reference",
            Self::EmptyPipeline => "empty_pipeline",
            Self::ModuleCycle => "module_cycle",
            Self::DependencyCycle => "dependency_cycle",
            Self::IncompatibleInterface => "incompatible_interface",
            Self::RegistryFailure => "registry_failure",
            Self::InvalidSelector => "invalid_selector",
            Self::InvalidSpec => "invalid_spec",
            Self::InvalidConfig => "invalid_config",
            Self::UnknownNode => "unknown_node",
            Self::Serialization => "serialization",
        }
    }

    /// Whether this code is reported by per-node validation (as opposed to
    /// composition, which always fails fast).
    pub fn is_validation_finding(&self) -> bool {
        matches!(
            self,
            Self::MissingInput
                | Self::MissingParameter
                | Self::MissingRunSetting
                | Self::TypeMismatch
                | Self::OutOfRange
                | Self::NotInEnum
                | Self::NotEnabled
                | Self::Disabled
                | Self::InvalidCompute
                | Self::InvalidDatastore
                | Self::InvalidInputPort
                | Self::EmptyPipeline
                | Self::ModuleCycle
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde_tag() {
        for code in [
            ErrorCode::MissingInput,
            ErrorCode::NotEnabled,
            ErrorCode::InvalidDatastore,
            ErrorCode::PipelineRecursion,
            ErrorCode::RegistryFailure,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
        }
    }

    #[test]
    fn test_roundtrip_from_tag() {
        let code: ErrorCode = serde_json::from_str("\"missing_run_setting\"").unwrap();
        assert_eq!(code, ErrorCode::MissingRunSetting);
    }

    #[test]
    fn test_validation_finding_partition() {
        assert!(ErrorCode::OutOfRange.is_validation_finding());
        assert!(!ErrorCode::WorkspaceAffinity.is_validation_finding());
        assert!(!ErrorCode::RegistryFailure.is_validation_finding());
    }
}
