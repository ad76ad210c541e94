//! Interface diff between two component definitions.
//!
//! Used before swapping one definition for another in a composed pipeline:
//! the replacement must still offer every port and parameter the original
//! node is bound to, with compatible types, and must not require anything
//! the node does not supply.

use std::fmt;

use serde::Serialize;

use crate::definition::ComponentDefinition;

/// What differs between the two interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Present in the original, absent from the replacement.
    Missing,
    /// Present only in the replacement.
    Added,
    /// Present in both with incompatible types.
    TypeMismatch,
    /// Optional (or absent) in the original, required in the replacement.
    NewlyRequired,
}

/// Slot family of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotFamily {
    Input,
    Output,
    Parameter,
}

impl fmt::Display for SlotFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Parameter => "parameter",
        })
    }
}

/// One difference between the interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    pub family: SlotFamily,
    pub name: String,
    pub detail: String,
    /// Whether the difference prevents the replacement.
    pub breaking: bool,
}

impl fmt::Display for CompatibilityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.family, self.name, self.detail)
    }
}

/// Every difference found, breaking or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub issues: Vec<CompatibilityIssue>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        !self.issues.iter().any(|i| i.breaking)
    }

    pub fn breaking(&self) -> impl Iterator<Item = &CompatibilityIssue> {
        self.issues.iter().filter(|i| i.breaking)
    }

    /// Human-readable diff, one issue per line, breaking issues first.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self.breaking().map(|i| format!("- {}", i)).collect();
        lines.extend(
            self.issues
                .iter()
                .filter(|i| !i.breaking)
                .map(|i| format!("  {}", i)),
        );
        lines.join("\n")
    }

    fn push(&mut self, kind: IssueKind, family: SlotFamily, name: &str, detail: String, breaking: bool) {
        self.issues.push(CompatibilityIssue {
            kind,
            family,
            name: name.to_string(),
            detail,
            breaking,
        });
    }
}

/// Compare `old` against `replacement`.
///
/// `bound_inputs` and `bound_parameters` name the slots that carry
/// bindings on the node being replaced; slots missing from the replacement
/// are only breaking when bound. Outputs are always breaking when missing,
/// since downstream consumers are not tracked here.
pub fn validate_compatibility(
    old: &ComponentDefinition,
    replacement: &ComponentDefinition,
    bound_inputs: &[&str],
    bound_parameters: &[&str],
) -> CompatibilityReport {
    let mut report = CompatibilityReport::default();

    // ─── Inputs ───
    for input in &old.inputs {
        let bound = bound_inputs.contains(&input.name.as_str());
        match replacement.input(&input.name) {
            None => report.push(
                IssueKind::Missing,
                SlotFamily::Input,
                &input.name,
                "missing in the replacement".to_string(),
                bound,
            ),
            Some(new) => {
                let overlap = new.data_types.is_empty()
                    || input.data_types.is_empty()
                    || input.data_types.iter().any(|t| new.data_types.contains(t));
                if !overlap {
                    report.push(
                        IssueKind::TypeMismatch,
                        SlotFamily::Input,
                        &input.name,
                        format!(
                            "accepts [{}], was [{}]",
                            new.data_types.join(", "),
                            input.data_types.join(", ")
                        ),
                        true,
                    );
                }
                if !new.optional && !bound {
                    report.push(
                        IssueKind::NewlyRequired,
                        SlotFamily::Input,
                        &input.name,
                        "required by the replacement but not bound".to_string(),
                        true,
                    );
                }
            }
        }
    }
    for input in &replacement.inputs {
        if old.input(&input.name).is_none() {
            report.push(
                IssueKind::Added,
                SlotFamily::Input,
                &input.name,
                if input.optional {
                    "added (optional)".to_string()
                } else {
                    "added and required".to_string()
                },
                !input.optional,
            );
        }
    }

    // ─── Outputs ───
    for output in &old.outputs {
        match replacement.output(&output.name) {
            None => report.push(
                IssueKind::Missing,
                SlotFamily::Output,
                &output.name,
                "missing in the replacement".to_string(),
                true,
            ),
            Some(new) if new.data_type != output.data_type => report.push(
                IssueKind::TypeMismatch,
                SlotFamily::Output,
                &output.name,
                format!("produces {}, was {}", new.data_type, output.data_type),
                true,
            ),
            Some(_) => {}
        }
    }
    for output in &replacement.outputs {
        if old.output(&output.name).is_none() {
            report.push(
                IssueKind::Added,
                SlotFamily::Output,
                &output.name,
                "added".to_string(),
                false,
            );
        }
    }

    // ─── Parameters ───
    for param in &old.parameters {
        let bound = bound_parameters.contains(&param.name.as_str());
        match replacement.parameter(&param.name) {
            None => report.push(
                IssueKind::Missing,
                SlotFamily::Parameter,
                &param.name,
                "missing in the replacement".to_string(),
                bound,
            ),
            Some(new) => {
                if new.param_type() != param.param_type() {
                    report.push(
                        IssueKind::TypeMismatch,
                        SlotFamily::Parameter,
                        &param.name,
                        format!("is {}, was {}", new.param_type(), param.param_type()),
                        bound,
                    );
                }
                if !new.optional && !bound && param.optional {
                    report.push(
                        IssueKind::NewlyRequired,
                        SlotFamily::Parameter,
                        &param.name,
                        "required by the replacement but not bound".to_string(),
                        true,
                    );
                }
            }
        }
    }
    for param in &replacement.parameters {
        if old.parameter(&param.name).is_none() {
            report.push(
                IssueKind::Added,
                SlotFamily::Parameter,
                &param.name,
                if param.optional {
                    "added (optional)".to_string()
                } else {
                    "added and required".to_string()
                },
                !param.optional,
            );
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ComponentType, InputDefinition, OutputDefinition, ParameterDefinition};
    use crate::types::ParamType;

    fn def(inputs: Vec<InputDefinition>, outputs: Vec<OutputDefinition>, params: Vec<ParameterDefinition>) -> ComponentDefinition {
        let mut b = ComponentDefinition::builder("c", ComponentType::Command);
        for i in inputs {
            b = b.input(i);
        }
        for o in outputs {
            b = b.output(o);
        }
        for p in params {
            b = b.parameter(p);
        }
        b.build().unwrap()
    }

    #[test]
    fn test_identical_is_compatible() {
        let a = def(
            vec![InputDefinition::new("x", "AnyDirectory")],
            vec![OutputDefinition::new("y", "AnyDirectory")],
            vec![ParameterDefinition::new("k", ParamType::Int).with_default(1)],
        );
        let report = validate_compatibility(&a, &a, &["x"], &[]);
        assert!(report.is_compatible(), "{}", report.render());
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_missing_bound_input_is_breaking() {
        let old = def(vec![InputDefinition::new("x", "AnyDirectory")], vec![], vec![]);
        let new = def(vec![], vec![], vec![]);
        let report = validate_compatibility(&old, &new, &["x"], &[]);
        assert!(!report.is_compatible());
        assert_eq!(report.issues[0].kind, IssueKind::Missing);

        let report = validate_compatibility(&old, &new, &[], &[]);
        assert!(report.is_compatible());
    }

    #[test]
    fn test_output_and_type_changes() {
        let old = def(
            vec![],
            vec![OutputDefinition::new("y", "AnyDirectory")],
            vec![ParameterDefinition::new("k", ParamType::Int).with_default(1)],
        );
        let new = def(
            vec![InputDefinition::new("extra", "AnyFile")],
            vec![OutputDefinition::new("y", "AnyFile")],
            vec![ParameterDefinition::new("k", ParamType::Str).with_default("1")],
        );
        let report = validate_compatibility(&old, &new, &[], &["k"]);
        let kinds: Vec<_> = report.issues.iter().map(|i| (i.family, i.kind)).collect();
        assert!(kinds.contains(&(SlotFamily::Output, IssueKind::TypeMismatch)));
        assert!(kinds.contains(&(SlotFamily::Parameter, IssueKind::TypeMismatch)));
        assert!(kinds.contains(&(SlotFamily::Input, IssueKind::Added)));
        assert!(!report.is_compatible());
        assert!(report.render().contains("output 'y'"));
    }
}
