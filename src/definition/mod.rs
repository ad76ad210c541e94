//! Component definitions: the immutable interface of a reusable unit.
//!
//! A [`ComponentDefinition`] lists typed input ports, output ports, scalar
//! parameters and the run-setting schema. Definitions are shared as
//! `Arc<ComponentDefinition>` by every instance created from them.

pub mod builder;
pub mod runsettings;
pub mod selector;
pub mod spec;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ComponentError, Result};
use crate::types::{parse_bool, ParamType, ParamValue};
use crate::validation::ErrorCode;

pub use builder::ComponentDefinitionBuilder;
pub use runsettings::{JsonShape, RunSettingEntry, RunSettingParam, RunSettingsDefinition};
pub use selector::ComponentSelector;
pub use spec::{load_from_spec, ComponentSpec};

// ─── Component type ─────────────────────────────────────────────────────────

/// Execution family of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    #[default]
    Command,
    Distributed,
    Parallel,
    HDInsight,
    Scope,
    Sweep,
    Pipeline,
}

impl ComponentType {
    /// Step type reported in module node run settings.
    pub fn step_type(&self) -> &'static str {
        match self {
            Self::Command => "CommandComponent",
            Self::Distributed => "DistributedComponent",
            Self::Parallel => "ParallelComponent",
            Self::HDInsight => "HDInsightComponent",
            Self::Scope => "ScopeModule",
            Self::Sweep => "SweepComponent",
            Self::Pipeline => "PipelineComponent",
        }
    }

    /// Scope components run on a fixed service and take no compute target.
    pub fn uses_compute(&self) -> bool {
        !matches!(self, Self::Scope | Self::Pipeline)
    }
}

impl FromStr for ComponentType {
    type Err = ComponentError;

    /// Accepts `CommandComponent@1` style names as well as legacy aliases
    /// (`basic`, `mpi`, `mpicomponent`, ...). The version suffix is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let base = s.split('@').next().unwrap_or(s).trim().to_ascii_lowercase();
        let base = base.strip_suffix("component").unwrap_or(&base);
        match base {
            "command" | "basic" | "" => Ok(Self::Command),
            "distributed" | "mpi" => Ok(Self::Distributed),
            "parallel" => Ok(Self::Parallel),
            "hdinsight" => Ok(Self::HDInsight),
            "scope" => Ok(Self::Scope),
            "sweep" => Ok(Self::Sweep),
            "pipeline" => Ok(Self::Pipeline),
            _ => Err(ComponentError::invalid_spec(format!(
                "unknown component type '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_type())
    }
}

// ─── Scalar schema ──────────────────────────────────────────────────────────

/// A constraint violation found while checking a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueIssue {
    pub code: ErrorCode,
    pub message: String,
}

/// Type, inclusive bounds and accepted values of a scalar slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScalarSchema {
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl ScalarSchema {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            ..Self::default()
        }
    }

    /// Coerce `value` and check bounds and enum membership.
    pub fn check(&self, value: &ParamValue) -> std::result::Result<ParamValue, ValueIssue> {
        let coerced = value.coerce(self.param_type).map_err(|message| ValueIssue {
            code: ErrorCode::TypeMismatch,
            message,
        })?;

        if let Some(n) = coerced.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(ValueIssue {
                        code: ErrorCode::OutOfRange,
                        message: format!("value {} is less than the minimum {}", coerced, min),
                    });
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(ValueIssue {
                        code: ErrorCode::OutOfRange,
                        message: format!("value {} is greater than the maximum {}", coerced, max),
                    });
                }
            }
        }

        if !self.enum_values.is_empty() {
            let rendered = coerced.render();
            if !self.enum_values.iter().any(|v| *v == rendered) {
                return Err(ValueIssue {
                    code: ErrorCode::NotInEnum,
                    message: format!(
                        "value '{}' is not one of [{}]",
                        rendered,
                        self.enum_values.join(", ")
                    ),
                });
            }
        }

        Ok(coerced)
    }
}

// ─── Enable/disable dependencies ────────────────────────────────────────────

/// "Only meaningful when `parameter` holds one of `values`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledBy {
    pub parameter: String,
    pub values: Vec<String>,
}

impl EnabledBy {
    pub fn new<I, S>(parameter: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameter: parameter.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `value` is one of the activating values. Booleans compare by
    /// meaning, so `"true"` activates on `True`.
    pub fn is_activated_by(&self, value: &ParamValue) -> bool {
        let rendered = value.render();
        self.values.iter().any(|v| {
            *v == rendered
                || match (parse_bool(v), value) {
                    (Some(b), ParamValue::Bool(actual)) => b == *actual,
                    _ => false,
                }
        })
    }
}

/// Reject dependency cycles among enable/disable relations.
///
/// `edges` maps each name to the names it depends on. On a cycle the error
/// carries the chain that closed it, e.g. `a -> b -> a`.
pub fn check_dependency_cycles(edges: &[(String, Vec<String>)], owner: &str) -> Result<()> {
    let index: FxHashMap<&str, usize> = edges
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();

    // 0 = unvisited, 1 = on stack, 2 = done
    let mut state = vec![0u8; edges.len()];
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        i: usize,
        edges: &[(String, Vec<String>)],
        index: &FxHashMap<&str, usize>,
        state: &mut [u8],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        state[i] = 1;
        stack.push(i);
        for dep in &edges[i].1 {
            let Some(&j) = index.get(dep.as_str()) else {
                continue;
            };
            if state[j] == 1 {
                let start = stack.iter().position(|&k| k == j).unwrap_or(0);
                let mut chain: Vec<String> =
                    stack[start..].iter().map(|&k| edges[k].0.clone()).collect();
                chain.push(edges[j].0.clone());
                return Some(chain);
            }
            if state[j] == 0 {
                if let Some(chain) = visit(j, edges, index, state, stack) {
                    return Some(chain);
                }
            }
        }
        stack.pop();
        state[i] = 2;
        None
    }

    for i in 0..edges.len() {
        if state[i] == 0 {
            if let Some(chain) = visit(i, edges, &index, &mut state, &mut stack) {
                return Err(ComponentError::validation(
                    ErrorCode::DependencyCycle,
                    owner,
                    format!("enable/disable dependency cycle: {}", chain.join(" -> ")),
                ));
            }
        }
    }
    Ok(())
}

// ─── Port and parameter definitions ─────────────────────────────────────────

/// A typed data input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    /// Declared port name, used on graph edges.
    pub name: String,
    /// Identifier-safe alias used when binding by argument.
    pub argument_name: String,
    pub data_types: Vec<String>,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            argument_name: crate::types::sanitize_argument_name(&name),
            name,
            data_types: vec![data_type.into()],
            optional: false,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_types = types.into_iter().map(Into::into).collect();
        self
    }
}

/// A typed data output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
    pub name: String,
    pub argument_name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            argument_name: crate::types::sanitize_argument_name(&name),
            name,
            data_type: data_type.into(),
            description: None,
        }
    }
}

/// A scalar parameter slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub argument_name: String,
    pub schema: ScalarSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_by: Option<EnabledBy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        let name = name.into();
        Self {
            argument_name: crate::types::sanitize_argument_name(&name),
            name,
            schema: ScalarSchema::new(param_type),
            default: None,
            optional: false,
            enabled_by: None,
            disabled_by: Vec::new(),
            description: None,
        }
    }

    pub fn param_type(&self) -> ParamType {
        self.schema.param_type
    }

    /// Set the default (coerced later by the definition builder). A
    /// parameter is optional exactly when it has a default.
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self.optional = true;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.schema.min = min;
        self.schema.max = max;
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn enabled_by<I, S>(mut self, parameter: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_by = Some(EnabledBy::new(parameter, values));
        self
    }

    pub fn disabled_by(mut self, parameter: impl Into<String>) -> Self {
        self.disabled_by.push(parameter.into());
        self
    }
}

// ─── Component definition ───────────────────────────────────────────────────

/// Immutable description of a reusable computational unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentDefinition {
    /// Catalogue identifier (an id, or `name:version`).
    pub identifier: String,
    pub name: String,
    pub version: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub namespace: Option<String>,
    pub component_type: ComponentType,
    pub inputs: Vec<InputDefinition>,
    pub outputs: Vec<OutputDefinition>,
    pub parameters: Vec<ParameterDefinition>,
    pub runsettings: Arc<RunSettingsDefinition>,
    pub command: Option<String>,
    pub environment: Option<serde_json::Value>,
    pub allowed_projects: Vec<String>,
    /// Workspace the definition was loaded from, if any.
    pub workspace: Option<String>,
    pub is_deterministic: bool,
}

impl ComponentDefinition {
    pub fn builder(name: impl Into<String>, component_type: ComponentType) -> ComponentDefinitionBuilder {
        ComponentDefinitionBuilder::new(name, component_type)
    }

    /// Find an input by argument name or declared name.
    pub fn input(&self, key: &str) -> Option<&InputDefinition> {
        self.inputs
            .iter()
            .find(|i| i.argument_name == key)
            .or_else(|| self.inputs.iter().find(|i| i.name == key))
    }

    pub fn output(&self, key: &str) -> Option<&OutputDefinition> {
        self.outputs
            .iter()
            .find(|o| o.argument_name == key)
            .or_else(|| self.outputs.iter().find(|o| o.name == key))
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterDefinition> {
        self.parameters
            .iter()
            .find(|p| p.argument_name == key)
            .or_else(|| self.parameters.iter().find(|p| p.name == key))
    }

    pub fn input_index(&self, key: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|i| i.argument_name == key || i.name == key)
    }

    pub fn parameter_index(&self, key: &str) -> Option<usize> {
        self.parameters
            .iter()
            .position(|p| p.argument_name == key || p.name == key)
    }

    /// Check internal consistency: unique names and acyclic enable/disable
    /// relations among parameters.
    pub fn validate(&self) -> Result<()> {
        let mut seen: FxHashMap<&str, &str> = FxHashMap::default();
        let names = self
            .inputs
            .iter()
            .map(|i| (i.argument_name.as_str(), "input"))
            .chain(self.parameters.iter().map(|p| (p.argument_name.as_str(), "parameter")));
        for (name, kind) in names {
            if let Some(prev) = seen.insert(name, kind) {
                return Err(ComponentError::invalid_spec(format!(
                    "component '{}' declares '{}' as both {} and {}",
                    self.name, name, prev, kind
                )));
            }
        }

        let edges: Vec<(String, Vec<String>)> = self
            .parameters
            .iter()
            .map(|p| {
                let mut deps: Vec<String> = p
                    .enabled_by
                    .iter()
                    .map(|e| e.parameter.clone())
                    .collect();
                deps.extend(p.disabled_by.iter().cloned());
                (p.name.clone(), deps)
            })
            .collect();
        check_dependency_cycles(&edges, &format!("/{}/parameters", self.name))
    }
}
