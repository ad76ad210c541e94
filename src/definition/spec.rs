//! Declarative component specs.
//!
//! A [`ComponentSpec`] is the JSON form of a component. Inputs and scalar
//! parameters share one ordered `inputs` list and are told apart by type:
//! scalar type names (`integer`, `float`, `boolean`, `string`, `enum`)
//! declare parameters, anything else declares a data port.
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "name": "sweep_trainer",
//!   "version": "0.0.1",
//!   "type": "SweepComponent@1",
//!   "inputs": [
//!     { "name": "training_data", "type": "AnyDirectory" },
//!     { "name": "learning_rate", "type": "float", "default": 0.01, "min": 0, "max": 1 }
//!   ],
//!   "outputs": [ { "name": "model", "type": "AnyDirectory" } ],
//!   "runsettings": [
//!     { "id": "target", "type": "string", "is_compute_target": true,
//!       "valid_compute_types": ["AmlCompute"] },
//!     { "id": "sweep.early_termination.policy_type", "type": "enum",
//!       "enum": ["bandit", "median"], "optional": true }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{ComponentError, Result};
use crate::types::{ParamType, ParamValue};

use super::{
    ComponentDefinition, ComponentDefinitionBuilder, ComponentType, EnabledBy, InputDefinition,
    JsonShape, OutputDefinition, ParameterDefinition, RunSettingParam,
};

/// A type declaration: one name or a list of accepted names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    One(String),
    Many(Vec<String>),
}

impl TypeSpec {
    fn names(&self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name.clone()],
            Self::Many(names) => names.clone(),
        }
    }

    /// Scalar type when this declares a parameter.
    fn scalar(&self) -> Option<ParamType> {
        match self {
            Self::One(name) => ParamType::from_spec_name(name),
            Self::Many(_) => None,
        }
    }
}

/// An `inputs` entry: data port or scalar parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: TypeSpec,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<serde_json::Value>,
    #[serde(default)]
    pub enabled_by: Option<EnabledBy>,
    #[serde(default)]
    pub disabled_by: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// An `outputs` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub output_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_output_type() -> String {
    "AnyDirectory".to_string()
}

/// A `runsettings` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettingSpec {
    pub id: String,
    #[serde(rename = "type", default = "default_setting_type")]
    pub value_type: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<serde_json::Value>,
    #[serde(default)]
    pub is_compute_target: bool,
    #[serde(default)]
    pub valid_compute_types: Vec<String>,
    #[serde(default)]
    pub enabled_by: Option<EnabledBy>,
    #[serde(default)]
    pub disabled_by: Vec<String>,
    #[serde(default)]
    pub linked_parameters: Vec<String>,
    /// JSON schema of a `json` setting; only its top-level `type` is used.
    #[serde(default)]
    pub json_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_setting_type() -> String {
    "string".to_string()
}

fn default_component_type() -> String {
    "CommandComponent".to_string()
}

fn default_true() -> bool {
    true
}

/// Declarative component spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(rename = "type", default = "default_component_type")]
    pub component_type: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub runsettings: Vec<RunSettingSpec>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: Option<serde_json::Value>,
    #[serde(default)]
    pub allowed_projects: Vec<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default = "default_true")]
    pub is_deterministic: bool,
}

fn enum_strings(values: &[serde_json::Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| ParamValue::from(v.clone()).render())
        .collect()
}

impl ComponentSpec {
    /// Interpret the spec as a definition.
    pub fn to_definition(&self) -> Result<ComponentDefinition> {
        let component_type: ComponentType = self.component_type.parse()?;
        let mut builder = ComponentDefinitionBuilder::new(&self.name, component_type);
        if let Some(id) = &self.id {
            builder = builder.identifier(id);
        }
        if let Some(v) = &self.version {
            builder = builder.version(v);
        }
        if let Some(v) = &self.display_name {
            builder = builder.display_name(v);
        }
        if let Some(v) = &self.description {
            builder = builder.description(v);
        }
        if let Some(v) = &self.namespace {
            builder = builder.namespace(v);
        }
        if let Some(v) = &self.command {
            builder = builder.command(v);
        }
        if let Some(v) = &self.environment {
            builder = builder.environment(v.clone());
        }
        if let Some(v) = &self.workspace {
            builder = builder.workspace(v);
        }
        for project in &self.allowed_projects {
            builder = builder.allowed_project(project);
        }
        builder = builder.deterministic(self.is_deterministic);

        for input in &self.inputs {
            match input.input_type.scalar() {
                Some(param_type) => {
                    let mut p = ParameterDefinition::new(&input.name, param_type)
                        .with_range(input.min, input.max)
                        .with_enum(enum_strings(&input.enum_values));
                    // Scalar optionality follows the default, not the flag.
                    if let Some(default) = input.default.clone().filter(|d| !d.is_null()) {
                        p = p.with_default(ParamValue::from(default));
                    }
                    p.enabled_by = input.enabled_by.clone();
                    p.disabled_by = input.disabled_by.clone();
                    p.description = input.description.clone();
                    builder = builder.parameter(p);
                }
                None => {
                    let names = input.input_type.names();
                    if names.is_empty() {
                        return Err(ComponentError::invalid_spec(format!(
                            "input '{}' of '{}' declares no type",
                            input.name, self.name
                        )));
                    }
                    let mut port = InputDefinition::new(&input.name, names[0].clone()).with_types(names);
                    port.optional = input.optional;
                    port.description = input.description.clone();
                    builder = builder.input(port);
                }
            }
        }

        for output in &self.outputs {
            let mut port = OutputDefinition::new(&output.name, &output.output_type);
            port.description = output.description.clone();
            builder = builder.output(port);
        }

        for setting in &self.runsettings {
            builder = builder.run_setting(setting.to_param()?);
        }

        builder.build()
    }
}

impl RunSettingSpec {
    fn to_param(&self) -> Result<RunSettingParam> {
        let kind = self.value_type.trim().to_ascii_lowercase();
        let mut param = if kind == "json" || kind == "jsonstring" {
            let shape = match self
                .json_schema
                .as_ref()
                .and_then(|s| s.get("type"))
                .and_then(|t| t.as_str())
            {
                Some("object") => JsonShape::Object,
                Some("array") => JsonShape::Array,
                _ => JsonShape::Any,
            };
            RunSettingParam::json(&self.id, shape)
        } else {
            let param_type = ParamType::from_spec_name(&kind).ok_or_else(|| {
                ComponentError::invalid_spec(format!(
                    "run setting '{}' has unsupported type '{}'",
                    self.id, self.value_type
                ))
            })?;
            RunSettingParam::new(&self.id, param_type)
        };

        param = param
            .with_range(self.min, self.max)
            .with_enum(enum_strings(&self.enum_values))
            .with_linked_parameters(self.linked_parameters.iter().cloned());
        if let Some(default) = self.default.clone().filter(|d| !d.is_null()) {
            param = param.with_default(ParamValue::from(default));
        }
        param.optional |= self.optional;
        param.is_compute_target = self.is_compute_target;
        param.valid_compute_types = self.valid_compute_types.clone();
        param.enabled_by = self.enabled_by.clone();
        param.disabled_by = self.disabled_by.clone();
        param.description = self.description.clone();
        Ok(param)
    }
}

/// Parse a JSON component spec into a definition.
pub fn load_from_spec(source: &str) -> Result<ComponentDefinition> {
    let spec: ComponentSpec = serde_json::from_str(source)?;
    spec.to_definition()
}
