//! Fluent construction of [`ComponentDefinition`]s.
//!
//! ```ignore
//! let def = ComponentDefinition::builder("printer", ComponentType::Command)
//!     .version("0.0.1")
//!     .parameter(ParameterDefinition::new("text", ParamType::Str))
//!     .output(OutputDefinition::new("result", "AnyDirectory"))
//!     .run_setting(RunSettingParam::compute_target("target", ["AmlCompute"]))
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::errors::{ComponentError, Result};

use super::{
    ComponentDefinition, ComponentType, InputDefinition, OutputDefinition, ParameterDefinition,
    RunSettingParam, RunSettingsDefinition,
};

/// Builder for a [`ComponentDefinition`].
#[derive(Debug, Clone)]
pub struct ComponentDefinitionBuilder {
    name: String,
    component_type: ComponentType,
    identifier: Option<String>,
    version: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    namespace: Option<String>,
    inputs: Vec<InputDefinition>,
    outputs: Vec<OutputDefinition>,
    parameters: Vec<ParameterDefinition>,
    runsettings: Vec<RunSettingParam>,
    command: Option<String>,
    environment: Option<serde_json::Value>,
    allowed_projects: Vec<String>,
    workspace: Option<String>,
    is_deterministic: bool,
}

impl ComponentDefinitionBuilder {
    pub fn new(name: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            name: name.into(),
            component_type,
            identifier: None,
            version: None,
            display_name: None,
            description: None,
            namespace: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            runsettings: Vec::new(),
            command: None,
            environment: None,
            allowed_projects: Vec::new(),
            workspace: None,
            is_deterministic: true,
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn input(mut self, input: InputDefinition) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputDefinition) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn run_setting(mut self, param: RunSettingParam) -> Self {
        self.runsettings.push(param);
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn environment(mut self, environment: serde_json::Value) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn allowed_project(mut self, project: impl Into<String>) -> Self {
        self.allowed_projects.push(project.into());
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn deterministic(mut self, is_deterministic: bool) -> Self {
        self.is_deterministic = is_deterministic;
        self
    }

    /// Coerce defaults to their declared types, merge run-setting variants,
    /// and check the definition for consistency.
    pub fn build(self) -> Result<ComponentDefinition> {
        if self.name.trim().is_empty() {
            return Err(ComponentError::invalid_spec("component name must not be empty"));
        }

        let mut parameters = self.parameters;
        for p in &mut parameters {
            if let Some(default) = &p.default {
                let coerced = default.coerce(p.schema.param_type).map_err(|msg| {
                    ComponentError::invalid_spec(format!(
                        "default of parameter '{}' in '{}': {}",
                        p.name, self.name, msg
                    ))
                })?;
                p.default = Some(coerced);
                p.optional = true;
            } else if p.optional {
                return Err(ComponentError::invalid_spec(format!(
                    "parameter '{}' in '{}' is optional but has no default",
                    p.name, self.name
                )));
            }
        }

        let mut runsettings = self.runsettings;
        for r in &mut runsettings {
            if let Some(default) = &r.default {
                if r.json_shape.is_none() {
                    let coerced = default.coerce(r.schema.param_type).map_err(|msg| {
                        ComponentError::invalid_spec(format!(
                            "default of run setting '{}' in '{}': {}",
                            r.id, self.name, msg
                        ))
                    })?;
                    r.default = Some(coerced);
                }
                r.optional = true;
            }
        }

        let identifier = self.identifier.unwrap_or_else(|| match &self.version {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        });

        let definition = ComponentDefinition {
            identifier,
            name: self.name,
            version: self.version,
            display_name: self.display_name,
            description: self.description,
            namespace: self.namespace,
            component_type: self.component_type,
            inputs: self.inputs,
            outputs: self.outputs,
            parameters,
            runsettings: Arc::new(RunSettingsDefinition::new(runsettings)?),
            command: self.command,
            environment: self.environment,
            allowed_projects: self.allowed_projects,
            workspace: self.workspace,
            is_deterministic: self.is_deterministic,
        };
        definition.validate()?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParamType, ParamValue};
    use crate::validation::ErrorCode;

    #[test]
    fn test_build_coerces_defaults() {
        let def = ComponentDefinitionBuilder::new("train", ComponentType::Command)
            .version("1")
            .parameter(ParameterDefinition::new("epochs", ParamType::Int).with_default("5"))
            .parameter(ParameterDefinition::new("shuffle", ParamType::Bool).with_default("TRUE"))
            .build()
            .unwrap();
        assert_eq!(def.identifier, "train:1");
        assert_eq!(def.parameter("epochs").unwrap().default, Some(ParamValue::Int(5)));
        assert_eq!(def.parameter("shuffle").unwrap().default, Some(ParamValue::Bool(true)));
        assert!(def.parameter("epochs").unwrap().optional);
    }

    #[test]
    fn test_build_rejects_bad_default() {
        let err = ComponentDefinitionBuilder::new("train", ComponentType::Command)
            .parameter(ParameterDefinition::new("epochs", ParamType::Int).with_default("many"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSpec);
    }

    #[test]
    fn test_build_rejects_optional_without_default() {
        let mut p = ParameterDefinition::new("epochs", ParamType::Int);
        p.optional = true;
        let err = ComponentDefinitionBuilder::new("train", ComponentType::Command)
            .parameter(p)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSpec);
        assert!(err.to_string().contains("epochs"));
    }

    #[test]
    fn test_build_rejects_parameter_cycle() {
        let err = ComponentDefinitionBuilder::new("c", ComponentType::Command)
            .parameter(ParameterDefinition::new("a", ParamType::Str).enabled_by("b", ["x"]))
            .parameter(ParameterDefinition::new("b", ParamType::Str).disabled_by("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyCycle);
    }

    #[test]
    fn test_build_rejects_name_clash() {
        let err = ComponentDefinitionBuilder::new("c", ComponentType::Command)
            .input(InputDefinition::new("x", "AnyDirectory"))
            .parameter(ParameterDefinition::new("x", ParamType::Str))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSpec);
    }

    #[test]
    fn test_lookup_by_declared_or_argument_name() {
        let def = ComponentDefinitionBuilder::new("c", ComponentType::Command)
            .input(InputDefinition::new("Input Data", "AnyDirectory"))
            .output(OutputDefinition::new("Scored Data", "AnyDirectory"))
            .build()
            .unwrap();
        assert_eq!(def.input("input_data").unwrap().name, "Input Data");
        assert_eq!(def.input("Input Data").unwrap().argument_name, "input_data");
        assert_eq!(def.output("scored_data").unwrap().name, "Scored Data");
    }
}
