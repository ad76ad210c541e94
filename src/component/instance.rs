//! A component definition bound to concrete values.

use std::sync::Arc;

use uuid::Uuid;

use crate::definition::ComponentDefinition;
use crate::pipeline::NodeId;

use super::{Binding, InputPort, OutputPort, RunSettings};

/// One node of a pipeline wrapping a [`ComponentDefinition`].
///
/// Port and parameter vectors are parallel to the definition's declared
/// inputs, outputs and parameters.
#[derive(Debug, Clone)]
pub struct ComponentInstance {
    pub(crate) instance_id: Uuid,
    pub(crate) definition: Arc<ComponentDefinition>,
    pub(crate) label: Option<String>,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) parameters: Vec<Option<Binding>>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) runsettings: RunSettings,
    pub(crate) parent: Option<NodeId>,
    pub(crate) regenerate_output: bool,
}

impl ComponentInstance {
    pub(crate) fn new(definition: Arc<ComponentDefinition>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            inputs: vec![InputPort::default(); definition.inputs.len()],
            parameters: vec![None; definition.parameters.len()],
            outputs: vec![OutputPort::default(); definition.outputs.len()],
            runsettings: RunSettings::new(Arc::clone(&definition.runsettings)),
            definition,
            label: None,
            parent: None,
            regenerate_output: false,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn definition(&self) -> &Arc<ComponentDefinition> {
        &self.definition
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Label when given, else the definition name.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.definition.name)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn input(&self, key: &str) -> Option<&InputPort> {
        self.definition.input_index(key).map(|i| &self.inputs[i])
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &InputPort)> {
        self.definition
            .inputs
            .iter()
            .map(|d| d.name.as_str())
            .zip(self.inputs.iter())
    }

    pub fn parameter(&self, key: &str) -> Option<&Binding> {
        self.definition
            .parameter_index(key)
            .and_then(|i| self.parameters[i].as_ref())
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, Option<&Binding>)> {
        self.definition
            .parameters
            .iter()
            .map(|d| d.name.as_str())
            .zip(self.parameters.iter().map(Option::as_ref))
    }

    pub fn output(&self, key: &str) -> Option<&OutputPort> {
        let index = self
            .definition
            .outputs
            .iter()
            .position(|o| o.argument_name == key || o.name == key)?;
        Some(&self.outputs[index])
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &OutputPort)> {
        self.definition
            .outputs
            .iter()
            .map(|d| d.name.as_str())
            .zip(self.outputs.iter())
    }

    pub fn runsettings(&self) -> &RunSettings {
        &self.runsettings
    }

    pub fn regenerate_output(&self) -> bool {
        self.regenerate_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ComponentType, InputDefinition, OutputDefinition, ParameterDefinition};
    use crate::types::ParamType;

    #[test]
    fn test_slots_follow_definition() {
        let def = ComponentDefinition::builder("score", ComponentType::Command)
            .input(InputDefinition::new("Model", "ModelDirectory"))
            .input(InputDefinition::new("Data", "AnyDirectory"))
            .parameter(ParameterDefinition::new("k", ParamType::Int).with_default(3))
            .output(OutputDefinition::new("Scored Data", "AnyDirectory"))
            .build()
            .unwrap();
        let a = ComponentInstance::new(Arc::new(def));
        let b = ComponentInstance::new(Arc::clone(&a.definition));
        assert_ne!(a.instance_id(), b.instance_id());
        assert_eq!(a.inputs().count(), 2);
        assert!(a.input("model").is_some());
        assert!(a.output("scored_data").is_some());
        assert!(a.parameter("k").is_none());
        assert_eq!(a.display_name(), "score");
        assert!(a.inputs.iter().all(|p| p.binding.is_none()));
    }
}
