//! Swapping component definitions inside a composed pipeline.

use std::sync::Arc;

use crate::component::{InputPort, OutputPort};
use crate::definition::ComponentDefinition;
use crate::errors::{ComponentError, Result};
use crate::validation::{validate_compatibility, ErrorCode};

use super::{Composer, Node, NodeId};

impl Composer {
    /// Replace the definition of every component node of `pipeline` whose
    /// definition identifier is `old_identifier`. With `recursive`, nested
    /// pipelines are searched too.
    ///
    /// Unless `force` is set, each target is checked against the
    /// replacement first and nothing is changed when any check fails.
    /// Bindings, port settings and run settings carry over by name.
    /// Returns the number of nodes replaced.
    pub fn replace_component(
        &mut self,
        pipeline: NodeId,
        old_identifier: &str,
        replacement: &Arc<ComponentDefinition>,
        recursive: bool,
        force: bool,
    ) -> Result<usize> {
        let candidates: Vec<NodeId> = if recursive {
            self.modules_in(pipeline)?
        } else {
            self.children(pipeline)?
                .iter()
                .copied()
                .filter(|id| matches!(self.nodes.get(id.0), Some(Node::Module(_))))
                .collect()
        };
        let targets: Vec<NodeId> = candidates
            .into_iter()
            .filter(|id| {
                self.module(*id)
                    .map_or(false, |m| m.definition.identifier == old_identifier)
            })
            .collect();

        if let (Some(expected), Some(actual)) = (
            self.pipeline_instance(pipeline)?.workspace(),
            replacement.workspace.as_deref(),
        ) {
            if !targets.is_empty() && expected != actual {
                return Err(ComponentError::validation(
                    ErrorCode::WorkspaceAffinity,
                    self.path_of(pipeline),
                    format!(
                        "replacement '{}' belongs to workspace '{}' but the pipeline uses '{}'",
                        replacement.name, actual, expected
                    ),
                ));
            }
        }

        if !force {
            for id in &targets {
                let instance = self.module(*id)?;
                let bound_inputs: Vec<&str> = instance
                    .inputs()
                    .filter(|(_, port)| port.is_bound())
                    .map(|(name, _)| name)
                    .collect();
                let bound_parameters: Vec<&str> = instance
                    .parameters()
                    .filter(|(_, binding)| binding.is_some())
                    .map(|(name, _)| name)
                    .collect();
                let report = validate_compatibility(
                    &instance.definition,
                    replacement,
                    &bound_inputs,
                    &bound_parameters,
                );
                if !report.is_compatible() {
                    return Err(ComponentError::validation(
                        ErrorCode::IncompatibleInterface,
                        self.path_of(*id),
                        format!("Component incompatible! Errors:\n{}", report.render()),
                    ));
                }
            }
        }

        for id in &targets {
            let instance = self.module_mut(*id)?;
            let old = Arc::clone(&instance.definition);

            let inputs: Vec<InputPort> = replacement
                .inputs
                .iter()
                .map(|input| {
                    old.inputs
                        .iter()
                        .position(|o| o.name == input.name)
                        .map(|i| instance.inputs[i].clone())
                        .unwrap_or_default()
                })
                .collect();
            let parameters = replacement
                .parameters
                .iter()
                .map(|param| {
                    old.parameters
                        .iter()
                        .position(|o| o.name == param.name)
                        .and_then(|i| instance.parameters[i].clone())
                })
                .collect();
            let outputs: Vec<OutputPort> = replacement
                .outputs
                .iter()
                .map(|output| {
                    old.outputs
                        .iter()
                        .position(|o| o.name == output.name)
                        .map(|i| instance.outputs[i].clone())
                        .unwrap_or_default()
                })
                .collect();

            instance.inputs = inputs;
            instance.parameters = parameters;
            instance.outputs = outputs;
            instance.runsettings = instance
                .runsettings
                .rebased(Arc::clone(&replacement.runsettings));
            instance.definition = Arc::clone(replacement);
        }

        tracing::info!(
            pipeline = %self.path_of(pipeline),
            replaced = targets.len(),
            "replaced '{}' with '{}'",
            old_identifier,
            replacement.identifier
        );
        Ok(targets.len())
    }
}
