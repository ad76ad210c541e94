//! Describing the nested pipelines that lowering flattened away.
//!
//! Pipelines are walked in pre-order, root first, children in declaration
//! order. Each one yields a [`SubGraphInfo`]; definitions shared by several
//! invocations are listed once.

use rustc_hash::FxHashSet;

use crate::errors::Result;
use crate::parameter::ParameterDefault;
use crate::pipeline::{
    render_parts, InputSource, NodeId, ParamKind, PipelineDefinition, PipelineInstance,
};
use crate::types::ParamValue;

use super::builder::{assignment_for, LoweringState, SourceKey};
use super::model::{
    ComputeSetting, DataPathAssignment, DataPathParameter, DataSetDefinitionValue,
    DatastoreSetting, InterfaceParameter, ParameterAssignment, SubGraphConnection, SubGraphInfo,
    SubGraphPort, SubPipelineDefinition, SubPipelinesInfo,
};
use super::DATAPATH_DATA_TYPE;

impl LoweringState<'_> {
    pub(super) fn build_sub_pipelines_info(&mut self) -> Result<SubPipelinesInfo> {
        let mut info = SubPipelinesInfo::default();
        if !self.composer.node(self.root)?.is_pipeline() {
            return Ok(info);
        }

        let mut seen_definitions = FxHashSet::default();
        for pipeline in self.composer.pipelines_in(self.root)? {
            let instance = self.composer.pipeline_instance(pipeline)?;
            let definition = instance.definition();
            if seen_definitions.insert(definition.id) {
                info.sub_pipeline_definition.push(sub_pipeline_definition(definition));
            }
            for child in instance.children() {
                if let Some(graph_id) = self.graph_ids.get(child) {
                    info.node_id_to_sub_graph_id_mapping
                        .insert(graph_id.clone(), instance.instance_id().to_string());
                }
            }
            let sub_graph = self.sub_graph_info(pipeline)?;
            info.sub_graph_info.push(sub_graph);
        }
        Ok(info)
    }

    fn sub_graph_info(&mut self, pipeline: NodeId) -> Result<SubGraphInfo> {
        let composer = self.composer;
        let instance = composer.pipeline_instance(pipeline)?;
        let definition = instance.definition();
        let is_root = pipeline == self.root;

        let default_compute_target = match composer.pipeline_compute(pipeline, self.root)? {
            Some(name) => Some(ComputeSetting {
                compute_type: self.compute_type(&name)?,
                name,
            }),
            None => None,
        };
        let default_data_store = composer
            .pipeline_datastore(pipeline, self.root)?
            .map(|(ds, _)| DatastoreSetting {
                data_store_name: ds.name,
            });

        // Nodes that pick up this pipeline's defaults.
        let mut default_compute_node_ids = Vec::new();
        let mut default_datastore_node_ids = Vec::new();
        for module in composer.modules_in(pipeline)? {
            let Some(graph_id) = self.graph_ids.get(&module) else {
                continue;
            };
            let instance = composer.module(module)?;
            let between = composer.ancestors_until(module, pipeline);
            let between = &between[..between.len().saturating_sub(1)];
            let intermediate = |pick: fn(&PipelineInstance) -> bool| -> Result<bool> {
                for p in between {
                    if pick(composer.pipeline_instance(*p)?) {
                        return Ok(true);
                    }
                }
                Ok(false)
            };

            if instance.definition().component_type.uses_compute()
                && instance.runsettings().target().is_none()
                && !intermediate(|p| p.default_compute().is_some())?
            {
                default_compute_node_ids.push(graph_id.clone());
            }
            if instance.outputs().any(|(_, port)| port.datastore.is_none())
                && !intermediate(|p| p.default_datastore().is_some())?
            {
                default_datastore_node_ids.push(graph_id.clone());
            }
        }

        // Signature assignments and input ports.
        let mut parameter_assignments = Vec::new();
        let mut data_path_assignments = Vec::new();
        let mut inputs = Vec::new();
        for (slot, param) in definition.parameters.iter().enumerate() {
            if param.kind == ParamKind::DataPath {
                let external = if is_root {
                    SubGraphConnection::GraphParameter {
                        name: param.name.clone(),
                    }
                } else {
                    self.external_input(instance, slot)?
                };
                data_path_assignments.push(DataPathAssignment {
                    name: param.name.clone(),
                    source: external.clone(),
                });
                inputs.push(SubGraphPort {
                    name: param.name.clone(),
                    external: vec![external],
                    internal: self.internal_consumers(pipeline, slot)?,
                });
                continue;
            }

            let assignment = if is_root {
                Some(ParameterAssignment::graph_parameter(Some(&param.name), &param.name))
            } else {
                match instance.arg(slot) {
                    Some(binding) => {
                        let source = composer.resolve_scalar(binding, self.root)?;
                        assignment_for(Some(&param.name), source)
                    }
                    None => None,
                }
                .or_else(|| {
                    param
                        .default
                        .as_ref()
                        .and_then(ParameterDefault::as_value)
                        .map(|v| ParameterAssignment::literal(Some(&param.name), v.render()))
                })
            };
            parameter_assignments.extend(assignment);
        }

        // Output ports.
        let mut outputs = Vec::new();
        for (name, output) in instance.outputs() {
            let (producer, port) = composer.resolve_output(output)?;
            let internal = match self.graph_ids.get(&producer) {
                Some(node_id) => SubGraphConnection::Node {
                    node_id: node_id.clone(),
                    port_name: port.clone(),
                },
                None => SubGraphConnection::Unbound,
            };
            outputs.push(SubGraphPort {
                name: name.clone(),
                external: self.external_consumers(pipeline, producer, &port)?,
                internal: vec![internal],
            });
        }

        Ok(SubGraphInfo {
            id: instance.instance_id().to_string(),
            parent_graph_id: match instance.parent() {
                Some(parent) if !is_root => {
                    Some(composer.pipeline_instance(parent)?.instance_id().to_string())
                }
                _ => None,
            },
            pipeline_definition_id: definition.id.to_string(),
            name: instance.display_name().to_string(),
            default_compute_target,
            default_data_store,
            default_compute_node_ids,
            default_datastore_node_ids,
            parameter_assignments,
            data_path_assignments,
            inputs,
            outputs,
        })
    }

    /// Where the caller's argument for a datapath slot comes from.
    fn external_input(&self, instance: &PipelineInstance, slot: usize) -> Result<SubGraphConnection> {
        let source = match instance.arg(slot) {
            Some(binding) => self.composer.resolve_input(binding, self.root)?,
            None => match instance.refs().get(slot).and_then(|r| r.default()) {
                Some(ParameterDefault::Dataset(d)) => InputSource::Dataset(d.clone()),
                Some(ParameterDefault::Value(ParamValue::Str(path))) => InputSource::LocalPath(path.clone()),
                _ => InputSource::Unbound,
            },
        };
        Ok(self.connection_for(source))
    }

    fn connection_for(&self, source: InputSource) -> SubGraphConnection {
        let dataset_node = |key: SourceKey| match self.source_nodes.get(&key) {
            Some(node_id) => SubGraphConnection::Node {
                node_id: node_id.clone(),
                port_name: super::DATASET_OUTPUT_PORT.to_string(),
            },
            None => SubGraphConnection::Unbound,
        };
        match source {
            InputSource::Output { node, port } => match self.graph_ids.get(&node) {
                Some(node_id) => SubGraphConnection::Node {
                    node_id: node_id.clone(),
                    port_name: port,
                },
                None => SubGraphConnection::Unbound,
            },
            InputSource::Dataset(d) => dataset_node(SourceKey::Dataset(d.identity())),
            InputSource::LocalPath(path) => dataset_node(SourceKey::Local(path)),
            InputSource::Template(parts) => dataset_node(SourceKey::Local(render_parts(
                &parts,
                &self.options.pipeline_parameters,
            ))),
            InputSource::DataPath(p) => SubGraphConnection::GraphParameter {
                name: p.name().to_string(),
            },
            InputSource::Unbound | InputSource::Unsupported(_) => SubGraphConnection::Unbound,
        }
    }

    /// Module inputs inside `pipeline` fed by its datapath slot `slot`.
    fn internal_consumers(&self, pipeline: NodeId, slot: usize) -> Result<Vec<SubGraphConnection>> {
        let mut out = Vec::new();
        for module in self.composer.modules_in(pipeline)? {
            let instance = self.composer.module(module)?;
            let Some(node_id) = self.graph_ids.get(&module) else {
                continue;
            };
            for (name, port) in instance.inputs() {
                let Some(binding) = &port.binding else {
                    continue;
                };
                if let Ok(InputSource::DataPath(p)) = self.composer.resolve_input(binding, pipeline) {
                    if p.scope() == pipeline && p.slot() == slot {
                        out.push(SubGraphConnection::Node {
                            node_id: node_id.clone(),
                            port_name: name.to_string(),
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Module inputs outside `pipeline` that consume `producer:port`.
    fn external_consumers(&self, pipeline: NodeId, producer: NodeId, port: &str) -> Result<Vec<SubGraphConnection>> {
        let inside: FxHashSet<NodeId> = self.composer.modules_in(pipeline)?.into_iter().collect();
        let mut out = Vec::new();
        for module in self.composer.modules_in(self.root)? {
            if inside.contains(&module) {
                continue;
            }
            let Some(node_id) = self.graph_ids.get(&module) else {
                continue;
            };
            let instance = self.composer.module(module)?;
            for (name, input) in instance.inputs() {
                let Some(binding) = &input.binding else {
                    continue;
                };
                if let Ok(InputSource::Output { node, port: p }) = self.composer.resolve_input(binding, self.root) {
                    if node == producer && p == port {
                        out.push(SubGraphConnection::Node {
                            node_id: node_id.clone(),
                            port_name: name.to_string(),
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

fn sub_pipeline_definition(definition: &PipelineDefinition) -> SubPipelineDefinition {
    let mut parameter_list = Vec::new();
    let mut data_path_parameter_list = Vec::new();
    for param in &definition.parameters {
        match param.kind {
            ParamKind::DataPath => data_path_parameter_list.push(DataPathParameter {
                name: param.name.clone(),
                default_value: match &param.default {
                    Some(ParameterDefault::Value(ParamValue::Str(path))) => {
                        Some(DataSetDefinitionValue::literal(None, path.clone()))
                    }
                    _ => None,
                },
                is_optional: param.is_optional(),
                data_type_id: DATAPATH_DATA_TYPE.to_string(),
            }),
            ParamKind::Scalar | ParamKind::Unused => parameter_list.push(InterfaceParameter {
                name: param.name.clone(),
                default_value: param
                    .default
                    .as_ref()
                    .and_then(ParameterDefault::as_value)
                    .map(ParamValue::render),
                is_optional: param.is_optional(),
                param_type: param.param_type.wire_code(),
                unused: param.kind == ParamKind::Unused,
            }),
        }
    }
    SubPipelineDefinition {
        id: definition.id.to_string(),
        name: definition.name.clone(),
        description: definition.description.clone(),
        default_compute_target: definition.default_compute.clone(),
        default_data_store: definition.default_datastore.as_ref().map(|d| d.name.clone()),
        parameter_list,
        data_path_parameter_list,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ComposeConfig;
    use crate::definition::{ComponentDefinition, ComponentType, InputDefinition, OutputDefinition, RunSettingParam};
    use crate::graph::GraphBuilder;
    use crate::pipeline::{Composer, PipelineFunction, PipelineOutputs, PipelineParam};
    use crate::types::Datastore;

    fn step() -> Arc<ComponentDefinition> {
        Arc::new(
            ComponentDefinition::builder("step", ComponentType::Command)
                .input(InputDefinition::new("x", "AnyDirectory").optional())
                .output(OutputDefinition::new("y", "AnyDirectory"))
                .run_setting(RunSettingParam::compute_target("target", Vec::<String>::new()).optional())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_nested_pipeline_info() {
        let s = step();
        let inner_step = Arc::clone(&s);
        let inner = PipelineFunction::new("inner", move |composer, args| {
            let data = args.param("data")?;
            let node = composer.component(&inner_step).name("work").arg("x", data).create()?;
            Ok(PipelineOutputs::new().with("out", composer.output(node, "y")?))
        })
        .with_default_datastore(Datastore::blob("inner_store"))
        .param(PipelineParam::new("data"));

        let outer = PipelineFunction::new("outer", move |composer, _| {
            let first = composer.component(&s).name("first").create()?;
            let y = composer.output(first, "y")?;
            let sub = composer.pipeline(&inner).name("sub").arg("data", y).create()?;
            let out = composer.output(sub, "out")?;
            composer.component(&s).name("last").arg("x", out).create()?;
            Ok(PipelineOutputs::new())
        })
        .with_default_compute("cpu");

        let mut composer = Composer::new(ComposeConfig::default().with_node_id_seed(1)).unwrap();
        let root = composer.pipeline(&outer).create().unwrap();
        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let info = &artifacts.sub_pipelines_info;

        assert_eq!(info.sub_graph_info.len(), 2);
        assert_eq!(info.sub_pipeline_definition.len(), 2);
        let root_info = &info.sub_graph_info[0];
        let sub_info = &info.sub_graph_info[1];
        assert!(root_info.parent_graph_id.is_none());
        assert_eq!(sub_info.parent_graph_id.as_deref(), Some(root_info.id.as_str()));
        assert_eq!(root_info.default_compute_target.as_ref().unwrap().name, "cpu");
        assert_eq!(sub_info.default_compute_target.as_ref().unwrap().name, "cpu");
        assert_eq!(sub_info.default_data_store.as_ref().unwrap().data_store_name, "inner_store");
        assert_eq!(root_info.default_compute_node_ids.len(), 3);
        // the inner store shadows the root default for the nested node
        assert_eq!(root_info.default_datastore_node_ids.len(), 2);
        assert_eq!(sub_info.default_datastore_node_ids.len(), 1);

        let port = &sub_info.inputs[0];
        assert_eq!(port.name, "data");
        assert!(matches!(port.external[0], SubGraphConnection::Node { ref port_name, .. } if port_name == "y"));
        assert_eq!(port.internal.len(), 1);
        let out = &sub_info.outputs[0];
        assert_eq!(out.external.len(), 1);
        assert_eq!(info.node_id_to_sub_graph_id_mapping.len(), 3);
    }
}
