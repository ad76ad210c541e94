//! Lowering a composed pipeline into one flat wire graph.
//!
//! Every component node under the root becomes a module node; nested
//! pipelines are flattened away and described separately in
//! [`SubPipelinesInfo`](super::model::SubPipelinesInfo). Lowering runs in
//! stages, each inside its own tracing span:
//!
//! 1. allocate node ids in declaration order
//! 2. emit module nodes in dataflow order with their edges, parameter
//!    assignments, port settings and run settings
//! 3. build the graph interface from the root signature
//! 4. drop dataset nodes that carry no value
//! 5. describe the nested pipelines

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::component::Binding;
use crate::dataset::{built_input, DatasetKind, DatasetRef};
use crate::errors::{ComponentError, Result};
use crate::parameter::ParameterDefault;
use crate::pipeline::{
    render_parts, Composer, InputSource, NodeId, ParamKind, PipelineDefinition, ResolvedPart,
    ScalarSource,
};
use crate::types::{InputMode, ParamValue};
use crate::validation::ErrorCode;
use crate::workspace::{data_type_short_name, dataset_id};

use super::model::{
    ComputeSetting, DataPathParameter, DataSetDefinition, DataSetDefinitionValue, DatastoreSetting,
    DatasetOutputOptions, DatasetRegistration, EntityInterface, Graph, GraphArtifacts,
    GraphDatasetNode, GraphEdge, GraphModuleNode, InputSetting, InterfaceParameter,
    ModuleNodeRunSetting, OutputSetting, ParameterAssignment, ParameterValueType, PortInfo,
    RunSettingParameterAssignment,
};
use super::node_id::NodeIdAllocator;
use super::{
    DATAPATH_DATA_TYPE, DATASET_OUTPUT_PORT, STAGE_ALLOCATE, STAGE_INTERFACE, STAGE_MODULES,
    STAGE_POSTPROCESS, STAGE_SUBGRAPHS,
};

// ============================================================================
// Options
// ============================================================================

/// Per-run lowering settings.
#[derive(Debug, Clone, Default)]
pub struct LoweringOptions {
    /// Submit-time values for root parameters; they replace the interface
    /// defaults. Unknown names are ignored with a warning.
    pub pipeline_parameters: FxHashMap<String, ParamValue>,
    /// Overrides every node's regenerate-output flag when set.
    pub regenerate_outputs: Option<bool>,
    /// Seed for reproducible node ids; falls back to the composer config.
    pub node_id_seed: Option<u64>,
}

impl LoweringOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.pipeline_parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_regenerate_outputs(mut self, regenerate: bool) -> Self {
        self.regenerate_outputs = Some(regenerate);
        self
    }

    pub fn with_node_id_seed(mut self, seed: u64) -> Self {
        self.node_id_seed = Some(seed);
        self
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Lowers pipelines composed in a [`Composer`].
#[derive(Debug)]
pub struct GraphBuilder<'c> {
    composer: &'c Composer,
    options: LoweringOptions,
}

impl<'c> GraphBuilder<'c> {
    pub fn new(composer: &'c Composer) -> Self {
        Self {
            composer,
            options: LoweringOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoweringOptions) -> Self {
        self.options = options;
        self
    }

    /// Lower the tree under `root`, which may be a pipeline or a single
    /// component node.
    pub fn build(&self, root: NodeId) -> Result<GraphArtifacts> {
        let mut state = LoweringState::new(self.composer, root, &self.options)?;
        let order = state.allocate()?;
        state.lower_modules(&order)?;
        state.build_interface()?;
        state.postprocess();
        let sub_pipelines_info = state.sub_pipelines_info()?;
        state.finish(sub_pipelines_info)
    }
}

/// Key under which a dataset node is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DatasetKey {
    /// A built input from the process-wide cache.
    Built(usize),
    Local(String, InputMode),
}

/// Where a dataset node came from, independent of access mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum SourceKey {
    Dataset(usize),
    Local(String),
}

/// Mutable state of one lowering run.
pub(super) struct LoweringState<'c> {
    pub(super) composer: &'c Composer,
    pub(super) root: NodeId,
    pub(super) options: &'c LoweringOptions,
    root_definition: Option<Arc<PipelineDefinition>>,
    ids: NodeIdAllocator,
    pub(super) graph_ids: FxHashMap<NodeId, String>,
    pub(super) graph: Graph,
    run_settings: Vec<ModuleNodeRunSetting>,
    dataset_nodes: FxHashMap<DatasetKey, String>,
    /// First dataset node created for each source; pruned nodes removed.
    pub(super) source_nodes: FxHashMap<SourceKey, String>,
    /// Root signature slots fed into scalar slots.
    used_scalars: FxHashSet<usize>,
    compute_types: FxHashMap<String, String>,
}

impl<'c> LoweringState<'c> {
    fn new(composer: &'c Composer, root: NodeId, options: &'c LoweringOptions) -> Result<Self> {
        let root_definition = match composer.node(root)?.as_pipeline() {
            Some(p) => Some(Arc::clone(p.definition())),
            None => None,
        };

        let mut unknown: Vec<&str> = options
            .pipeline_parameters
            .keys()
            .filter(|name| {
                root_definition
                    .as_ref()
                    .map_or(true, |d| d.parameter(name).is_none())
            })
            .map(String::as_str)
            .collect();
        unknown.sort_unstable();
        for name in unknown {
            tracing::warn!(
                pipeline = %composer.path_of(root),
                "pipeline parameter '{}' is not part of the pipeline interface and is ignored",
                name
            );
        }

        let seed = options.node_id_seed.or(composer.config().node_id_seed);
        Ok(Self {
            composer,
            root,
            options,
            root_definition,
            ids: NodeIdAllocator::new(seed),
            graph_ids: FxHashMap::default(),
            graph: Graph::default(),
            run_settings: Vec::new(),
            dataset_nodes: FxHashMap::default(),
            source_nodes: FxHashMap::default(),
            used_scalars: FxHashSet::default(),
            compute_types: FxHashMap::default(),
        })
    }

    // ─── Stage 1: ids ───────────────────────────────────────────────────────

    /// Allocate module node ids in declaration order and return the
    /// emission order.
    fn allocate(&mut self) -> Result<Vec<NodeId>> {
        trace_stage!(STAGE_ALLOCATE);
        let declared = self.composer.modules_in(self.root)?;
        if declared.is_empty() {
            return Err(ComponentError::validation(
                ErrorCode::EmptyPipeline,
                self.composer.path_of(self.root),
                "pipeline contains no component nodes",
            ));
        }
        for id in &declared {
            let graph_id = self.ids.next_id();
            self.graph_ids.insert(*id, graph_id);
        }
        let order = if self.root_definition.is_some() {
            self.composer.topological_modules(self.root)?
        } else {
            declared
        };
        tracing::debug!(modules = order.len(), "allocated module node ids");
        Ok(order)
    }

    fn graph_id(&self, node: NodeId) -> Result<&str> {
        self.graph_ids
            .get(&node)
            .map(String::as_str)
            .ok_or_else(|| ComponentError::unknown_node(format!("{} is not part of the graph", node)))
    }

    // ─── Stage 2: module nodes ──────────────────────────────────────────────

    fn lower_modules(&mut self, order: &[NodeId]) -> Result<()> {
        trace_stage!(STAGE_MODULES);
        for id in order {
            self.lower_module(*id)?;
        }
        Ok(())
    }

    fn lower_module(&mut self, id: NodeId) -> Result<()> {
        let composer = self.composer;
        let instance = composer.module(id)?;
        let definition = Arc::clone(instance.definition());
        let node_id = self.graph_id(id)?.to_string();
        let path = composer.path_of(id);

        // Parameters
        let mut module_parameters = Vec::with_capacity(definition.parameters.len());
        for (i, param) in definition.parameters.iter().enumerate() {
            let default = param.default.as_ref();
            let assignment = match instance.parameters[i].as_ref() {
                None => default.map(|v| ParameterAssignment::literal(Some(&param.name), v.render())),
                Some(binding) => {
                    let slot = format!("{}/parameters/{}", path, param.name);
                    self.scalar_assignment(&param.name, binding, default, &slot)?
                }
            };
            module_parameters.extend(assignment);
        }

        // Inputs
        let mut input_settings = Vec::with_capacity(definition.inputs.len());
        for (i, input) in definition.inputs.iter().enumerate() {
            let port = &instance.inputs[i];
            let mode = port.effective_mode();
            let mut setting = InputSetting {
                name: input.name.clone(),
                data_store_mode: mode.as_str().to_string(),
                path_on_compute: port.path_on_compute.clone(),
                data_path_parameter_name: None,
            };
            if let Some(binding) = &port.binding {
                let slot = format!("{}/inputs/{}", path, input.name);
                let source = composer
                    .resolve_input(binding, self.root)
                    .map_err(|e| e.at_path(&slot))?;
                match source {
                    InputSource::Output { node, port } => {
                        let producer = self
                            .graph_ids
                            .get(&node)
                            .cloned()
                            .ok_or_else(|| {
                                ComponentError::validation(
                                    ErrorCode::InvalidInputPort,
                                    &slot,
                                    format!(
                                        "bound to '{}' which is outside the pipeline being lowered",
                                        composer.path_of(node)
                                    ),
                                )
                            })?;
                        self.push_edge(producer, port, &node_id, &input.name);
                    }
                    InputSource::Dataset(dataset) => {
                        let dataset_node = self.dataset_node(&dataset, mode)?;
                        self.push_edge(dataset_node, DATASET_OUTPUT_PORT.to_string(), &node_id, &input.name);
                    }
                    InputSource::LocalPath(local) => {
                        let dataset_node = self.local_path_node(&local, mode);
                        self.push_edge(dataset_node, DATASET_OUTPUT_PORT.to_string(), &node_id, &input.name);
                    }
                    InputSource::Template(parts) => {
                        let local = self.render_template(&parts);
                        let dataset_node = self.local_path_node(&local, mode);
                        self.push_edge(dataset_node, DATASET_OUTPUT_PORT.to_string(), &node_id, &input.name);
                    }
                    InputSource::DataPath(reference) => {
                        setting.data_path_parameter_name = Some(reference.name().to_string());
                    }
                    InputSource::Unbound => {}
                    InputSource::Unsupported(kind) => {
                        return Err(ComponentError::validation(
                            ErrorCode::InvalidInputPort,
                            slot,
                            format!("a {} cannot feed an input port", kind),
                        ));
                    }
                }
            }
            input_settings.push(setting);
        }

        // Outputs
        let mut output_settings = Vec::with_capacity(definition.outputs.len());
        let mut use_graph_default_datastore = true;
        for (i, output) in definition.outputs.iter().enumerate() {
            let port = &instance.outputs[i];
            let resolved = composer.resolve_datastore(id, i, self.root)?;
            let from_graph_default = port.datastore.is_none()
                && resolved
                    .as_ref()
                    .map_or(true, |(_, provider)| provider.map_or(true, |p| p == self.root));
            use_graph_default_datastore &= from_graph_default;
            output_settings.push(OutputSetting {
                name: output.name.clone(),
                data_store_name: resolved.map(|(ds, _)| ds.name),
                data_store_mode: port.effective_mode().as_str().to_string(),
                path_on_compute: port.path_on_compute.clone(),
                dataset_registration: port.registration.as_ref().map(|r| DatasetRegistration {
                    name: r.name.clone(),
                    create_new_version: r.create_new_version,
                }),
                dataset_output_options: port
                    .path_on_datastore
                    .as_ref()
                    .map(|p| DatasetOutputOptions {
                        path_on_datastore: p.clone(),
                    }),
            });
        }

        // Run settings
        let mut run_setting = ModuleNodeRunSetting {
            module_id: definition.identifier.clone(),
            node_id: node_id.clone(),
            step_type: definition.component_type.step_type().to_string(),
            run_settings: Vec::new(),
            compute_run_settings: Vec::new(),
            search_space: Vec::new(),
        };
        for (param, value) in instance.runsettings.active_values() {
            if param.is_compute_target {
                continue;
            }
            let mut assignment = RunSettingParameterAssignment::literal(&param.id, value.render());
            if param.is_search_space() {
                assignment.linked_parameters = param.linked_parameters.clone();
                run_setting.search_space.push(assignment);
            } else if param.is_compute_setting() {
                run_setting.compute_run_settings.push(assignment);
            } else {
                run_setting.run_settings.push(assignment);
            }
        }

        let mut use_graph_default_compute = false;
        if definition.component_type.uses_compute() {
            let resolution = composer.resolve_compute(id, self.root)?;
            use_graph_default_compute = resolution.use_graph_default;
            if let Some(entry) = definition.runsettings.compute_target() {
                let assignment = match resolution.name.filter(|_| !resolution.use_graph_default) {
                    Some(name) => RunSettingParameterAssignment {
                        name: entry.id.clone(),
                        mlc_compute_type: Some(self.compute_type(&name)?),
                        value: Some(name),
                        value_type: ParameterValueType::Literal,
                        use_graph_default_compute: Some(false),
                        linked_parameters: Vec::new(),
                    },
                    None => RunSettingParameterAssignment {
                        name: entry.id.clone(),
                        value: None,
                        value_type: ParameterValueType::Literal,
                        use_graph_default_compute: Some(true),
                        mlc_compute_type: None,
                        linked_parameters: Vec::new(),
                    },
                };
                run_setting.run_settings.insert(0, assignment);
            }
        }

        self.graph.module_nodes.push(GraphModuleNode {
            id: node_id,
            module_id: definition.identifier.clone(),
            name: instance.display_name().to_string(),
            regenerate_output: self
                .options
                .regenerate_outputs
                .unwrap_or(instance.regenerate_output),
            use_graph_default_compute,
            use_graph_default_datastore,
            module_parameters,
            module_input_settings: input_settings,
            module_output_settings: output_settings,
        });
        self.run_settings.push(run_setting);
        Ok(())
    }

    fn push_edge(&mut self, source: String, source_port: String, destination: &str, input: &str) {
        self.graph.edges.push(GraphEdge {
            source_output_port: PortInfo {
                node_id: source,
                port_name: source_port,
            },
            destination_input_port: PortInfo {
                node_id: destination.to_string(),
                port_name: input.to_string(),
            },
        });
    }

    fn scalar_assignment(
        &mut self,
        name: &str,
        binding: &Binding,
        default: Option<&ParamValue>,
        slot: &str,
    ) -> Result<Option<ParameterAssignment>> {
        let source = self
            .composer
            .resolve_scalar(binding, self.root)
            .map_err(|e| e.at_path(slot))?;
        for reference in root_references(&source) {
            self.used_scalars.insert(reference);
        }
        Ok(assignment_for(Some(name), source).or_else(|| {
            default.map(|v| ParameterAssignment::literal(Some(name), v.render()))
        }))
    }

    /// Path text of a template feeding an input port. Root parameters it
    /// names count as used scalars.
    pub(super) fn render_template(&mut self, parts: &[ResolvedPart]) -> String {
        for part in parts {
            if let ResolvedPart::RootParameter(p) = part {
                self.used_scalars.insert(p.slot());
            }
        }
        render_parts(parts, &self.options.pipeline_parameters)
    }

    fn dataset_node(&mut self, dataset: &DatasetRef, mode: InputMode) -> Result<String> {
        let built = built_input(dataset, mode);
        let key = DatasetKey::Built(Arc::as_ptr(&built) as usize);
        if let Some(id) = self.dataset_nodes.get(&key) {
            return Ok(id.clone());
        }
        let definition = self.composer.dataset_registry().dataset_definition_of(dataset)?;
        let id = self.ids.next_id();
        tracing::debug!(node = %id, dataset = %built.name, "created dataset node");
        self.graph.dataset_nodes.push(GraphDatasetNode {
            id: id.clone(),
            dataset_id: dataset_id(dataset),
            data_set_definition: Some(definition),
        });
        self.dataset_nodes.insert(key, id.clone());
        self.source_nodes
            .entry(SourceKey::Dataset(dataset.identity()))
            .or_insert_with(|| id.clone());
        Ok(id)
    }

    fn local_path_node(&mut self, path: &str, mode: InputMode) -> String {
        let key = DatasetKey::Local(path.to_string(), mode);
        if let Some(id) = self.dataset_nodes.get(&key) {
            return id.clone();
        }
        let id = self.ids.next_id();
        self.graph.dataset_nodes.push(GraphDatasetNode {
            id: id.clone(),
            dataset_id: None,
            data_set_definition: Some(DataSetDefinition {
                data_type_short_name: data_type_short_name(DatasetKind::File).to_string(),
                parameter_name: None,
                value: Some(DataSetDefinitionValue::literal(None, path)),
            }),
        });
        self.dataset_nodes.insert(key, id.clone());
        self.source_nodes
            .entry(SourceKey::Local(path.to_string()))
            .or_insert_with(|| id.clone());
        id
    }

    pub(super) fn compute_type(&mut self, name: &str) -> Result<String> {
        if let Some(t) = self.compute_types.get(name) {
            return Ok(t.clone());
        }
        let fallback = &self.composer.config().default_compute_type;
        let compute_type = match self.composer.workspace() {
            Some(ws) => match ws.get_compute_by_name(name)? {
                Some(compute) => compute.compute_type,
                None => {
                    tracing::warn!(
                        workspace = %ws.name(),
                        "compute '{}' not found, assuming type '{}'",
                        name,
                        fallback
                    );
                    fallback.clone()
                }
            },
            None => fallback.clone(),
        };
        self.compute_types.insert(name.to_string(), compute_type.clone());
        Ok(compute_type)
    }

    // ─── Stage 3: interface and defaults ────────────────────────────────────

    fn build_interface(&mut self) -> Result<()> {
        trace_stage!(STAGE_INTERFACE);
        let Some(definition) = self.root_definition.clone() else {
            return Ok(());
        };
        let root = self.composer.pipeline_instance(self.root)?;

        let mut used = Vec::new();
        let mut unused = Vec::new();
        let mut data_paths = Vec::new();
        for (slot, param) in definition.parameters.iter().enumerate() {
            let default = root
                .refs()
                .get(slot)
                .and_then(|r| r.default())
                .or(param.default.as_ref());
            let override_value = self.options.pipeline_parameters.get(&param.name);

            if param.kind == ParamKind::DataPath {
                data_paths.push(DataPathParameter {
                    name: param.name.clone(),
                    default_value: self.data_path_default(default, override_value)?,
                    is_optional: param.is_optional(),
                    data_type_id: DATAPATH_DATA_TYPE.to_string(),
                });
                if !self.used_scalars.contains(&slot) {
                    continue;
                }
            }

            let is_used = self.used_scalars.contains(&slot);
            let entry = InterfaceParameter {
                name: param.name.clone(),
                default_value: override_value
                    .or_else(|| default.and_then(ParameterDefault::as_value))
                    .map(ParamValue::render),
                is_optional: param.is_optional(),
                param_type: param.param_type.wire_code(),
                unused: !is_used,
            };
            if is_used {
                used.push(entry);
            } else {
                unused.push(entry);
            }
        }
        used.extend(unused);
        self.graph.entity_interface = EntityInterface {
            parameters: used,
            data_path_parameter_list: data_paths,
        };

        if let Some(name) = self.composer.pipeline_compute(self.root, self.root)? {
            self.graph.default_compute = Some(ComputeSetting {
                compute_type: self.compute_type(&name)?,
                name,
            });
        }
        self.graph.default_datastore = self
            .composer
            .pipeline_datastore(self.root, self.root)?
            .map(|(ds, _)| DatastoreSetting {
                data_store_name: ds.name,
            });
        Ok(())
    }

    fn data_path_default(
        &self,
        default: Option<&ParameterDefault>,
        override_value: Option<&ParamValue>,
    ) -> Result<Option<DataSetDefinitionValue>> {
        if let Some(value) = override_value {
            return Ok(match value {
                ParamValue::Str(path) => Some(DataSetDefinitionValue::literal(None, path.clone())),
                other => {
                    tracing::warn!(
                        "datapath parameter override '{}' is not a path and is ignored",
                        other
                    );
                    None
                }
            });
        }
        Ok(match default {
            Some(ParameterDefault::Dataset(dataset)) => {
                self.composer
                    .dataset_registry()
                    .dataset_definition_of(dataset)?
                    .value
            }
            Some(ParameterDefault::Value(ParamValue::Str(path))) => {
                Some(DataSetDefinitionValue::literal(None, path.clone()))
            }
            _ => None,
        })
    }

    // ─── Stage 4: post-processing ───────────────────────────────────────────

    fn postprocess(&mut self) {
        trace_stage!(STAGE_POSTPROCESS);
        let removed: FxHashSet<String> = self
            .graph
            .dataset_nodes
            .iter()
            .filter(|n| {
                n.data_set_definition
                    .as_ref()
                    .map_or(true, |d| !d.is_materialized())
            })
            .map(|n| n.id.clone())
            .collect();
        if removed.is_empty() {
            return;
        }
        self.graph.dataset_nodes.retain(|n| !removed.contains(&n.id));
        self.graph
            .edges
            .retain(|e| !removed.contains(&e.source_output_port.node_id));
        self.source_nodes.retain(|_, id| !removed.contains(id));
        tracing::debug!(removed = removed.len(), "dropped dataset nodes without a value");
    }

    // ─── Stage 5: sub-pipelines ─────────────────────────────────────────────

    fn sub_pipelines_info(&mut self) -> Result<super::model::SubPipelinesInfo> {
        trace_stage!(STAGE_SUBGRAPHS);
        self.build_sub_pipelines_info()
    }

    fn finish(self, sub_pipelines_info: super::model::SubPipelinesInfo) -> Result<GraphArtifacts> {
        let mut mapping = BTreeMap::new();
        for (node, graph_id) in &self.graph_ids {
            let instance = self.composer.module(*node)?;
            mapping.insert(instance.instance_id().to_string(), graph_id.clone());
        }
        tracing::debug!(
            modules = self.graph.module_nodes.len(),
            datasets = self.graph.dataset_nodes.len(),
            edges = self.graph.edges.len(),
            "lowered pipeline"
        );
        Ok(GraphArtifacts {
            graph: self.graph,
            module_node_run_settings: self.run_settings,
            sub_pipelines_info,
            module_node_to_graph_node_mapping: mapping,
        })
    }
}

// ============================================================================
// Scalar assignments
// ============================================================================

/// Root signature slots a scalar source refers to.
pub(super) fn root_references(source: &ScalarSource) -> Vec<usize> {
    match source {
        ScalarSource::RootParameter(p) => vec![p.slot()],
        ScalarSource::Template(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ResolvedPart::RootParameter(p) => Some(p.slot()),
                ResolvedPart::Literal(_) => None,
            })
            .collect(),
        ScalarSource::Literal(_) | ScalarSource::Unbound => Vec::new(),
    }
}

/// Wire assignment for a resolved scalar; `None` when nothing is bound.
pub(super) fn assignment_for(name: Option<&str>, source: ScalarSource) -> Option<ParameterAssignment> {
    match source {
        ScalarSource::Literal(value) => Some(ParameterAssignment::literal(name, value.render())),
        ScalarSource::RootParameter(p) => Some(ParameterAssignment::graph_parameter(name, p.name())),
        ScalarSource::Template(parts) => Some(ParameterAssignment::concatenate(
            name,
            parts
                .into_iter()
                .map(|part| match part {
                    ResolvedPart::Literal(text) => ParameterAssignment::literal(None, text),
                    ResolvedPart::RootParameter(p) => ParameterAssignment::graph_parameter(None, p.name()),
                })
                .collect(),
        )),
        ScalarSource::Unbound => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComposeConfig;
    use crate::definition::{ComponentDefinition, ComponentType, InputDefinition, OutputDefinition, ParameterDefinition};
    use crate::graph::is_valid_node_id;
    use crate::parameter::ParameterRef;
    use crate::pipeline::{PipelineFunction, PipelineOutputs, PipelineParam};
    use crate::types::ParamType;
    use crate::validation::ValidateOptions;

    fn producer() -> Arc<ComponentDefinition> {
        Arc::new(
            ComponentDefinition::builder("producer", ComponentType::Command)
                .output(OutputDefinition::new("result", "AnyDirectory"))
                .build()
                .unwrap(),
        )
    }

    fn consumer() -> Arc<ComponentDefinition> {
        Arc::new(
            ComponentDefinition::builder("consumer", ComponentType::Command)
                .input(InputDefinition::new("x", "AnyDirectory"))
                .parameter(ParameterDefinition::new("k", ParamType::Int).with_default(1))
                .build()
                .unwrap(),
        )
    }

    fn composer() -> Composer {
        Composer::new(ComposeConfig::default().with_node_id_seed(42)).unwrap()
    }

    #[test]
    fn test_assignment_for_template() {
        let p = ParameterRef::standalone("msg", None);
        let a = assignment_for(
            Some("text"),
            ScalarSource::Template(vec![
                ResolvedPart::Literal("hi ".into()),
                ResolvedPart::RootParameter(p),
            ]),
        )
        .unwrap();
        assert_eq!(a.value_type, ParameterValueType::Concatenate);
        assert_eq!(a.assignments_to_concatenate.len(), 2);
        assert!(assignment_for(None, ScalarSource::Unbound).is_none());
    }

    #[test]
    fn test_edges_and_dataset_dedup() {
        let (p, c) = (producer(), consumer());
        let dataset = DatasetRef::registered("ds-1", "iris", None);
        let f = PipelineFunction::new("wired", move |composer, _| {
            let first = composer.component(&p).name("first").create()?;
            let result = composer.output(first, "result")?;
            composer.component(&c).name("from_output").arg("x", result).create()?;
            composer.component(&c).name("a").arg("x", &dataset).create()?;
            composer.component(&c).name("b").arg("x", &dataset).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let graph = &artifacts.graph;

        assert_eq!(graph.module_nodes.len(), 4);
        assert_eq!(graph.dataset_nodes.len(), 1);
        assert_eq!(graph.edges.len(), 3);
        assert!(graph.module_nodes.iter().all(|n| is_valid_node_id(&n.id)));
        for edge in &graph.edges {
            assert!(graph.contains_node(&edge.source_output_port.node_id));
            assert!(graph.contains_node(&edge.destination_input_port.node_id));
        }
        let dataset_node = &graph.dataset_nodes[0].id;
        let from_dataset = graph
            .edges
            .iter()
            .filter(|e| &e.source_output_port.node_id == dataset_node)
            .count();
        assert_eq!(from_dataset, 2);
        assert_eq!(artifacts.module_node_to_graph_node_mapping.len(), 4);
        assert_eq!(artifacts.module_node_run_settings.len(), 4);
    }

    #[test]
    fn test_seeded_ids_are_reproducible() {
        let p = producer();
        let f = PipelineFunction::new("one", move |composer, _| {
            composer.component(&p).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let a = GraphBuilder::new(&composer).build(root).unwrap();
        let b = GraphBuilder::new(&composer).build(root).unwrap();
        assert_eq!(a.graph.module_nodes[0].id, b.graph.module_nodes[0].id);
    }

    #[test]
    fn test_empty_pipeline_is_rejected() {
        let f = PipelineFunction::new("empty", |_, _| Ok(PipelineOutputs::new()));
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let err = GraphBuilder::new(&composer).build(root).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyPipeline);
    }

    #[test]
    fn test_overrides_and_unused_parameters() {
        let c = consumer();
        let f = PipelineFunction::new("params", move |composer, args| {
            let k = args.param("k")?;
            composer.component(&c).arg("k", k).create()?;
            Ok(PipelineOutputs::new())
        })
        .param(PipelineParam::new("spare").with_default("x"))
        .param(PipelineParam::new("k").with_default(3));
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let options = LoweringOptions::new()
            .with_parameter("k", 9)
            .with_parameter("nope", 1)
            .with_regenerate_outputs(true);
        let artifacts = GraphBuilder::new(&composer).with_options(options).build(root).unwrap();
        let interface = &artifacts.graph.entity_interface;
        let names: Vec<&str> = interface.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["k", "spare"]);
        assert_eq!(interface.parameters[0].default_value.as_deref(), Some("9"));
        assert_eq!(interface.parameters[0].param_type, "0");
        assert!(interface.parameters[1].unused);
        assert!(artifacts.graph.module_nodes[0].regenerate_output);
    }

    #[test]
    fn test_local_path_input() {
        let c = consumer();
        let f = PipelineFunction::new("local", move |composer, _| {
            composer.component(&c).arg("x", Binding::local_path("./data")).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let node = &artifacts.graph.dataset_nodes[0];
        let value = node.data_set_definition.as_ref().unwrap().value.as_ref().unwrap();
        assert_eq!(value.literal_value.as_ref().unwrap().relative_path, "./data");
        assert_eq!(artifacts.graph.edges[0].source_output_port.port_name, DATASET_OUTPUT_PORT);
    }

    fn literal_path(node: &GraphDatasetNode) -> &str {
        let value = node.data_set_definition.as_ref().unwrap().value.as_ref().unwrap();
        &value.literal_value.as_ref().unwrap().relative_path
    }

    #[test]
    fn test_template_bound_input() {
        let c = consumer();
        let f = PipelineFunction::new("dated", move |composer, args| {
            let date = args.param("date")?;
            composer.component(&c).arg("x", format!("data/{date}")).create()?;
            Ok(PipelineOutputs::new())
        })
        .param(PipelineParam::new("date").with_default("2020"));
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();

        let definition = Arc::clone(composer.pipeline_instance(root).unwrap().definition());
        assert_eq!(definition.parameter("date").unwrap().kind, ParamKind::Scalar);

        let findings = composer.validate(root, &ValidateOptions::new()).unwrap();
        assert!(findings.iter().all(|f| f.kind != ErrorCode::InvalidInputPort), "{findings:?}");

        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let graph = &artifacts.graph;
        assert_eq!(graph.dataset_nodes.len(), 1);
        assert_eq!(literal_path(&graph.dataset_nodes[0]), "data/2020");
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source_output_port.node_id, graph.dataset_nodes[0].id);
        assert!(graph.entity_interface.data_path_parameter_list.is_empty());
        let date = graph.entity_interface.parameter("date").unwrap();
        assert!(!date.unused);

        let options = LoweringOptions::new().with_parameter("date", "2021");
        let artifacts = GraphBuilder::new(&composer).with_options(options).build(root).unwrap();
        assert_eq!(literal_path(&artifacts.graph.dataset_nodes[0]), "data/2021");
    }

    #[test]
    fn test_datapath_parameter_interface() {
        let c = consumer();
        let f = PipelineFunction::new("by_path", move |composer, args| {
            composer.component(&c).arg("x", args.param("data")?).create()?;
            Ok(PipelineOutputs::new())
        })
        .param(PipelineParam::new("data").with_dataset_default(DatasetRef::registered("ds-9", "train", None)));
        let mut composer = composer();
        let root = composer.pipeline(&f).create().unwrap();
        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let graph = &artifacts.graph;

        let list = &graph.entity_interface.data_path_parameter_list;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "data");
        assert_eq!(list[0].data_type_id, DATAPATH_DATA_TYPE);
        assert_eq!(list[0].data_type_id, "DataFrameDirectory");
        let reference = list[0].default_value.as_ref().unwrap().data_set_reference.as_ref().unwrap();
        assert_eq!(reference.id, "ds-9");
        assert!(graph.entity_interface.parameter("data").is_none());

        let setting = &graph.module_nodes[0].module_input_settings[0];
        assert_eq!(setting.data_path_parameter_name.as_deref(), Some("data"));
        assert!(graph.edges.is_empty());
        assert!(graph.dataset_nodes.is_empty());
    }

    /// Registry whose datasets never carry a value.
    struct HollowRegistry;

    impl crate::workspace::DatasetRegistry for HollowRegistry {
        fn ensure_saved(
            &self,
            dataset: &DatasetRef,
            _workspace: Option<&dyn crate::workspace::WorkspaceContext>,
        ) -> Result<DatasetRef> {
            Ok(dataset.clone())
        }

        fn dataset_definition_of(&self, _dataset: &DatasetRef) -> Result<DataSetDefinition> {
            Ok(DataSetDefinition {
                data_type_short_name: "AnyDirectory".to_string(),
                parameter_name: None,
                value: None,
            })
        }
    }

    #[test]
    fn test_unmaterialised_dataset_nodes_are_dropped() {
        let (p, c) = (producer(), consumer());
        let dataset = DatasetRef::registered("ds-hollow", "hollow", None);
        let f = PipelineFunction::new("hollow", move |composer, _| {
            let first = composer.component(&p).name("first").create()?;
            let result = composer.output(first, "result")?;
            composer.component(&c).name("wired").arg("x", result).create()?;
            composer.component(&c).name("hollow").arg("x", &dataset).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = composer().with_dataset_registry(Arc::new(HollowRegistry));
        let root = composer.pipeline(&f).create().unwrap();
        let artifacts = GraphBuilder::new(&composer).build(root).unwrap();
        let graph = &artifacts.graph;

        assert!(graph.dataset_nodes.is_empty());
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.module_nodes.len(), 3);
        for edge in &graph.edges {
            assert!(graph.contains_node(&edge.source_output_port.node_id));
        }
    }
}
