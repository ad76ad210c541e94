//! The composition context: node arena plus builder stack.

use std::sync::Arc;

use uuid::Uuid;

use crate::component::{Binding, ComponentInstance, InputPort, OutputPort, OutputRef, RunSettings};
use crate::config::{ComposeConfig, UnresolvedReferencePolicy};
use crate::definition::ComponentDefinition;
use crate::errors::{ComponentError, Result};
use crate::parameter::{contains_placeholder, Resolved, TemplateAssignment, TemplateBinding};
use crate::types::{Datastore, ParamValue};
use crate::validation::ErrorCode;
use crate::workspace::{DatasetRegistry, DefaultDatasetRegistry, WorkspaceContext};

use super::builders::{ComponentBuilder, PipelineBuilder};
use super::{Node, NodeId, PipelineFunction, PipelineInstance};

/// One pipeline currently being composed.
#[derive(Debug, Clone)]
pub(crate) struct BuilderFrame {
    pub(crate) pipeline: NodeId,
    pub(crate) function_id: Uuid,
    pub(crate) function_name: String,
}

/// Which kind of slot a binding is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Input,
    Parameter,
    /// A pipeline argument; may end up feeding either kind.
    Argument,
}

/// Owns every node created during composition.
///
/// Composition is single-threaded: the builder stack is an explicit field,
/// not thread-local state, and is bounded by
/// [`ComposeConfig::max_builder_depth`].
pub struct Composer {
    pub(crate) config: ComposeConfig,
    pub(crate) nodes: Vec<Node>,
    pub(crate) stack: Vec<BuilderFrame>,
    pub(crate) workspace: Option<Arc<dyn WorkspaceContext>>,
    pub(crate) datasets: Arc<dyn DatasetRegistry>,
}

impl Composer {
    /// Create a composer after validating `config`.
    pub fn new(config: ComposeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            nodes: Vec::new(),
            stack: Vec::new(),
            workspace: None,
            datasets: Arc::new(DefaultDatasetRegistry),
        })
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceContext>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_dataset_registry(mut self, registry: Arc<dyn DatasetRegistry>) -> Self {
        self.datasets = registry;
        self
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    pub fn workspace(&self) -> Option<&dyn WorkspaceContext> {
        self.workspace.as_deref()
    }

    pub fn dataset_registry(&self) -> &dyn DatasetRegistry {
        self.datasets.as_ref()
    }

    // ─── Creation ───────────────────────────────────────────────────────────

    /// Start creating a node for `definition` in the current pipeline.
    pub fn component(&mut self, definition: &Arc<ComponentDefinition>) -> ComponentBuilder<'_> {
        ComponentBuilder::new(self, Arc::clone(definition))
    }

    /// Start invoking `function`; the resulting pipeline becomes a child of
    /// the current pipeline, or a root when none is being built.
    pub fn pipeline(&mut self, function: &PipelineFunction) -> PipelineBuilder<'_> {
        PipelineBuilder::new(self, function.clone())
    }

    /// Invoke `function` with keyword arguments.
    pub fn invoke<I, S>(&mut self, function: &PipelineFunction, kwargs: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = (S, Binding)>,
        S: Into<String>,
    {
        self.pipeline(function).args(kwargs).create()
    }

    // ─── Node access ────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ComponentError::unknown_node(format!("no node {}", id)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| ComponentError::unknown_node(format!("no node {}", id)))
    }

    pub fn module(&self, id: NodeId) -> Result<&ComponentInstance> {
        self.node(id)?
            .as_module()
            .ok_or_else(|| ComponentError::unknown_node(format!("{} is a pipeline, not a component", id)))
    }

    pub(crate) fn module_mut(&mut self, id: NodeId) -> Result<&mut ComponentInstance> {
        match self.node_mut(id)? {
            Node::Module(m) => Ok(m),
            Node::Pipeline(_) => Err(ComponentError::unknown_node(format!(
                "{} is a pipeline, not a component",
                id
            ))),
        }
    }

    pub fn pipeline_instance(&self, id: NodeId) -> Result<&PipelineInstance> {
        self.node(id)?
            .as_pipeline()
            .ok_or_else(|| ComponentError::unknown_node(format!("{} is a component, not a pipeline", id)))
    }

    pub(crate) fn pipeline_mut(&mut self, id: NodeId) -> Result<&mut PipelineInstance> {
        match self.node_mut(id)? {
            Node::Pipeline(p) => Ok(p),
            Node::Module(_) => Err(ComponentError::unknown_node(format!(
                "{} is a component, not a pipeline",
                id
            ))),
        }
    }

    pub fn children(&self, pipeline: NodeId) -> Result<&[NodeId]> {
        Ok(self.pipeline_instance(pipeline)?.children())
    }

    /// Pipeline at the top of the builder stack.
    pub fn current_pipeline(&self) -> Option<NodeId> {
        self.stack.last().map(|f| f.pipeline)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Qualified path of a node, e.g. `/train/trainer`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            match self.nodes.get(n.0) {
                Some(node) => {
                    names.push(node.display_name().to_string());
                    current = node.parent();
                }
                None => break,
            }
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    // ─── Registration ───────────────────────────────────────────────────────

    /// Link `child` under `parent` after the affinity and duplicate checks.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_node = self.node(child)?;
        if let Some(existing) = child_node.parent() {
            return Err(ComponentError::validation(
                ErrorCode::DuplicateNode,
                self.path_of(child),
                format!(
                    "node already belongs to pipeline '{}'",
                    self.node(existing)?.display_name()
                ),
            ));
        }
        if child == parent {
            return Err(ComponentError::validation(
                ErrorCode::DuplicateNode,
                self.path_of(child),
                "a pipeline cannot contain itself",
            ));
        }
        let child_ws = child_node.workspace().map(str::to_string);
        let parent_ws = self.pipeline_instance(parent)?.workspace.clone();
        if let (Some(a), Some(b)) = (&parent_ws, &child_ws) {
            if a != b {
                return Err(ComponentError::validation(
                    ErrorCode::WorkspaceAffinity,
                    self.path_of(child),
                    format!(
                        "node belongs to workspace '{}' but pipeline '{}' uses workspace '{}'",
                        b,
                        self.node(parent)?.display_name(),
                        a
                    ),
                ));
            }
        }

        self.node_mut(child)?.set_parent(parent);
        let p = self.pipeline_mut(parent)?;
        p.children.push(child);
        if p.workspace.is_none() {
            p.workspace = child_ws;
        }
        tracing::debug!(parent = %parent, child = %child, "registered child node");
        Ok(())
    }

    /// Add a node created with `detached()` to the current pipeline.
    pub fn adopt(&mut self, node: NodeId) -> Result<()> {
        let parent = self.current_pipeline().ok_or_else(|| {
            ComponentError::validation(
                ErrorCode::OutOfScope,
                self.path_of(node),
                "no pipeline is being built",
            )
        })?;
        self.attach(parent, node)
    }

    // ─── Binding normalization ──────────────────────────────────────────────

    fn scope_bindings(&self, scope: NodeId) -> Vec<(String, TemplateBinding)> {
        match self.pipeline_instance(scope) {
            Ok(p) => p
                .refs
                .iter()
                .map(|r| (r.name().to_string(), TemplateBinding::Parameter(r.clone())))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Only output of a node, for binding a whole node to an input.
    pub(crate) fn single_output(&self, id: NodeId) -> Result<OutputRef> {
        let names: Vec<&str> = match self.node(id)? {
            Node::Module(m) => m.definition.outputs.iter().map(|o| o.name.as_str()).collect(),
            Node::Pipeline(p) => p.outputs.iter().map(|(n, _)| n.as_str()).collect(),
        };
        match names.as_slice() {
            [only] => Ok(OutputRef::new(id, *only)),
            _ => Err(ComponentError::validation(
                ErrorCode::InvalidInputPort,
                self.path_of(id),
                format!(
                    "node has {} outputs; bind one of them explicitly",
                    names.len()
                ),
            )),
        }
    }

    /// Output reference by argument or declared name.
    pub fn output(&self, node: NodeId, name: &str) -> Result<OutputRef> {
        let declared = match self.node(node)? {
            Node::Module(m) => m
                .definition
                .output(name)
                .map(|o| o.name.clone()),
            Node::Pipeline(p) => p.output(name).map(|_| name.to_string()),
        };
        declared.map(|port| OutputRef::new(node, port)).ok_or_else(|| {
            ComponentError::validation(
                ErrorCode::InvalidInputPort,
                format!("{}/outputs/{}", self.path_of(node), name),
                format!("node has no output '{}'", name),
            )
        })
    }

    fn check_parameter_scope(
        &self,
        reference: &crate::parameter::ParameterRef,
        scope: Option<NodeId>,
        path: &str,
    ) -> Result<()> {
        if reference.scope() == NodeId::DETACHED || Some(reference.scope()) == scope {
            return Ok(());
        }
        Err(ComponentError::validation(
            ErrorCode::OutOfScope,
            path,
            format!(
                "parameter '{}' belongs to pipeline '{}', not the pipeline being built",
                reference.name(),
                self.nodes
                    .get(reference.scope().0)
                    .map_or("<unknown>", |n| n.display_name())
            ),
        ))
    }

    fn check_output_scope(&self, output: &OutputRef, scope: Option<NodeId>, path: &str) -> Result<OutputRef> {
        let normalized = self.output(output.node, &output.port)?;
        let producer_parent = self.node(output.node)?.parent();
        if producer_parent != scope {
            return Err(ComponentError::validation(
                ErrorCode::OutOfScope,
                path,
                format!(
                    "output '{}' of '{}' is not produced by a node of the pipeline being built",
                    output.port,
                    self.node(output.node)?.display_name()
                ),
            ));
        }
        Ok(normalized)
    }

    /// Bring a caller-supplied binding into canonical form for `scope`.
    ///
    /// Whole nodes become their single output, strings with bound
    /// placeholders become templates, plain strings on input ports become
    /// local paths, and references are checked against the scope.
    pub(crate) fn normalize_binding(
        &self,
        binding: Binding,
        scope: Option<NodeId>,
        slot: SlotKind,
        path: &str,
    ) -> Result<Binding> {
        match binding {
            Binding::Node(id) => {
                let output = self.single_output(id)?;
                Ok(Binding::Output(self.check_output_scope(&output, scope, path)?))
            }
            Binding::Output(output) => Ok(Binding::Output(self.check_output_scope(&output, scope, path)?)),
            Binding::Parameter(p) => {
                self.check_parameter_scope(&p, scope, path)?;
                Ok(Binding::Parameter(p))
            }
            Binding::Template(t) => {
                for p in t.parameter_refs() {
                    self.check_parameter_scope(&p, scope, path)?;
                }
                Ok(Binding::Template(t))
            }
            Binding::Literal(ParamValue::Str(text)) => {
                let text = match scope {
                    Some(scope) if contains_placeholder(&text) => {
                        match TemplateAssignment::resolve(&text, &self.scope_bindings(scope)) {
                            Resolved::Template(t) => return Ok(Binding::Template(t)),
                            Resolved::Plain(text) => {
                                self.report_unresolved(&text, path)?;
                                text
                            }
                        }
                    }
                    _ => text,
                };
                match slot {
                    SlotKind::Input => Ok(Binding::LocalPath(text)),
                    SlotKind::Parameter | SlotKind::Argument => Ok(Binding::Literal(ParamValue::Str(text))),
                }
            }
            Binding::Literal(value) if slot == SlotKind::Input => Err(ComponentError::validation(
                ErrorCode::InvalidInputPort,
                path,
                format!(
                    "input must be bound to a dataset, an output or a parameter, got {} '{}'",
                    value.natural_type(),
                    value
                ),
            )),
            other @ (Binding::Literal(_) | Binding::Dataset(_) | Binding::LocalPath(_)) => Ok(other),
        }
    }

    fn report_unresolved(&self, text: &str, path: &str) -> Result<()> {
        match self.config.unresolved_reference_policy {
            UnresolvedReferencePolicy::Warn => {
                tracing::warn!(
                    slot = %path,
                    "'{}' contains placeholders that name no parameter in scope; kept as literal",
                    text
                );
                Ok(())
            }
            UnresolvedReferencePolicy::Error => Err(ComponentError::validation(
                ErrorCode::UnresolvedReference,
                path,
                format!("'{}' contains placeholders that name no parameter in scope", text),
            )),
        }
    }

    // ─── Rebinding and configuration ────────────────────────────────────────

    /// Rebind inputs or parameters of a component after creation. `None`
    /// values are ignored; unknown names warn and are dropped.
    pub fn set_inputs<I, S>(&mut self, node: NodeId, kwargs: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Option<Binding>)>,
        S: Into<String>,
    {
        let scope = self.module(node)?.parent;
        let base = self.path_of(node);
        let definition = Arc::clone(&self.module(node)?.definition);
        for (key, binding) in kwargs {
            let key = key.into();
            let Some(binding) = binding else {
                continue;
            };
            if let Some(i) = definition.input_index(&key) {
                let path = format!("{}/inputs/{}", base, definition.inputs[i].name);
                let b = self.normalize_binding(binding, scope, SlotKind::Input, &path)?;
                self.module_mut(node)?.inputs[i].binding = Some(b);
            } else if let Some(i) = definition.parameter_index(&key) {
                let path = format!("{}/parameters/{}", base, definition.parameters[i].name);
                let b = self.normalize_binding(binding, scope, SlotKind::Parameter, &path)?;
                self.module_mut(node)?.parameters[i] = Some(b);
            } else {
                tracing::warn!(
                    node = %base,
                    "unknown argument '{}' ignored; '{}' has no input or parameter with that name",
                    key,
                    definition.name
                );
            }
        }
        Ok(())
    }

    pub fn input_port_mut(&mut self, node: NodeId, name: &str) -> Result<&mut InputPort> {
        let path = format!("{}/inputs/{}", self.path_of(node), name);
        let module = self.module_mut(node)?;
        match module.definition.input_index(name) {
            Some(i) => Ok(&mut module.inputs[i]),
            None => Err(ComponentError::validation(
                ErrorCode::UnknownArgument,
                path,
                format!("no input named '{}'", name),
            )),
        }
    }

    /// Output port settings; pipeline outputs resolve to the producing
    /// component's port.
    pub fn output_port_mut(&mut self, node: NodeId, name: &str) -> Result<&mut OutputPort> {
        let output = self.output(node, name)?;
        let (module_id, port) = self.resolve_output(&output)?;
        let module = self.module_mut(module_id)?;
        let index = module
            .definition
            .outputs
            .iter()
            .position(|o| o.name == port)
            .ok_or_else(|| ComponentError::unknown_node(format!("no output '{}'", port)))?;
        Ok(&mut module.outputs[index])
    }

    pub fn runsettings_mut(&mut self, node: NodeId) -> Result<&mut RunSettings> {
        Ok(&mut self.module_mut(node)?.runsettings)
    }

    pub fn set_regenerate_output(&mut self, node: NodeId, regenerate: bool) -> Result<()> {
        self.module_mut(node)?.regenerate_output = regenerate;
        Ok(())
    }

    pub fn set_default_compute(&mut self, pipeline: NodeId, compute: impl Into<String>) -> Result<()> {
        self.pipeline_mut(pipeline)?.default_compute = Some(compute.into());
        Ok(())
    }

    pub fn set_default_datastore(&mut self, pipeline: NodeId, datastore: Datastore) -> Result<()> {
        self.pipeline_mut(pipeline)?.default_datastore = Some(datastore);
        Ok(())
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            config: ComposeConfig::default(),
            nodes: Vec::new(),
            stack: Vec::new(),
            workspace: None,
            datasets: Arc::new(DefaultDatasetRegistry),
        }
    }
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("depth", &self.stack.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetRef;
    use crate::definition::{ComponentType, InputDefinition, OutputDefinition, ParameterDefinition};
    use crate::graph::LoweringOptions;
    use crate::pipeline::{PipelineOutputs, PipelineParam, ScalarSource};
    use crate::types::ParamType;

    fn producer(workspace: Option<&str>) -> Arc<ComponentDefinition> {
        let mut builder = ComponentDefinition::builder("producer", ComponentType::Command)
            .output(OutputDefinition::new("result", "AnyDirectory"));
        if let Some(ws) = workspace {
            builder = builder.workspace(ws);
        }
        Arc::new(builder.build().unwrap())
    }

    fn consumer() -> Arc<ComponentDefinition> {
        Arc::new(
            ComponentDefinition::builder("consumer", ComponentType::Command)
                .input(InputDefinition::new("x", "AnyDirectory"))
                .parameter(ParameterDefinition::new("text", ParamType::Str).with_default(""))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_workspace_affinity() {
        let (a, b) = (producer(Some("ws-a")), producer(Some("ws-b")));
        let f = PipelineFunction::new("mixed", move |composer, _| {
            composer.component(&a).create()?;
            composer.component(&b).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = Composer::default();
        let err = composer.pipeline(&f).create().unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkspaceAffinity);
        assert!(err.to_string().contains("ws-b"), "{err}");

        let (a, unpinned) = (producer(Some("ws-a")), producer(None));
        let f = PipelineFunction::new("pinned", move |composer, _| {
            composer.component(&a).create()?;
            composer.component(&unpinned).create()?;
            Ok(PipelineOutputs::new())
        });
        let root = composer.pipeline(&f).create().unwrap();
        assert_eq!(composer.pipeline_instance(root).unwrap().workspace(), Some("ws-a"));
    }

    #[test]
    fn test_adopt_and_duplicate_node() {
        let p = producer(None);
        let f = PipelineFunction::new("adopting", move |composer, _| {
            let node = composer.component(&p).detached().create()?;
            assert!(composer.node(node)?.parent().is_none());
            composer.adopt(node)?;
            let err = composer.adopt(node).unwrap_err();
            assert_eq!(err.code(), ErrorCode::DuplicateNode);
            Ok(PipelineOutputs::new())
        });
        let mut composer = Composer::default();
        let root = composer.pipeline(&f).create().unwrap();
        let children = composer.children(root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(composer.node(children[0]).unwrap().parent(), Some(root));
        assert_eq!(composer.path_of(children[0]), "/adopting/producer");
    }

    #[test]
    fn test_adopt_outside_pipeline() {
        let mut composer = Composer::default();
        let node = composer.component(&producer(None)).create().unwrap();
        let err = composer.adopt(node).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfScope);
    }

    #[test]
    fn test_foreign_references_are_out_of_scope() {
        let p = producer(None);
        let first_body = PipelineFunction::new("first", move |composer, _| {
            composer.component(&p).create()?;
            Ok(PipelineOutputs::new())
        })
        .param(PipelineParam::new("tag").with_default("t"));
        let mut composer = Composer::default();
        let first = composer.pipeline(&first_body).create().unwrap();
        let foreign_node = composer.children(first).unwrap()[0];
        let foreign_param = composer.pipeline_instance(first).unwrap().refs()[0].clone();

        let c = consumer();
        let steals_output = PipelineFunction::new("steals_output", move |composer, _| {
            let result = composer.output(foreign_node, "result")?;
            composer.component(&c).arg("x", result).create()?;
            Ok(PipelineOutputs::new())
        });
        let err = composer.pipeline(&steals_output).create().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfScope);
        assert!(err.to_string().contains("/steals_output/consumer/inputs/x"), "{err}");

        let c = consumer();
        let steals_param = PipelineFunction::new("steals_param", move |composer, _| {
            composer.component(&c).arg("text", &foreign_param).create()?;
            Ok(PipelineOutputs::new())
        });
        let err = composer.pipeline(&steals_param).create().unwrap_err();
        assert_eq!(err.code(), ErrorCode::OutOfScope);
        assert!(err.to_string().contains("'tag'"), "{err}");
    }

    #[test]
    fn test_set_inputs_rebinds_and_resolves() {
        let (p, c) = (producer(None), consumer());
        let dataset = DatasetRef::registered("ds-1", "iris", None);
        let f = PipelineFunction::new("rebind", move |composer, _| {
            composer.component(&p).create()?;
            composer.component(&c).arg("x", &dataset).create()?;
            Ok(PipelineOutputs::new())
        })
        .param(PipelineParam::new("run").with_default("r1"));
        let mut composer = Composer::new(ComposeConfig::default().with_node_id_seed(3)).unwrap();
        let root = composer.pipeline(&f).create().unwrap();
        let (first, second) = {
            let children = composer.children(root).unwrap();
            (children[0], children[1])
        };

        let before = composer.lower(root, LoweringOptions::new()).unwrap();
        assert_eq!(before.graph.dataset_nodes.len(), 1);

        let result = composer.output(first, "result").unwrap();
        composer
            .set_inputs(
                second,
                [
                    ("x", Some(Binding::from(result))),
                    ("text", Some(Binding::from("tag-@@run@@"))),
                    ("missing", Some(Binding::from(1))),
                    ("text", None),
                ],
            )
            .unwrap();

        let text = composer.module(second).unwrap().parameter("text").cloned().unwrap();
        match composer.resolve_scalar(&text, root).unwrap() {
            ScalarSource::Template(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected a template, got {other:?}"),
        }

        let after = composer.lower(root, LoweringOptions::new()).unwrap();
        let graph = &after.graph;
        assert!(graph.dataset_nodes.is_empty());
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source_output_port.port_name, "result");
        assert!(!graph.entity_interface.parameter("run").unwrap().unused);
    }

    #[test]
    fn test_input_rejects_non_path_literal() {
        let c = consumer();
        let f = PipelineFunction::new("bad", move |composer, _| {
            composer.component(&c).arg("x", 3).create()?;
            Ok(PipelineOutputs::new())
        });
        let mut composer = Composer::default();
        let err = composer.pipeline(&f).create().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInputPort);
    }
}
