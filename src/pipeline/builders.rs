//! Fluent creation of component and pipeline nodes.

use std::sync::Arc;

use uuid::Uuid;

use crate::component::{Binding, ComponentInstance, OutputRef};
use crate::definition::ComponentDefinition;
use crate::errors::{ComponentError, Result};
use crate::parameter::{ParameterDefault, ParameterRef};
use crate::types::{ParamType, ParamValue};
use crate::validation::ErrorCode;

use super::composer::{BuilderFrame, SlotKind};
use super::{
    Composer, Node, NodeId, ParamKind, PipelineArgs, PipelineDefinition, PipelineFunction,
    PipelineInstance, PipelineParamDefinition,
};

// ─── Component nodes ────────────────────────────────────────────────────────

/// Builder returned by [`Composer::component`].
pub struct ComponentBuilder<'c> {
    composer: &'c mut Composer,
    definition: Arc<ComponentDefinition>,
    args: Vec<(String, Binding)>,
    label: Option<String>,
    detached: bool,
}

impl<'c> ComponentBuilder<'c> {
    pub(crate) fn new(composer: &'c mut Composer, definition: Arc<ComponentDefinition>) -> Self {
        Self {
            composer,
            definition,
            args: Vec::new(),
            label: None,
            detached: false,
        }
    }

    /// Bind an input or parameter by argument or declared name.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Binding>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    pub fn args<I, S>(mut self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (S, Binding)>,
        S: Into<String>,
    {
        self.args
            .extend(kwargs.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// Human-readable node label.
    pub fn name(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Do not register with the current pipeline; see [`Composer::adopt`].
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn create(self) -> Result<NodeId> {
        let Self {
            composer,
            definition,
            args,
            label,
            detached,
        } = self;

        let scope = composer.current_pipeline();
        let mut instance = ComponentInstance::new(Arc::clone(&definition));
        instance.label = label;
        let base = match scope {
            Some(p) => format!("{}/{}", composer.path_of(p), instance.display_name()),
            None => format!("/{}", instance.display_name()),
        };

        for (key, binding) in args {
            if let Some(i) = definition.input_index(&key) {
                let path = format!("{}/inputs/{}", base, definition.inputs[i].name);
                instance.inputs[i].binding =
                    Some(composer.normalize_binding(binding, scope, SlotKind::Input, &path)?);
            } else if let Some(i) = definition.parameter_index(&key) {
                let path = format!("{}/parameters/{}", base, definition.parameters[i].name);
                instance.parameters[i] =
                    Some(composer.normalize_binding(binding, scope, SlotKind::Parameter, &path)?);
            } else {
                tracing::warn!(
                    node = %base,
                    "unknown argument '{}' ignored; '{}' has no input or parameter with that name",
                    key,
                    definition.name
                );
            }
        }

        let id = NodeId(composer.nodes.len());
        composer.nodes.push(Node::Module(instance));
        if let (Some(parent), false) = (scope, detached) {
            composer.attach(parent, id)?;
        }
        tracing::debug!(node = %id, component = %definition.identifier, "created component node");
        Ok(id)
    }
}

// ─── Pipeline nodes ─────────────────────────────────────────────────────────

/// Builder returned by [`Composer::pipeline`].
pub struct PipelineBuilder<'c> {
    composer: &'c mut Composer,
    function: PipelineFunction,
    args: Vec<(String, Binding)>,
    label: Option<String>,
    detached: bool,
}

impl<'c> PipelineBuilder<'c> {
    pub(crate) fn new(composer: &'c mut Composer, function: PipelineFunction) -> Self {
        Self {
            composer,
            function,
            args: Vec::new(),
            label: None,
            detached: false,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Binding>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    pub fn args<I, S>(mut self, kwargs: I) -> Self
    where
        I: IntoIterator<Item = (S, Binding)>,
        S: Into<String>,
    {
        self.args
            .extend(kwargs.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn name(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Run the body under a new builder frame and return the pipeline node.
    pub fn create(self) -> Result<NodeId> {
        let Self {
            composer,
            function,
            args,
            label,
            detached,
        } = self;

        let caller = composer.current_pipeline();
        let display = label.clone().unwrap_or_else(|| function.name.clone());
        let base = match caller {
            Some(p) => format!("{}/{}", composer.path_of(p), display),
            None => format!("/{}", display),
        };

        if composer.stack.len() >= composer.config.max_builder_depth {
            let cycle = detect_cycle(&composer.stack, function.id, &function.name);
            return Err(ComponentError::recursion(composer.config.max_builder_depth, cycle));
        }

        let mut slot_args: Vec<Option<Binding>> = vec![None; function.params.len()];
        for (key, binding) in args {
            match function.params.iter().position(|p| p.matches(&key)) {
                Some(i) => {
                    let path = format!("{}/parameters/{}", base, function.params[i].name);
                    slot_args[i] =
                        Some(composer.normalize_binding(binding, caller, SlotKind::Argument, &path)?);
                }
                None => tracing::warn!(
                    pipeline = %base,
                    "unknown argument '{}' ignored; pipeline '{}' has no such parameter",
                    key,
                    function.name
                ),
            }
        }

        let id = NodeId(composer.nodes.len());
        let refs: Vec<ParameterRef> = function
            .params
            .iter()
            .enumerate()
            .map(|(slot, p)| {
                let default = slot_args[slot]
                    .as_ref()
                    .and_then(default_from_binding)
                    .or_else(|| p.default.clone());
                ParameterRef::new(id, slot, &p.name, default, p.param_type)
            })
            .collect();

        let provisional = PipelineDefinition {
            id: function.id,
            name: function.name.clone(),
            description: function.description.clone(),
            parameters: function
                .params
                .iter()
                .map(|p| PipelineParamDefinition {
                    name: p.name.clone(),
                    default: p.default.clone(),
                    param_type: p.param_type.unwrap_or_default(),
                    kind: ParamKind::Unused,
                })
                .collect(),
            outputs: Vec::new(),
            default_compute: function.default_compute.clone(),
            default_datastore: function.default_datastore.clone(),
        };

        composer.nodes.push(Node::Pipeline(PipelineInstance {
            instance_id: Uuid::new_v4(),
            definition: Arc::new(provisional),
            label,
            refs: refs.clone(),
            args: slot_args,
            children: Vec::new(),
            outputs: Vec::new(),
            default_compute: function.default_compute.clone(),
            default_datastore: function.default_datastore.clone(),
            parent: None,
            workspace: None,
        }));

        composer.stack.push(BuilderFrame {
            pipeline: id,
            function_id: function.id,
            function_name: function.name.clone(),
        });
        tracing::debug!(pipeline = %function.name, depth = composer.stack.len(), "entering pipeline body");
        let body_args = PipelineArgs {
            pipeline: id,
            function: function.name.clone(),
            refs,
        };
        let result = (function.body)(&mut *composer, &body_args);
        composer.stack.pop();
        let returned = result?;

        let mut outputs: Vec<(String, OutputRef)> = Vec::with_capacity(returned.entries.len());
        for (name, binding) in returned.entries {
            let path = format!("{}/outputs/{}", base, name);
            let output = match binding {
                Binding::Output(o) => composer.output(o.node, &o.port)?,
                Binding::Node(n) => composer.single_output(n)?,
                other => {
                    return Err(ComponentError::validation(
                        ErrorCode::InvalidInputPort,
                        path,
                        format!("pipeline output must be a node output, got {}", other.kind()),
                    ))
                }
            };
            if composer.node(output.node)?.parent() != Some(id) {
                return Err(ComponentError::validation(
                    ErrorCode::OutOfScope,
                    path,
                    "pipeline output is not produced by a child of this pipeline",
                ));
            }
            outputs.push((name, output));
        }

        let definition = partition(composer, id, &function, &outputs)?;
        {
            let p = composer.pipeline_mut(id)?;
            p.definition = Arc::new(definition);
            p.outputs = outputs;
        }

        if let (Some(parent), false) = (caller, detached) {
            composer.attach(parent, id)?;
        }
        tracing::debug!(pipeline = %function.name, node = %id, "composed pipeline");
        Ok(id)
    }
}

/// Default a slot reference inherits from the caller's binding.
fn default_from_binding(binding: &Binding) -> Option<ParameterDefault> {
    match binding {
        Binding::Literal(v) => Some(ParameterDefault::Value(v.clone())),
        Binding::Dataset(d) => Some(ParameterDefault::Dataset(d.clone())),
        Binding::Parameter(p) => p.default().cloned(),
        Binding::Template(t) => Some(ParameterDefault::Value(ParamValue::Str(t.value().to_string()))),
        Binding::LocalPath(path) => Some(ParameterDefault::Value(ParamValue::Str(path.clone()))),
        Binding::Output(_) | Binding::Node(_) => None,
    }
}

/// Find the first pipeline function that re-enters itself.
fn detect_cycle(stack: &[BuilderFrame], next_id: Uuid, next_name: &str) -> Vec<String> {
    let ids: Vec<(Uuid, &str)> = stack
        .iter()
        .map(|f| (f.function_id, f.function_name.as_str()))
        .chain(std::iter::once((next_id, next_name)))
        .collect();
    for (end, (id, _)) in ids.iter().enumerate() {
        if let Some(start) = ids[..end].iter().position(|(other, _)| other == id) {
            return ids[start..=end].iter().map(|(_, n)| n.to_string()).collect();
        }
    }
    Vec::new()
}

/// Classify each signature slot by what the body fed it into.
///
/// A slot bound directly to an input port is a datapath parameter;
/// otherwise the first scalar slot or template it reaches gives its type. Nested pipelines were
/// classified when they were created, so their verdicts propagate up.
fn partition(
    composer: &Composer,
    pipeline: NodeId,
    function: &PipelineFunction,
    outputs: &[(String, OutputRef)],
) -> Result<PipelineDefinition> {
    let instance = composer.pipeline_instance(pipeline)?;
    let mut parameters = Vec::with_capacity(function.params.len());

    for (slot, param) in function.params.iter().enumerate() {
        let reference = &instance.refs[slot];
        let mut kind = ParamKind::Unused;
        let mut fed_type: Option<ParamType> = None;

        for child in &instance.children {
            match composer.node(*child)? {
                Node::Module(m) => {
                    for port in &m.inputs {
                        match &port.binding {
                            Some(Binding::Parameter(p)) if p == reference => kind = ParamKind::DataPath,
                            // A template renders to a path string; its parts stay scalars.
                            Some(Binding::Template(t)) if t.parameter_refs().contains(reference) => {
                                fed_type.get_or_insert(ParamType::Str);
                            }
                            _ => {}
                        }
                    }
                    for (j, b) in m.parameters.iter().enumerate() {
                        match b {
                            Some(Binding::Parameter(p)) if p == reference => {
                                fed_type.get_or_insert(m.definition.parameters[j].param_type());
                            }
                            Some(Binding::Template(t)) if t.parameter_refs().contains(reference) => {
                                fed_type.get_or_insert(ParamType::Str);
                            }
                            _ => {}
                        }
                    }
                }
                Node::Pipeline(sub) => {
                    for (k, arg) in sub.args.iter().enumerate() {
                        let Some(sub_param) = sub.definition.parameters.get(k) else {
                            continue;
                        };
                        match arg {
                            Some(Binding::Parameter(p)) if p == reference => match sub_param.kind {
                                ParamKind::DataPath => kind = ParamKind::DataPath,
                                ParamKind::Scalar => {
                                    fed_type.get_or_insert(sub_param.param_type);
                                }
                                ParamKind::Unused => {}
                            },
                            Some(Binding::Template(t)) if t.parameter_refs().contains(reference) => {
                                fed_type.get_or_insert(ParamType::Str);
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        if kind != ParamKind::DataPath && fed_type.is_some() {
            kind = ParamKind::Scalar;
        }
        let param_type = fed_type
            .or(param.param_type)
            .or_else(|| reference.default_value().map(ParamValue::natural_type))
            .unwrap_or_default();
        parameters.push(PipelineParamDefinition {
            name: param.name.clone(),
            default: reference.default().cloned(),
            param_type,
            kind,
        });
    }

    Ok(PipelineDefinition {
        id: function.id,
        name: function.name.clone(),
        description: function.description.clone(),
        parameters,
        outputs: outputs.iter().map(|(n, _)| n.clone()).collect(),
        default_compute: function.default_compute.clone(),
        default_datastore: function.default_datastore.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, id: Uuid) -> BuilderFrame {
        BuilderFrame {
            pipeline: NodeId::new(0),
            function_id: id,
            function_name: name.to_string(),
        }
    }

    #[test]
    fn test_detect_cycle_reports_chain() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let stack = vec![frame("outer", Uuid::new_v4()), frame("a", a), frame("b", b)];
        assert_eq!(detect_cycle(&stack, a, "a"), vec!["a", "b", "a"]);
        assert!(detect_cycle(&stack, Uuid::new_v4(), "c").is_empty());
    }

    #[test]
    fn test_default_from_binding() {
        assert_eq!(
            default_from_binding(&Binding::from(3)),
            Some(ParameterDefault::Value(ParamValue::Int(3)))
        );
        assert_eq!(default_from_binding(&Binding::Node(NodeId::new(1))), None);
        let p = ParameterRef::standalone("x", Some(ParamValue::from("v")));
        assert_eq!(
            default_from_binding(&Binding::from(p)),
            Some(ParameterDefault::Value(ParamValue::from("v")))
        );
    }
}
