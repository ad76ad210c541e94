//! Following bindings through enclosing pipelines.
//!
//! A slot inside a nested pipeline is usually bound to a reference of that
//! pipeline's signature. Resolution walks outward through the argument
//! each caller supplied until it reaches a concrete value, a producer
//! output, a dataset, or a parameter of the root being lowered.

use rustc_hash::FxHashMap;

use crate::component::{Binding, OutputRef};
use crate::dataset::DatasetRef;
use crate::errors::{ComponentError, Result};
use crate::parameter::{FlatPart, ParameterDefault, ParameterRef, TemplateAssignment};
use crate::types::{Datastore, ParamValue};
use crate::validation::ErrorCode;

use super::{Composer, Node, NodeId};

/// Where a scalar slot gets its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarSource {
    Literal(ParamValue),
    /// A parameter of the root pipeline's interface.
    RootParameter(ParameterRef),
    /// A concatenation of literals and root parameters.
    Template(Vec<ResolvedPart>),
    Unbound,
}

/// Piece of a resolved concatenation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPart {
    Literal(String),
    RootParameter(ParameterRef),
}

/// Where an input port gets its data from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Output of a component node.
    Output { node: NodeId, port: String },
    Dataset(DatasetRef),
    LocalPath(String),
    /// A path assembled from a template; rendered at lowering time.
    Template(Vec<ResolvedPart>),
    /// A datapath parameter of the root pipeline.
    DataPath(ParameterRef),
    Unbound,
    /// A binding that cannot feed a port, with its kind.
    Unsupported(&'static str),
}

/// Outcome of compute inheritance for a component node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResolution {
    pub name: Option<String>,
    /// Pipeline whose default supplied the compute.
    pub provider: Option<NodeId>,
    pub use_graph_default: bool,
}

impl Composer {
    // ─── Tree walks ─────────────────────────────────────────────────────────

    /// Component nodes under `root` in declaration order, nested pipelines
    /// expanded in place. A component root yields itself.
    pub fn modules_in(&self, root: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.collect_modules(root, &mut out)?;
        Ok(out)
    }

    fn collect_modules(&self, id: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        match self.node(id)? {
            Node::Module(_) => out.push(id),
            Node::Pipeline(p) => {
                for child in &p.children {
                    self.collect_modules(*child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Pipeline nodes under `root` in pre-order, root first.
    pub fn pipelines_in(&self, root: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.collect_pipelines(root, &mut out)?;
        Ok(out)
    }

    fn collect_pipelines(&self, id: NodeId, out: &mut Vec<NodeId>) -> Result<()> {
        if let Node::Pipeline(p) = self.node(id)? {
            out.push(id);
            for child in &p.children {
                self.collect_pipelines(*child, out)?;
            }
        }
        Ok(())
    }

    /// Component nodes under `root` with every producer ahead of its
    /// consumers; otherwise declaration order is kept.
    ///
    /// Fails with `module_cycle` naming the chain when rebinding closed a
    /// dataflow loop.
    pub fn topological_modules(&self, root: NodeId) -> Result<Vec<NodeId>> {
        let modules = self.modules_in(root)?;
        let position: FxHashMap<NodeId, usize> =
            modules.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(modules.len());
        for id in &modules {
            let mut producers = Vec::new();
            for port in &self.module(*id)?.inputs {
                let Some(binding) = &port.binding else {
                    continue;
                };
                // Broken bindings are reported by validation and lowering.
                if let Ok(InputSource::Output { node, .. }) = self.resolve_input(binding, root) {
                    if let Some(&p) = position.get(&node) {
                        producers.push(p);
                    }
                }
            }
            deps.push(producers);
        }

        // 0 = unvisited, 1 = on the work stack, 2 = emitted
        let mut state = vec![0u8; modules.len()];
        let mut order = Vec::with_capacity(modules.len());
        // (module, index of the next producer to look at)
        let mut work: Vec<(usize, usize)> = Vec::new();

        for start in 0..modules.len() {
            if state[start] != 0 {
                continue;
            }
            state[start] = 1;
            work.push((start, 0));
            while let Some(frame) = work.last_mut() {
                let (i, next) = *frame;
                let Some(&d) = deps[i].get(next) else {
                    work.pop();
                    state[i] = 2;
                    order.push(i);
                    continue;
                };
                frame.1 += 1;
                match state[d] {
                    0 => {
                        state[d] = 1;
                        work.push((d, 0));
                    }
                    1 => {
                        let begin = work.iter().position(|&(k, _)| k == d).unwrap_or(0);
                        let names: Vec<String> = work[begin..]
                            .iter()
                            .map(|&(k, _)| k)
                            .chain(std::iter::once(d))
                            .map(|k| self.path_of(modules[k]))
                            .collect();
                        return Err(ComponentError::validation(
                            ErrorCode::ModuleCycle,
                            self.path_of(root),
                            format!("dataflow cycle: {}", names.join(" -> ")),
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(order.into_iter().map(|i| modules[i]).collect())
    }

    /// Enclosing pipelines from the direct parent up to and including
    /// `root`.
    pub(crate) fn ancestors_until(&self, id: NodeId, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if id == root {
            return out;
        }
        let mut current = self.nodes.get(id.0).and_then(Node::parent);
        while let Some(p) = current {
            out.push(p);
            if p == root {
                break;
            }
            current = self.nodes.get(p.0).and_then(Node::parent);
        }
        out
    }

    // ─── Outputs ────────────────────────────────────────────────────────────

    /// Component node and port that actually produce `output`.
    pub fn resolve_output(&self, output: &OutputRef) -> Result<(NodeId, String)> {
        let mut current = output.clone();
        // Each step descends one pipeline level, so the walk is bounded by
        // the arena size.
        for _ in 0..=self.nodes.len() {
            match self.node(current.node)? {
                Node::Module(_) => return Ok((current.node, current.port)),
                Node::Pipeline(p) => {
                    let inner = p.output(&current.port).cloned().ok_or_else(|| {
                        ComponentError::validation(
                            ErrorCode::InvalidInputPort,
                            format!("{}/outputs/{}", self.path_of(current.node), current.port),
                            format!("pipeline has no output '{}'", current.port),
                        )
                    })?;
                    current = inner;
                }
            }
        }
        Err(ComponentError::validation(
            ErrorCode::ModuleCycle,
            self.path_of(output.node),
            "pipeline outputs refer to each other",
        ))
    }

    // ─── Scalars ────────────────────────────────────────────────────────────

    /// Resolve a scalar binding relative to the pipeline `root`.
    pub fn resolve_scalar(&self, binding: &Binding, root: NodeId) -> Result<ScalarSource> {
        match binding {
            Binding::Literal(v) => Ok(ScalarSource::Literal(v.clone())),
            Binding::Parameter(p) => self.resolve_parameter_scalar(p, root),
            Binding::Template(t) => Ok(ScalarSource::Template(self.resolve_template(t, root)?)),
            Binding::LocalPath(path) => Ok(ScalarSource::Literal(ParamValue::Str(path.clone()))),
            Binding::Dataset(_) | Binding::Output(_) | Binding::Node(_) => {
                Err(ComponentError::validation(
                    ErrorCode::TypeMismatch,
                    "",
                    format!("a {} cannot be bound to a scalar parameter", binding.kind()),
                ))
            }
        }
    }

    fn resolve_parameter_scalar(&self, reference: &ParameterRef, root: NodeId) -> Result<ScalarSource> {
        let scope = reference.scope();
        if scope == root {
            return Ok(ScalarSource::RootParameter(reference.clone()));
        }
        let fallback = || match reference.default_value() {
            Some(v) => ScalarSource::Literal(v.clone()),
            None => ScalarSource::Unbound,
        };
        if scope == NodeId::DETACHED {
            return Ok(fallback());
        }
        let pipeline = self.pipeline_instance(scope)?;
        match pipeline.arg(reference.slot()) {
            Some(arg) => self.resolve_scalar(arg, root),
            None => Ok(fallback()),
        }
    }

    /// Flatten a template and resolve each reference against `root`.
    pub fn resolve_template(&self, template: &TemplateAssignment, root: NodeId) -> Result<Vec<ResolvedPart>> {
        let mut parts = Vec::new();
        for part in template.flatten(self.config.unresolved_reference_policy)? {
            match part {
                FlatPart::Literal(text) => parts.push(ResolvedPart::Literal(text)),
                FlatPart::Value { value, .. } => parts.push(ResolvedPart::Literal(value.render())),
                FlatPart::Parameter { reference, .. } => {
                    match self.resolve_parameter_scalar(&reference, root)? {
                        ScalarSource::Literal(v) => parts.push(ResolvedPart::Literal(v.render())),
                        ScalarSource::RootParameter(p) => parts.push(ResolvedPart::RootParameter(p)),
                        ScalarSource::Template(inner) => parts.extend(inner),
                        ScalarSource::Unbound => {
                            return Err(ComponentError::validation(
                                ErrorCode::MissingParameter,
                                "",
                                format!(
                                    "parameter '{}' used in a template has no value",
                                    reference.name()
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(merge_parts(parts))
    }

    /// Concrete value of a scalar binding with `overrides` applied to root
    /// parameters.
    pub fn effective_scalar(
        &self,
        binding: &Binding,
        root: NodeId,
        overrides: &FxHashMap<String, ParamValue>,
    ) -> Result<Option<ParamValue>> {
        Ok(match self.resolve_scalar(binding, root)? {
            ScalarSource::Literal(v) => Some(v),
            ScalarSource::RootParameter(p) => root_value(&p, overrides),
            ScalarSource::Template(parts) => Some(ParamValue::Str(render_parts(&parts, overrides))),
            ScalarSource::Unbound => None,
        })
    }

    // ─── Inputs ─────────────────────────────────────────────────────────────

    /// Resolve an input-port binding relative to the pipeline `root`.
    pub fn resolve_input(&self, binding: &Binding, root: NodeId) -> Result<InputSource> {
        match binding {
            Binding::Output(o) => {
                let (node, port) = self.resolve_output(o)?;
                Ok(InputSource::Output { node, port })
            }
            Binding::Node(n) => {
                let (node, port) = self.resolve_output(&self.single_output(*n)?)?;
                Ok(InputSource::Output { node, port })
            }
            Binding::Dataset(d) => Ok(InputSource::Dataset(d.clone())),
            Binding::LocalPath(path) => Ok(InputSource::LocalPath(path.clone())),
            Binding::Literal(ParamValue::Str(path)) => Ok(InputSource::LocalPath(path.clone())),
            Binding::Literal(_) => Ok(InputSource::Unsupported("literal")),
            Binding::Template(t) => Ok(InputSource::Template(self.resolve_template(t, root)?)),
            Binding::Parameter(p) => self.resolve_parameter_input(p, root),
        }
    }

    fn resolve_parameter_input(&self, reference: &ParameterRef, root: NodeId) -> Result<InputSource> {
        let scope = reference.scope();
        if scope == root {
            return Ok(InputSource::DataPath(reference.clone()));
        }
        let fallback = || match reference.default() {
            Some(ParameterDefault::Dataset(d)) => InputSource::Dataset(d.clone()),
            Some(ParameterDefault::Value(ParamValue::Str(path))) => InputSource::LocalPath(path.clone()),
            Some(ParameterDefault::Value(_)) => InputSource::Unsupported("literal"),
            None => InputSource::Unbound,
        };
        if scope == NodeId::DETACHED {
            return Ok(fallback());
        }
        let pipeline = self.pipeline_instance(scope)?;
        match pipeline.arg(reference.slot()) {
            Some(arg) => self.resolve_input(arg, root),
            None => Ok(fallback()),
        }
    }

    // ─── Compute and datastore inheritance ──────────────────────────────────

    /// The node's own compute, else the nearest enclosing pipeline default.
    pub fn resolve_compute(&self, module: NodeId, root: NodeId) -> Result<ComputeResolution> {
        if let Some(name) = self.module(module)?.runsettings.target() {
            return Ok(ComputeResolution {
                name: Some(name),
                provider: None,
                use_graph_default: false,
            });
        }
        for ancestor in self.ancestors_until(module, root) {
            let p = self.pipeline_instance(ancestor)?;
            if let Some(name) = &p.default_compute {
                return Ok(ComputeResolution {
                    name: Some(name.clone()),
                    provider: Some(ancestor),
                    use_graph_default: ancestor == root,
                });
            }
        }
        Ok(ComputeResolution {
            name: None,
            provider: None,
            use_graph_default: true,
        })
    }

    /// Default compute of a pipeline, inherited from its ancestors.
    pub fn pipeline_compute(&self, pipeline: NodeId, root: NodeId) -> Result<Option<String>> {
        if let Some(name) = &self.pipeline_instance(pipeline)?.default_compute {
            return Ok(Some(name.clone()));
        }
        for ancestor in self.ancestors_until(pipeline, root) {
            if let Some(name) = &self.pipeline_instance(ancestor)?.default_compute {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }

    /// Default datastore of a pipeline: its own, an ancestor's, then the
    /// workspace default.
    pub fn pipeline_datastore(&self, pipeline: NodeId, root: NodeId) -> Result<Option<(Datastore, Option<NodeId>)>> {
        if let Some(ds) = &self.pipeline_instance(pipeline)?.default_datastore {
            return Ok(Some((ds.clone(), Some(pipeline))));
        }
        for ancestor in self.ancestors_until(pipeline, root) {
            if let Some(ds) = &self.pipeline_instance(ancestor)?.default_datastore {
                return Ok(Some((ds.clone(), Some(ancestor))));
            }
        }
        self.workspace_datastore()
    }

    /// Datastore an output writes to and the pipeline that supplied it
    /// (`None` when set on the port or taken from the workspace).
    pub fn resolve_datastore(
        &self,
        module: NodeId,
        output_index: usize,
        root: NodeId,
    ) -> Result<Option<(Datastore, Option<NodeId>)>> {
        let instance = self.module(module)?;
        if let Some(ds) = instance.outputs.get(output_index).and_then(|o| o.datastore.clone()) {
            return Ok(Some((ds, None)));
        }
        for ancestor in self.ancestors_until(module, root) {
            if let Some(ds) = &self.pipeline_instance(ancestor)?.default_datastore {
                return Ok(Some((ds.clone(), Some(ancestor))));
            }
        }
        self.workspace_datastore()
    }

    fn workspace_datastore(&self) -> Result<Option<(Datastore, Option<NodeId>)>> {
        match &self.workspace {
            Some(ws) => Ok(ws.get_default_datastore()?.map(|ds| (ds, None))),
            None => Ok(None),
        }
    }
}

fn root_value(reference: &ParameterRef, overrides: &FxHashMap<String, ParamValue>) -> Option<ParamValue> {
    overrides
        .get(reference.name())
        .cloned()
        .or_else(|| reference.default_value().cloned())
}

/// Text of a resolved concatenation with `overrides` applied to root
/// parameters. Root parameters without a value render as empty.
pub fn render_parts(parts: &[ResolvedPart], overrides: &FxHashMap<String, ParamValue>) -> String {
    let mut text = String::new();
    for part in parts {
        match part {
            ResolvedPart::Literal(s) => text.push_str(s),
            ResolvedPart::RootParameter(p) => {
                if let Some(v) = root_value(p, overrides) {
                    text.push_str(&v.render());
                }
            }
        }
    }
    text
}

fn merge_parts(parts: Vec<ResolvedPart>) -> Vec<ResolvedPart> {
    let mut merged: Vec<ResolvedPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(ResolvedPart::Literal(prev)), ResolvedPart::Literal(next)) => prev.push_str(&next),
            (_, part) => merged.push(part),
        }
    }
    merged.retain(|p| !matches!(p, ResolvedPart::Literal(s) if s.is_empty()));
    merged
}
