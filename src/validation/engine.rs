//! Validation engine for composed pipelines.
//!
//! The engine runs every registered [`ValidationRule`] against each
//! component node under a root and collects all findings; it never stops
//! at the first one, so users see every problem at once. Nodes are checked
//! in parallel and findings are reported in node declaration order.
//!
//! # Quick start
//!
//! ```rust,ignore
//! let engine = ValidationEngine::with_defaults();
//! let errors = engine.validate(&composer, root, &ValidateOptions::default())?;
//! for err in &errors {
//!     eprintln!("{err}");
//! }
//! ```

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::component::ComponentInstance;
use crate::definition::ComponentType;
use crate::errors::Result;
use crate::pipeline::{Composer, InputSource, NodeId};
use crate::types::ParamValue;

use super::error_code::ErrorCode;
use super::errors::ValidationError;

// ─── Options ────────────────────────────────────────────────────────────────

/// Where the pipeline is going to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Host execution: tabular datasets are rejected; compute, run settings
    /// and datastores are not checked.
    Local,
    /// Cloud execution: every check runs.
    #[default]
    Remote,
}

/// Options for [`Composer::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Fail on the first finding instead of returning all of them.
    pub raise_error: bool,
    pub mode: ValidationMode,
    /// Submit-time values for root pipeline parameters.
    pub pipeline_parameters: FxHashMap<String, ParamValue>,
}

impl ValidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raising(mut self) -> Self {
        self.raise_error = true;
        self
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.pipeline_parameters.insert(name.into(), value.into());
        self
    }
}

// ─── Node context ───────────────────────────────────────────────────────────

/// Everything a rule needs to check one component node.
pub struct NodeContext<'a> {
    pub composer: &'a Composer,
    pub node: NodeId,
    pub root: NodeId,
    pub instance: &'a ComponentInstance,
    /// Qualified path of the node, e.g. `/train/trainer`.
    pub path: String,
    pub options: &'a ValidateOptions,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        composer: &'a Composer,
        node: NodeId,
        root: NodeId,
        options: &'a ValidateOptions,
    ) -> Result<Self> {
        Ok(Self {
            composer,
            node,
            root,
            instance: composer.module(node)?,
            path: composer.path_of(node),
            options,
        })
    }

    /// Path of a slot of this node, e.g. `/train/trainer/inputs/x`.
    pub fn slot_path(&self, section: &str, name: &str) -> String {
        format!("{}/{}/{}", self.path, section, name)
    }

    /// Effective value of the parameter at `index`: the resolved binding,
    /// else the declared default.
    pub fn parameter_value(&self, index: usize) -> Result<Option<ParamValue>> {
        let definition = &self.instance.definition.parameters[index];
        match self.instance.parameters.get(index).and_then(Option::as_ref) {
            Some(binding) => Ok(self
                .composer
                .effective_scalar(binding, self.root, &self.options.pipeline_parameters)?
                .or_else(|| definition.default.clone())),
            None => Ok(definition.default.clone()),
        }
    }

    /// Effective value of a parameter by name; resolution failures count
    /// as unset.
    pub fn parameter_value_by_name(&self, name: &str) -> Option<ParamValue> {
        let index = self.instance.definition.parameter_index(name)?;
        self.parameter_value(index).ok().flatten()
    }
}

// ─── Rule trait ─────────────────────────────────────────────────────────────

/// A single check run against every component node.
///
/// Rules are stateless and `Send + Sync` so nodes can be checked in
/// parallel.
pub trait ValidationRule: Send + Sync {
    /// Short, stable identifier for this rule (e.g., `"inputs"`).
    fn name(&self) -> &str;

    /// Whether the rule runs in `mode`.
    fn applies_to(&self, _mode: ValidationMode) -> bool {
        true
    }

    /// Inspect the node and return any findings.
    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError>;
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// Runs a set of [`ValidationRule`]s against every component node of a
/// pipeline.
pub struct ValidationEngine {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidationEngine {
    /// Create an empty engine with no rules.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create an engine with the built-in rules, in order: inputs,
    /// parameters, conditional optionality, run settings, compute,
    /// datastore.
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.add_rule(Box::new(InputsRule));
        engine.add_rule(Box::new(ParametersRule));
        engine.add_rule(Box::new(ConditionalOptionalityRule));
        engine.add_rule(Box::new(RunSettingsRule));
        engine.add_rule(Box::new(ComputeRule));
        engine.add_rule(Box::new(DatastoreRule));
        engine
    }

    /// Register an additional rule.
    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run the rules that apply in the context's mode against one node.
    pub fn validate_node(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(ctx.options.mode))
            .flat_map(|rule| rule.validate(ctx))
            .collect()
    }

    /// Pipeline-level checks followed by every node's findings, in node
    /// declaration order.
    pub fn validate(
        &self,
        composer: &Composer,
        root: NodeId,
        options: &ValidateOptions,
    ) -> Result<Vec<ValidationError>> {
        let _span = tracing::debug_span!("validate", root = %composer.path_of(root)).entered();
        let mut findings = Vec::new();

        let modules = composer.modules_in(root)?;
        if modules.is_empty() {
            findings.push(
                ValidationError::new(
                    ErrorCode::EmptyPipeline,
                    composer.path_of(root),
                    "No node was found in the pipeline",
                )
                .with_hint("Create at least one component inside the pipeline body"),
            );
        }
        if composer.node(root)?.is_pipeline() {
            if let Err(err) = composer.topological_modules(root) {
                match err.as_validation() {
                    Some(v) => findings.push(v.clone()),
                    None => return Err(err),
                }
            }
        }

        let per_node: Vec<Result<Vec<ValidationError>>> = modules
            .par_iter()
            .map(|id| {
                let ctx = NodeContext::new(composer, *id, root, options)?;
                Ok(self.validate_node(&ctx))
            })
            .collect();
        for result in per_node {
            findings.extend(result?);
        }

        tracing::debug!(findings = findings.len(), nodes = modules.len(), "validation finished");
        Ok(findings)
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("rules", &self.rule_names())
            .finish()
    }
}

// ============================================================================
// Built-in rules
// ============================================================================

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// Every required input is bound, and bound to something a port accepts.
struct InputsRule;

impl ValidationRule for InputsRule {
    fn name(&self) -> &str {
        "inputs"
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (definition, port) in ctx.instance.definition.inputs.iter().zip(&ctx.instance.inputs) {
            let path = ctx.slot_path("inputs", &definition.name);
            let missing = || {
                ValidationError::new(
                    ErrorCode::MissingInput,
                    path.clone(),
                    format!("Required input '{}' is not provided", definition.name),
                )
                .with_hint("Bind the input to a dataset or another node's output")
            };
            let Some(binding) = &port.binding else {
                if !definition.optional {
                    errors.push(missing());
                }
                continue;
            };
            match ctx.composer.resolve_input(binding, ctx.root) {
                Ok(InputSource::Unbound) => {
                    if !definition.optional {
                        errors.push(missing());
                    }
                }
                Ok(InputSource::DataPath(p)) => {
                    let supplied = ctx.options.pipeline_parameters.contains_key(p.name());
                    if !supplied && p.default().is_none() && !definition.optional {
                        errors.push(missing());
                    }
                }
                Ok(InputSource::Dataset(d)) => {
                    if ctx.options.mode == ValidationMode::Local && d.is_tabular() {
                        errors.push(ValidationError::new(
                            ErrorCode::InvalidInputPort,
                            path.clone(),
                            format!(
                                "Input '{}' is bound to tabular dataset '{}', which cannot be used in local runs",
                                definition.name,
                                d.name()
                            ),
                        ));
                    }
                }
                Ok(InputSource::Unsupported(kind)) => errors.push(ValidationError::new(
                    ErrorCode::InvalidInputPort,
                    path.clone(),
                    format!(
                        "Input '{}' is bound to a {}; expected a dataset, an output or a parameter",
                        definition.name, kind
                    ),
                )),
                Ok(
                    InputSource::Output { .. }
                    | InputSource::LocalPath(_)
                    | InputSource::Template(_),
                ) => {}
                Err(err) => errors.push(with_path(err, &path)),
            }
        }
        errors
    }
}

// ─── Parameters ─────────────────────────────────────────────────────────────

/// Every required parameter has a value of the right type, range and enum.
struct ParametersRule;

impl ValidationRule for ParametersRule {
    fn name(&self) -> &str {
        "parameters"
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (index, definition) in ctx.instance.definition.parameters.iter().enumerate() {
            let path = ctx.slot_path("parameters", &definition.name);
            match ctx.parameter_value(index) {
                Ok(Some(value)) => {
                    if let Err(issue) = definition.schema.check(&value) {
                        errors.push(ValidationError::new(
                            issue.code,
                            path,
                            format!("Parameter '{}': {}", definition.name, issue.message),
                        ));
                    }
                }
                // Conditionally required parameters are checked separately.
                Ok(None) if !definition.optional && definition.enabled_by.is_none() => {
                    errors.push(ValidationError::new(
                        ErrorCode::MissingParameter,
                        path,
                        format!("Required parameter '{}' is not provided", definition.name),
                    ));
                }
                Ok(None) => {}
                Err(err) => errors.push(with_path(err, &path)),
            }
        }
        errors
    }
}

// ─── Conditional optionality ────────────────────────────────────────────────

/// A parameter with an enabling condition is required while that condition
/// holds.
struct ConditionalOptionalityRule;

impl ValidationRule for ConditionalOptionalityRule {
    fn name(&self) -> &str {
        "conditional_optionality"
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (index, definition) in ctx.instance.definition.parameters.iter().enumerate() {
            let Some(enabled_by) = &definition.enabled_by else {
                continue;
            };
            let Some(enabler) = ctx.parameter_value_by_name(&enabled_by.parameter) else {
                continue;
            };
            if !enabled_by.is_activated_by(&enabler) {
                continue;
            }
            let disabled = definition
                .disabled_by
                .iter()
                .any(|name| ctx.parameter_value_by_name(name).is_some());
            if disabled {
                continue;
            }
            if matches!(ctx.parameter_value(index), Ok(None)) {
                errors.push(ValidationError::new(
                    ErrorCode::MissingParameter,
                    ctx.slot_path("parameters", &definition.name),
                    format!(
                        "Parameter '{}' is required when '{}' is '{}'",
                        definition.name,
                        enabled_by.parameter,
                        enabler.render()
                    ),
                ));
            }
        }
        errors
    }
}

// ─── Run settings ───────────────────────────────────────────────────────────

/// Explicit values only where their entry is active; active values typed
/// and in range; required active entries present.
struct RunSettingsRule;

impl ValidationRule for RunSettingsRule {
    fn name(&self) -> &str {
        "runsettings"
    }

    fn applies_to(&self, mode: ValidationMode) -> bool {
        mode == ValidationMode::Remote
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let settings = &ctx.instance.runsettings;
        for entry in settings.definition().entries() {
            let path = ctx.slot_path("runsettings", &entry.id);
            let explicit = settings.get(&entry.id);
            let Some(variant) = settings.active_variant(&entry.id) else {
                if explicit.is_some() {
                    if let Some(reason) = settings.inactive_reason(&entry.id) {
                        errors.push(ValidationError::new(reason.code, path, reason.message));
                    }
                }
                continue;
            };
            match settings.effective(&entry.id) {
                None => {
                    // An unset compute target falls back to the pipeline
                    // default; the compute rule covers it.
                    if !variant.optional && !variant.is_compute_target {
                        errors.push(ValidationError::new(
                            ErrorCode::MissingRunSetting,
                            path,
                            format!("Required run setting '{}' is not provided", entry.id),
                        ));
                    }
                }
                Some(value) => {
                    if let Some(shape) = variant.json_shape {
                        let parsed = match &value {
                            ParamValue::Json(v) => Ok(v.clone()),
                            ParamValue::Str(s) => serde_json::from_str::<serde_json::Value>(s)
                                .map_err(|e| format!("'{}' is not valid JSON: {}", s, e)),
                            other => Err(format!("expected a JSON value, got {}", other.natural_type())),
                        };
                        match parsed {
                            Ok(v) if !shape.matches(&v) => errors.push(ValidationError::new(
                                ErrorCode::TypeMismatch,
                                path,
                                format!("Run setting '{}' must be a JSON {:?}", entry.id, shape),
                            )),
                            Ok(_) => {}
                            Err(message) => errors.push(ValidationError::new(
                                ErrorCode::TypeMismatch,
                                path,
                                format!("Run setting '{}': {}", entry.id, message),
                            )),
                        }
                    } else if let Err(issue) = variant.schema.check(&value) {
                        errors.push(ValidationError::new(
                            issue.code,
                            path,
                            format!("Run setting '{}': {}", entry.id, issue.message),
                        ));
                    }
                }
            }
        }
        errors
    }
}

// ─── Compute ────────────────────────────────────────────────────────────────

/// The compute a node runs on exists and has an accepted type.
struct ComputeRule;

impl ValidationRule for ComputeRule {
    fn name(&self) -> &str {
        "compute"
    }

    fn applies_to(&self, mode: ValidationMode) -> bool {
        mode == ValidationMode::Remote
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let definition = &ctx.instance.definition;
        if !definition.component_type.uses_compute() {
            return Vec::new();
        }
        let Some(workspace) = ctx.composer.workspace() else {
            return Vec::new();
        };
        let resolution = match ctx.composer.resolve_compute(ctx.node, ctx.root) {
            Ok(r) => r,
            Err(err) => return vec![with_path(err, &ctx.path)],
        };
        let Some(name) = resolution.name else {
            return Vec::new();
        };
        let path = ctx.slot_path("runsettings", "target");

        let compute = match workspace.get_compute_by_name(&name) {
            Ok(c) => c,
            Err(err) => return vec![with_path(err, &path)],
        };
        let Some(compute) = compute else {
            return vec![ValidationError::new(
                ErrorCode::InvalidCompute,
                path,
                format!("Compute '{}' was not found in workspace '{}'", name, workspace.name()),
            )];
        };

        let valid_types = definition
            .runsettings
            .compute_target()
            .map(|entry| entry.primary().valid_compute_types.as_slice())
            .unwrap_or(&[]);
        let accepted = valid_types.is_empty()
            || valid_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&compute.compute_type));
        if accepted {
            Vec::new()
        } else {
            vec![ValidationError::new(
                ErrorCode::InvalidCompute,
                path,
                format!(
                    "Compute '{}' has type '{}', but this component accepts [{}]",
                    compute.name,
                    compute.compute_type,
                    valid_types.join(", ")
                ),
            )]
        }
    }
}

// ─── Datastore ──────────────────────────────────────────────────────────────

/// Structured-stream outputs of Scope components must land on a Data Lake
/// datastore.
struct DatastoreRule;

const STRUCTURED_STREAM: &str = "CosmosStructureStream";

impl ValidationRule for DatastoreRule {
    fn name(&self) -> &str {
        "datastore"
    }

    fn applies_to(&self, mode: ValidationMode) -> bool {
        mode == ValidationMode::Remote
    }

    fn validate(&self, ctx: &NodeContext<'_>) -> Vec<ValidationError> {
        let definition = &ctx.instance.definition;
        if definition.component_type != ComponentType::Scope {
            return Vec::new();
        }
        let mut errors = Vec::new();
        for (index, output) in definition.outputs.iter().enumerate() {
            if output.data_type != STRUCTURED_STREAM {
                continue;
            }
            let path = ctx.slot_path("outputs", &output.name);
            match ctx.composer.resolve_datastore(ctx.node, index, ctx.root) {
                Ok(Some((datastore, _))) if !datastore.is_data_lake() => {
                    errors.push(
                        ValidationError::new(
                            ErrorCode::InvalidDatastore,
                            path,
                            format!(
                                "Output '{}' of type {} must be written to an Azure Data Lake datastore, but datastore '{}' has type '{}'",
                                output.name, STRUCTURED_STREAM, datastore.name, datastore.datastore_type
                            ),
                        )
                        .with_hint("Configure the output or the pipeline with a Data Lake datastore"),
                    );
                }
                Ok(_) => {}
                Err(err) => errors.push(with_path(err, &path)),
            }
        }
        errors
    }
}

/// Turn a resolution failure into a finding at `path`, keeping its code.
fn with_path(err: crate::errors::ComponentError, path: &str) -> ValidationError {
    match err.as_validation() {
        Some(v) if !v.path.is_empty() => v.clone(),
        Some(v) => ValidationError {
            path: path.to_string(),
            ..v.clone()
        },
        None => ValidationError::new(err.code(), path, err.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule_order() {
        let engine = ValidationEngine::with_defaults();
        assert_eq!(
            engine.rule_names(),
            vec![
                "inputs",
                "parameters",
                "conditional_optionality",
                "runsettings",
                "compute",
                "datastore"
            ]
        );
    }

    #[test]
    fn test_local_mode_skips_remote_rules() {
        assert!(!RunSettingsRule.applies_to(ValidationMode::Local));
        assert!(!ComputeRule.applies_to(ValidationMode::Local));
        assert!(!DatastoreRule.applies_to(ValidationMode::Local));
        assert!(InputsRule.applies_to(ValidationMode::Local));
        assert!(RunSettingsRule.applies_to(ValidationMode::Remote));
    }

    #[test]
    fn test_options_builders() {
        let options = ValidateOptions::new()
            .raising()
            .with_mode(ValidationMode::Local)
            .with_parameter("lr", 0.5);
        assert!(options.raise_error);
        assert_eq!(options.mode, ValidationMode::Local);
        assert_eq!(options.pipeline_parameters["lr"], ParamValue::Float(0.5));
    }

    #[test]
    fn test_with_path_fills_empty_path() {
        let err = crate::errors::ComponentError::validation(ErrorCode::TypeMismatch, "", "bad");
        let v = with_path(err, "/p/n/parameters/x");
        assert_eq!(v.path, "/p/n/parameters/x");
        assert_eq!(v.code, ErrorCode::TypeMismatch);
    }
}
