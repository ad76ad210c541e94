//! Validation, lowering and hand-off to a submission sink.

use rustc_hash::FxHashSet;

use crate::dataset::DatasetRef;
use crate::errors::Result;
use crate::graph::{GraphArtifacts, GraphBuilder, LoweringOptions};
use crate::parameter::ParameterDefault;
use crate::validation::{Finding, ValidateOptions, ValidationEngine, ValidationError, ValidationMode};
use crate::workspace::SubmissionSink;

use super::{Composer, InputSource, NodeId};

impl Composer {
    /// Validate the tree under `root` with the default rules.
    ///
    /// With `raise_error` the first finding is returned as the error;
    /// otherwise every finding is returned in node order.
    pub fn validate(&self, root: NodeId, options: &ValidateOptions) -> Result<Vec<Finding>> {
        self.validate_with(&ValidationEngine::with_defaults(), root, options)
    }

    pub fn validate_with(
        &self,
        engine: &ValidationEngine,
        root: NodeId,
        options: &ValidateOptions,
    ) -> Result<Vec<Finding>> {
        let errors = engine.validate(self, root, options)?;
        if options.raise_error {
            if let Some(first) = errors.into_iter().next() {
                return Err(first.into());
            }
            return Ok(Vec::new());
        }
        Ok(errors.iter().map(ValidationError::to_finding).collect())
    }

    /// Lower the tree under `root` into the wire artifacts.
    pub fn lower(&self, root: NodeId, options: LoweringOptions) -> Result<GraphArtifacts> {
        GraphBuilder::new(self).with_options(options).build(root)
    }

    /// Validate (when configured), save datasets, lower, and submit.
    /// Returns the run id reported by the sink.
    pub fn submit(&self, root: NodeId, sink: &dyn SubmissionSink, options: LoweringOptions) -> Result<String> {
        let artifacts = self.prepare(root, options)?;
        let run_id = sink.submit(
            &artifacts.graph,
            &artifacts.module_node_run_settings,
            &artifacts.sub_pipelines_info,
        )?;
        tracing::info!(pipeline = %self.path_of(root), run_id = %run_id, "submitted pipeline");
        Ok(run_id)
    }

    /// Like [`submit`](Self::submit) but creates a draft.
    pub fn draft(&self, root: NodeId, sink: &dyn SubmissionSink, options: LoweringOptions) -> Result<String> {
        let artifacts = self.prepare(root, options)?;
        let draft_id = sink.draft(
            &artifacts.graph,
            &artifacts.module_node_run_settings,
            &artifacts.sub_pipelines_info,
        )?;
        tracing::info!(pipeline = %self.path_of(root), draft_id = %draft_id, "created pipeline draft");
        Ok(draft_id)
    }

    fn prepare(&self, root: NodeId, options: LoweringOptions) -> Result<GraphArtifacts> {
        if self.config.validate_on_submit {
            let validate = ValidateOptions {
                raise_error: true,
                mode: ValidationMode::Remote,
                pipeline_parameters: options.pipeline_parameters.clone(),
            };
            self.validate(root, &validate)?;
        }
        for dataset in self.datasets_in(root)? {
            self.datasets.ensure_saved(&dataset, self.workspace())?;
        }
        self.lower(root, options)
    }

    /// Datasets consumed anywhere under `root`, each once.
    fn datasets_in(&self, root: NodeId) -> Result<Vec<DatasetRef>> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut push = |d: DatasetRef| {
            if seen.insert(d.identity()) {
                out.push(d);
            }
        };
        if let Ok(pipeline) = self.pipeline_instance(root) {
            for reference in pipeline.refs() {
                if let Some(ParameterDefault::Dataset(d)) = reference.default() {
                    push(d.clone());
                }
            }
        }
        for module in self.modules_in(root)? {
            for port in &self.module(module)?.inputs {
                let Some(binding) = &port.binding else {
                    continue;
                };
                if let InputSource::Dataset(d) = self.resolve_input(binding, root)? {
                    push(d);
                }
            }
        }
        Ok(out)
    }
}
