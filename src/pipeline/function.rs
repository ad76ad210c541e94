//! Pipeline functions: signature plus composition body.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::component::Binding;
use crate::dataset::DatasetRef;
use crate::errors::{ComponentError, Result};
use crate::parameter::{ParameterDefault, ParameterRef};
use crate::types::{sanitize_argument_name, Datastore, ParamType, ParamValue};
use crate::validation::ErrorCode;

use super::{Composer, NodeId};

/// One entry of a pipeline signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParam {
    pub name: String,
    pub default: Option<ParameterDefault>,
    /// Annotated type; refined by the slots the parameter feeds.
    pub param_type: Option<ParamType>,
}

impl PipelineParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            param_type: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(ParameterDefault::Value(value.into()));
        self
    }

    pub fn with_dataset_default(mut self, dataset: DatasetRef) -> Self {
        self.default = Some(ParameterDefault::Dataset(dataset));
        self
    }

    pub fn typed(mut self, param_type: ParamType) -> Self {
        self.param_type = Some(param_type);
        self
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        self.name == key || sanitize_argument_name(&self.name) == key
    }
}

type Body = dyn Fn(&mut Composer, &PipelineArgs) -> Result<PipelineOutputs> + Send + Sync;

/// A reusable pipeline: invoking it through [`Composer::pipeline`] runs the
/// body under a fresh builder frame.
#[derive(Clone)]
pub struct PipelineFunction {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) default_compute: Option<String>,
    pub(crate) default_datastore: Option<Datastore>,
    pub(crate) params: Vec<PipelineParam>,
    pub(crate) body: Arc<Body>,
}

impl PipelineFunction {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Composer, &PipelineArgs) -> Result<PipelineOutputs> + Send + Sync + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            default_compute: None,
            default_datastore: None,
            params: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default_compute(mut self, compute: impl Into<String>) -> Self {
        self.default_compute = Some(compute.into());
        self
    }

    pub fn with_default_datastore(mut self, datastore: Datastore) -> Self {
        self.default_datastore = Some(datastore);
        self
    }

    /// Append a signature entry. Declaration order is interface order.
    pub fn param(mut self, param: PipelineParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[PipelineParam] {
        &self.params
    }
}

impl fmt::Debug for PipelineFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFunction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Parameter references handed to a pipeline body, one per signature slot.
#[derive(Debug, Clone)]
pub struct PipelineArgs {
    pub(crate) pipeline: NodeId,
    pub(crate) function: String,
    pub(crate) refs: Vec<ParameterRef>,
}

impl PipelineArgs {
    /// The pipeline node being composed.
    pub fn node(&self) -> NodeId {
        self.pipeline
    }

    pub fn param(&self, name: &str) -> Result<ParameterRef> {
        self.refs
            .iter()
            .find(|r| r.name() == name || sanitize_argument_name(r.name()) == name)
            .cloned()
            .ok_or_else(|| {
                ComponentError::validation(
                    ErrorCode::UnknownArgument,
                    format!("/{}", self.function),
                    format!("pipeline '{}' has no parameter '{}'", self.function, name),
                )
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterRef> {
        self.refs.iter()
    }
}

/// Named outputs returned by a pipeline body.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutputs {
    pub(crate) entries: Vec<(String, Binding)>,
}

impl PipelineOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `value` (an output reference, or a single-output node) as
    /// the pipeline output `name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Binding>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
