//! Composed pipelines.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::component::{Binding, OutputRef};
use crate::parameter::{ParameterDefault, ParameterRef};
use crate::types::{Datastore, ParamType};

use super::NodeId;

/// How a pipeline parameter is consumed by the pipeline body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Feeds at least one scalar slot.
    Scalar,
    /// Feeds at least one input port.
    DataPath,
    /// Fed nowhere in the tree; still part of the interface.
    Unused,
}

/// One partitioned signature entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineParamDefinition {
    pub name: String,
    pub default: Option<ParameterDefault>,
    pub param_type: ParamType,
    pub kind: ParamKind,
}

impl PipelineParamDefinition {
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Interface of a pipeline as computed after its body ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineDefinition {
    /// Shared by every invocation of the same pipeline function.
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<PipelineParamDefinition>,
    pub outputs: Vec<String>,
    pub default_compute: Option<String>,
    pub default_datastore: Option<Datastore>,
}

impl PipelineDefinition {
    pub fn parameter(&self, name: &str) -> Option<&PipelineParamDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn datapath_parameters(&self) -> impl Iterator<Item = &PipelineParamDefinition> {
        self.parameters.iter().filter(|p| p.kind == ParamKind::DataPath)
    }

    pub fn scalar_parameters(&self) -> impl Iterator<Item = &PipelineParamDefinition> {
        self.parameters.iter().filter(|p| p.kind != ParamKind::DataPath)
    }
}

/// A pipeline node: one invocation of a pipeline function.
#[derive(Debug, Clone)]
pub struct PipelineInstance {
    pub(crate) instance_id: Uuid,
    pub(crate) definition: Arc<PipelineDefinition>,
    pub(crate) label: Option<String>,
    /// Reference handed to the body for each signature slot.
    pub(crate) refs: Vec<ParameterRef>,
    /// Caller-supplied binding for each signature slot, in the caller's scope.
    pub(crate) args: Vec<Option<Binding>>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) outputs: Vec<(String, OutputRef)>,
    pub(crate) default_compute: Option<String>,
    pub(crate) default_datastore: Option<Datastore>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) workspace: Option<String>,
}

impl PipelineInstance {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn definition(&self) -> &Arc<PipelineDefinition> {
        &self.definition
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.definition.name)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child nodes in declaration order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn refs(&self) -> &[ParameterRef] {
        &self.refs
    }

    pub fn arg(&self, slot: usize) -> Option<&Binding> {
        self.args.get(slot).and_then(Option::as_ref)
    }

    pub fn outputs(&self) -> &[(String, OutputRef)] {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&OutputRef> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn default_compute(&self) -> Option<&str> {
        self.default_compute.as_deref()
    }

    pub fn default_datastore(&self) -> Option<&Datastore> {
        self.default_datastore.as_ref()
    }

    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamValue;

    #[test]
    fn test_parameter_views() {
        let def = PipelineDefinition {
            id: Uuid::new_v4(),
            name: "p".into(),
            description: None,
            parameters: vec![
                PipelineParamDefinition {
                    name: "data".into(),
                    default: None,
                    param_type: ParamType::Str,
                    kind: ParamKind::DataPath,
                },
                PipelineParamDefinition {
                    name: "lr".into(),
                    default: Some(ParameterDefault::Value(ParamValue::Float(0.1))),
                    param_type: ParamType::Float,
                    kind: ParamKind::Scalar,
                },
            ],
            outputs: Vec::new(),
            default_compute: None,
            default_datastore: None,
        };
        assert_eq!(def.datapath_parameters().count(), 1);
        assert_eq!(def.scalar_parameters().next().map(|p| p.name.as_str()), Some("lr"));
        assert!(def.parameter("lr").unwrap().is_optional());
        assert!(!def.parameter("data").unwrap().is_optional());
    }
}
