//! Component instances and the values bound to their slots.
//!
//! A [`Binding`] is the tagged variant over everything a slot can hold.
//! Consumers match on it exhaustively; there is no duck typing.

pub mod instance;
pub mod ports;
pub mod runsettings;

use std::fmt;

use serde::Serialize;

use crate::dataset::DatasetRef;
use crate::parameter::{ParameterRef, TemplateAssignment};
use crate::pipeline::NodeId;
use crate::types::ParamValue;

pub use instance::ComponentInstance;
pub use ports::{InputPort, OutputPort, OutputRegistration};
pub use runsettings::RunSettings;

/// An output port of a node, addressed by its declared name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: String,
}

impl OutputRef {
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

/// A value bound to an input port, parameter slot or pipeline argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(ParamValue),
    Parameter(ParameterRef),
    Template(TemplateAssignment),
    Output(OutputRef),
    Dataset(DatasetRef),
    /// A path on the submitting machine.
    LocalPath(String),
    /// A whole node; unwrapped to its only output when bound.
    Node(NodeId),
}

impl Binding {
    pub fn local_path(path: impl Into<String>) -> Self {
        Self::LocalPath(path.into())
    }

    /// Every parameter reference the binding mentions, nested templates
    /// included.
    pub fn parameter_refs(&self) -> Vec<ParameterRef> {
        match self {
            Self::Parameter(p) => vec![p.clone()],
            Self::Template(t) => t.parameter_refs(),
            _ => Vec::new(),
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterRef> {
        match self {
            Self::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "literal",
            Self::Parameter(_) => "parameter",
            Self::Template(_) => "template",
            Self::Output(_) => "output",
            Self::Dataset(_) => "dataset",
            Self::LocalPath(_) => "local path",
            Self::Node(_) => "node",
        }
    }
}

impl From<ParamValue> for Binding {
    fn from(v: ParamValue) -> Self {
        Self::Literal(v)
    }
}

impl From<&str> for Binding {
    fn from(v: &str) -> Self {
        Self::Literal(v.into())
    }
}

impl From<String> for Binding {
    fn from(v: String) -> Self {
        Self::Literal(v.into())
    }
}

impl From<bool> for Binding {
    fn from(v: bool) -> Self {
        Self::Literal(v.into())
    }
}

impl From<i64> for Binding {
    fn from(v: i64) -> Self {
        Self::Literal(v.into())
    }
}

impl From<i32> for Binding {
    fn from(v: i32) -> Self {
        Self::Literal(v.into())
    }
}

impl From<f64> for Binding {
    fn from(v: f64) -> Self {
        Self::Literal(v.into())
    }
}

impl From<ParameterRef> for Binding {
    fn from(p: ParameterRef) -> Self {
        Self::Parameter(p)
    }
}

impl From<&ParameterRef> for Binding {
    fn from(p: &ParameterRef) -> Self {
        Self::Parameter(p.clone())
    }
}

impl From<TemplateAssignment> for Binding {
    fn from(t: TemplateAssignment) -> Self {
        Self::Template(t)
    }
}

impl From<OutputRef> for Binding {
    fn from(o: OutputRef) -> Self {
        Self::Output(o)
    }
}

impl From<DatasetRef> for Binding {
    fn from(d: DatasetRef) -> Self {
        Self::Dataset(d)
    }
}

impl From<&DatasetRef> for Binding {
    fn from(d: &DatasetRef) -> Self {
        Self::Dataset(d.clone())
    }
}

impl From<NodeId> for Binding {
    fn from(n: NodeId) -> Self {
        Self::Node(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_conversions() {
        assert_eq!(Binding::from("a"), Binding::Literal(ParamValue::Str("a".into())));
        assert_eq!(Binding::from(3), Binding::Literal(ParamValue::Int(3)));
        assert_eq!(Binding::from(NodeId::new(2)), Binding::Node(NodeId::new(2)));
        assert_eq!(Binding::local_path("./data").kind(), "local path");
    }

    #[test]
    fn test_parameter_refs() {
        let p = ParameterRef::standalone("msg", None);
        assert_eq!(Binding::from(&p).parameter_refs(), vec![p.clone()]);
        assert!(Binding::from(1.5).parameter_refs().is_empty());
        assert_eq!(Binding::from(&p).as_parameter(), Some(&p));
    }
}
