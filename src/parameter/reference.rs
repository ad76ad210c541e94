//! Late-bound pipeline parameters.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::dataset::DatasetRef;
use crate::pipeline::NodeId;
use crate::types::{ParamType, ParamValue};

/// Default carried by a [`ParameterRef`]: a scalar, or a dataset for
/// datapath parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParameterDefault {
    Value(ParamValue),
    Dataset(DatasetRef),
}

impl ParameterDefault {
    pub fn as_value(&self) -> Option<&ParamValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetRef> {
        match self {
            Self::Dataset(d) => Some(d),
            Self::Value(_) => None,
        }
    }
}

impl From<ParamValue> for ParameterDefault {
    fn from(v: ParamValue) -> Self {
        Self::Value(v)
    }
}

impl From<DatasetRef> for ParameterDefault {
    fn from(d: DatasetRef) -> Self {
        Self::Dataset(d)
    }
}

static STANDALONE_SLOTS: AtomicUsize = AtomicUsize::new(0);

/// A named value supplied by the enclosing pipeline.
///
/// Equality and hashing use the identity of the declaring pipeline scope and
/// the signature slot, never the name or the default. The string form is
/// the placeholder `@@name@@`, so formatting a reference into a string and
/// passing that string to a component produces a template.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterRef {
    #[serde(skip)]
    scope: NodeId,
    #[serde(skip)]
    slot: usize,
    name: String,
    default: Option<ParameterDefault>,
    declared_type: Option<ParamType>,
}

impl ParameterRef {
    pub(crate) fn new(
        scope: NodeId,
        slot: usize,
        name: impl Into<String>,
        default: Option<ParameterDefault>,
        declared_type: Option<ParamType>,
    ) -> Self {
        Self {
            scope,
            slot,
            name: name.into(),
            default,
            declared_type,
        }
    }

    /// A reference that belongs to no pipeline. Each call yields a distinct
    /// identity.
    pub fn standalone(name: impl Into<String>, default: Option<ParamValue>) -> Self {
        let slot = STANDALONE_SLOTS.fetch_add(1, Ordering::Relaxed);
        Self::new(
            NodeId::DETACHED,
            slot,
            name,
            default.map(ParameterDefault::Value),
            None,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline node whose signature declares this parameter.
    pub fn scope(&self) -> NodeId {
        self.scope
    }

    /// Position in the declaring signature.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn default(&self) -> Option<&ParameterDefault> {
        self.default.as_ref()
    }

    pub fn default_value(&self) -> Option<&ParamValue> {
        self.default.as_ref().and_then(ParameterDefault::as_value)
    }

    pub fn declared_type(&self) -> Option<ParamType> {
        self.declared_type
    }

    /// The `@@name@@` placeholder.
    pub fn placeholder(&self) -> String {
        format!("@@{}@@", self.name)
    }
}

impl PartialEq for ParameterRef {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.slot == other.slot
    }
}

impl Eq for ParameterRef {}

impl Hash for ParameterRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
        self.slot.hash(state);
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@@{}@@", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_display() {
        let p = ParameterRef::standalone("msg", Some("hi".into()));
        assert_eq!(p.to_string(), "@@msg@@");
        assert_eq!(format!("greeting: {p}"), "greeting: @@msg@@");
        assert_eq!(p.default_value(), Some(&ParamValue::from("hi")));
    }

    #[test]
    fn test_identity_equality() {
        let a = ParameterRef::standalone("x", None);
        let b = ParameterRef::standalone("x", None);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let scope = NodeId::new(3);
        let p = ParameterRef::new(scope, 0, "x", None, None);
        let q = ParameterRef::new(scope, 0, "renamed", Some(ParamValue::Int(1).into()), None);
        assert_eq!(p, q);
    }
}
