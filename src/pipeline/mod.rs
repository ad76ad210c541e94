//! Pipeline composition.
//!
//! A [`Composer`] owns every node created during composition in an arena
//! and tracks the pipelines currently being built on an explicit builder
//! stack. Pipelines are described by [`PipelineFunction`]s: a signature
//! plus a body closure that creates child nodes through the composer.
//!
//! ```rust,ignore
//! let f = PipelineFunction::new("hello", move |c, args| {
//!     let msg = args.param("msg")?;
//!     c.component(&printer).arg("text", msg).name("printer").create()?;
//!     Ok(PipelineOutputs::new())
//! })
//! .param(PipelineParam::new("msg").with_default("hi"));
//!
//! let mut composer = Composer::default();
//! let root = composer.pipeline(&f).create()?;
//! let artifacts = composer.lower(root, LoweringOptions::default())?;
//! ```
//!
//! ## Submodules
//!
//! - [`function`]: pipeline signatures, arguments and outputs
//! - [`definition`]: the composed pipeline node and its partitioned interface
//! - [`composer`]: arena, builder stack, node access and rebinding
//! - [`builders`]: fluent creation of component and pipeline nodes
//! - [`resolve`]: following bindings through enclosing pipelines
//! - [`replace`]: swapping component definitions in place
//! - [`submit`]: validation, lowering and hand-off to a submission sink

pub mod builders;
pub mod composer;
pub mod definition;
pub mod function;
pub mod replace;
pub mod resolve;
pub mod submit;

use std::fmt;

use serde::Serialize;

use crate::component::ComponentInstance;

pub use builders::{ComponentBuilder, PipelineBuilder};
pub use composer::Composer;
pub use definition::{ParamKind, PipelineDefinition, PipelineInstance, PipelineParamDefinition};
pub use function::{PipelineArgs, PipelineFunction, PipelineOutputs, PipelineParam};
pub use resolve::{render_parts, ComputeResolution, InputSource, ResolvedPart, ScalarSource};

/// Handle to a node in a [`Composer`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Scope of parameter references that belong to no pipeline.
    pub const DETACHED: NodeId = NodeId(usize::MAX);

    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DETACHED {
            f.write_str("#detached")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// An arena entry.
#[derive(Debug, Clone)]
pub enum Node {
    Module(ComponentInstance),
    Pipeline(PipelineInstance),
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Self::Module(m) => m.parent,
            Self::Pipeline(p) => p.parent,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: NodeId) {
        match self {
            Self::Module(m) => m.parent = Some(parent),
            Self::Pipeline(p) => p.parent = Some(parent),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Module(m) => m.display_name(),
            Self::Pipeline(p) => p.display_name(),
        }
    }

    /// Workspace the node is bound to, if any.
    pub fn workspace(&self) -> Option<&str> {
        match self {
            Self::Module(m) => m.definition.workspace.as_deref(),
            Self::Pipeline(p) => p.workspace.as_deref(),
        }
    }

    pub fn as_module(&self) -> Option<&ComponentInstance> {
        match self {
            Self::Module(m) => Some(m),
            Self::Pipeline(_) => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&PipelineInstance> {
        match self {
            Self::Pipeline(p) => Some(p),
            Self::Module(_) => None,
        }
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self, Self::Pipeline(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(4).to_string(), "#4");
        assert_eq!(NodeId::DETACHED.to_string(), "#detached");
        assert_eq!(NodeId::new(4).index(), 4);
    }
}
