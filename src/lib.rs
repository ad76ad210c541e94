//! # ml_component
//!
//! Composition of reusable ML components into pipelines, and lowering of
//! pipeline trees into the flat graph a pipeline service executes.
//!
//! ## Overview
//!
//! - **Definitions**: component signatures with typed parameters, ports and
//!   a run-setting schema, loadable from JSON specs
//! - **Composition**: a [`Composer`] records component and pipeline
//!   instances as pipeline functions run, with `@@name@@` templates for
//!   parameter concatenation
//! - **Validation**: code-tagged findings for missing inputs, bad values,
//!   compute and datastore problems
//! - **Lowering**: [`GraphBuilder`] flattens the tree into module and
//!   dataset nodes, run settings and a nested-pipeline record, all
//!   exportable as JSON
//! - **Workspace capabilities**: traits for compute lookup, definition
//!   catalogues, dataset registration and submission, with in-memory and
//!   caching implementations

pub mod component;
pub mod config;
pub mod dataset;
pub mod definition;
pub mod errors;
pub mod graph;
pub mod parameter;
pub mod pipeline;
pub mod types;
pub mod validation;
pub mod workspace;

// Re-export commonly used types
pub use component::{Binding, OutputRef};
pub use config::ComposeConfig;
pub use dataset::{DatasetKind, DatasetRef};
pub use definition::{
    ComponentDefinition, ComponentSelector, ComponentType, InputDefinition, OutputDefinition,
    ParameterDefinition,
};
pub use errors::{ComponentError, Result};
pub use parameter::{ParameterRef, TemplateAssignment};
pub use types::{ComputeTarget, Datastore, InputMode, OutputMode, ParamType, ParamValue};

// Re-export main functionality
pub use graph::{GraphArtifacts, GraphBuilder, LoweringOptions};
pub use pipeline::{Composer, NodeId, PipelineFunction, PipelineOutputs, PipelineParam};
pub use validation::{ErrorCode, Finding, ValidateOptions, ValidationEngine, ValidationError};
pub use workspace::{
    CachedWorkspace, DatasetRegistry, DefinitionCatalogue, SubmissionSink, WorkspaceContext,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
