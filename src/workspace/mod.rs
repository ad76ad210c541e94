//! Capabilities consumed from the surrounding system.
//!
//! Composition and lowering never talk to a service directly. Everything
//! that would need one goes through these traits:
//!
//! - [`WorkspaceContext`]: compute and datastore lookups
//! - [`DefinitionCatalogue`]: loading and registering component definitions
//! - [`DatasetRegistry`]: materializing dataset nodes
//! - [`SubmissionSink`]: receiving the lowered artifacts
//!
//! [`CachedWorkspace`] wraps any workspace with the lookup caches, and the
//! [`memory`] module has in-process implementations used by tests and
//! local tooling.

pub mod cache;
pub mod memory;

use std::sync::Arc;

use crate::dataset::{DatasetKind, DatasetRef, DatasetSource};
use crate::definition::{ComponentDefinition, ComponentSelector};
use crate::errors::Result;
use crate::graph::model::{
    DataSetDefinition, DataSetDefinitionValue, Graph, ModuleNodeRunSetting,
    RegisteredDataSetReference, SavedDataSetReference, SubPipelinesInfo,
};
use crate::types::{ComputeTarget, Datastore};

pub use cache::CachedWorkspace;
pub use memory::{InMemoryCatalogue, InMemorySink, InMemoryWorkspace, Submission};

/// Compute and datastore lookups of one workspace.
pub trait WorkspaceContext: Send + Sync {
    fn name(&self) -> &str;

    fn get_compute_by_name(&self, name: &str) -> Result<Option<ComputeTarget>>;

    fn get_default_datastore(&self) -> Result<Option<Datastore>>;

    fn list_computes(&self) -> Result<Vec<ComputeTarget>>;
}

impl<W: WorkspaceContext + ?Sized> WorkspaceContext for Arc<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_compute_by_name(&self, name: &str) -> Result<Option<ComputeTarget>> {
        (**self).get_compute_by_name(name)
    }

    fn get_default_datastore(&self) -> Result<Option<Datastore>> {
        (**self).get_default_datastore()
    }

    fn list_computes(&self) -> Result<Vec<ComputeTarget>> {
        (**self).list_computes()
    }
}

/// How a definition is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionKey {
    /// Catalogue-assigned version id.
    Id(String),
    Selector(ComponentSelector),
}

/// Source of component definitions.
pub trait DefinitionCatalogue: Send + Sync {
    fn load(&self, key: &DefinitionKey) -> Result<Arc<ComponentDefinition>>;

    /// Load many definitions at once: `ids` first, then `selectors`, each
    /// in request order. Fails with `registry_failure` listing every id and
    /// selector that could not be loaded.
    fn load_batch(
        &self,
        ids: &[String],
        selectors: &[ComponentSelector],
    ) -> Result<Vec<Arc<ComponentDefinition>>>;

    /// Register a JSON component spec and return the stored definition.
    fn register(&self, spec_source: &str) -> Result<Arc<ComponentDefinition>>;
}

/// Materializes datasets as graph dataset nodes.
pub trait DatasetRegistry: Send + Sync {
    /// Make sure the dataset has a saved or registered identity in the
    /// workspace.
    fn ensure_saved(&self, dataset: &DatasetRef, workspace: Option<&dyn WorkspaceContext>) -> Result<DatasetRef>;

    fn dataset_definition_of(&self, dataset: &DatasetRef) -> Result<DataSetDefinition>;
}

/// Receives the lowered artifacts.
pub trait SubmissionSink: Send + Sync {
    /// Returns the id of the created run.
    fn submit(
        &self,
        graph: &Graph,
        module_node_run_settings: &[ModuleNodeRunSetting],
        sub_pipelines_info: &SubPipelinesInfo,
    ) -> Result<String>;

    /// Returns the id of the created draft.
    fn draft(
        &self,
        graph: &Graph,
        module_node_run_settings: &[ModuleNodeRunSetting],
        sub_pipelines_info: &SubPipelinesInfo,
    ) -> Result<String>;
}

/// Wire short name for a dataset's data type.
pub fn data_type_short_name(kind: DatasetKind) -> &'static str {
    match kind {
        DatasetKind::File => "AnyDirectory",
        DatasetKind::Tabular => "DataFrameDirectory",
    }
}

/// Registry that treats every dataset as already saved and derives dataset
/// definitions from the dataset source alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDatasetRegistry;

impl DatasetRegistry for DefaultDatasetRegistry {
    fn ensure_saved(&self, dataset: &DatasetRef, _workspace: Option<&dyn WorkspaceContext>) -> Result<DatasetRef> {
        Ok(dataset.clone())
    }

    fn dataset_definition_of(&self, dataset: &DatasetRef) -> Result<DataSetDefinition> {
        let value = match dataset.source() {
            DatasetSource::Registered { id, name, version, .. } => DataSetDefinitionValue {
                data_set_reference: Some(RegisteredDataSetReference {
                    id: id.clone(),
                    name: name.clone(),
                    version: version.clone(),
                }),
                ..DataSetDefinitionValue::default()
            },
            DatasetSource::Saved { saved_id, .. } => DataSetDefinitionValue {
                saved_data_set_reference: Some(SavedDataSetReference { id: saved_id.clone() }),
                ..DataSetDefinitionValue::default()
            },
            DatasetSource::DataReference {
                datastore,
                path_on_datastore,
                ..
            }
            | DatasetSource::Global {
                datastore,
                path_on_datastore,
                ..
            } => DataSetDefinitionValue::literal(Some(datastore.clone()), path_on_datastore.clone()),
        };
        Ok(DataSetDefinition {
            data_type_short_name: data_type_short_name(dataset.kind()).to_string(),
            parameter_name: None,
            value: Some(value),
        })
    }
}

/// Id of a dataset as referenced by graph dataset nodes.
pub fn dataset_id(dataset: &DatasetRef) -> Option<String> {
    match dataset.source() {
        DatasetSource::Registered { id, .. } => Some(id.clone()),
        DatasetSource::Saved { saved_id, .. } => Some(saved_id.clone()),
        DatasetSource::DataReference { .. } | DatasetSource::Global { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_definitions() {
        let registry = DefaultDatasetRegistry;

        let registered = DatasetRef::registered("ds-1", "iris", Some("2"));
        let def = registry.dataset_definition_of(&registered).unwrap();
        assert_eq!(def.data_type_short_name, "AnyDirectory");
        let reference = def.value.unwrap().data_set_reference.unwrap();
        assert_eq!(reference.id, "ds-1");
        assert_eq!(reference.version.as_deref(), Some("2"));

        let data_ref = DatasetRef::data_reference("blob", "raw/2020", "raw");
        let def = registry.dataset_definition_of(&data_ref).unwrap();
        let path = def.value.unwrap().literal_value.unwrap();
        assert_eq!(path.data_store_name.as_deref(), Some("blob"));
        assert_eq!(path.relative_path, "raw/2020");

        let tabular = DatasetRef::tabular("t-1", "table");
        let def = registry.dataset_definition_of(&tabular).unwrap();
        assert_eq!(def.data_type_short_name, "DataFrameDirectory");
    }

    #[test]
    fn test_ensure_saved_keeps_identity() {
        let ds = DatasetRef::saved("s-1", "scratch");
        let saved = DefaultDatasetRegistry.ensure_saved(&ds, None).unwrap();
        assert_eq!(saved, ds);
        assert_eq!(dataset_id(&saved).as_deref(), Some("s-1"));
        assert_eq!(dataset_id(&DatasetRef::global("g", "p", "n")), None);
    }
}
