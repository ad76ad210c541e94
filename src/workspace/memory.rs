//! In-process capability implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::definition::{load_from_spec, ComponentDefinition, ComponentSelector};
use crate::errors::{ComponentError, Result};
use crate::graph::model::{Graph, ModuleNodeRunSetting, SubPipelinesInfo};
use crate::types::{ComputeTarget, Datastore};

use super::{DefinitionCatalogue, DefinitionKey, SubmissionSink, WorkspaceContext};

// ─── Workspace ──────────────────────────────────────────────────────────────

/// Workspace backed by in-memory tables. Counts compute lookups so cache
/// behaviour can be observed.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    name: String,
    computes: RwLock<Vec<ComputeTarget>>,
    default_datastore: RwLock<Option<Datastore>>,
    compute_lookups: AtomicUsize,
}

impl InMemoryWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_compute(self, compute: ComputeTarget) -> Self {
        self.add_compute(compute);
        self
    }

    pub fn with_default_datastore(self, datastore: Datastore) -> Self {
        self.set_default_datastore(Some(datastore));
        self
    }

    pub fn add_compute(&self, compute: ComputeTarget) {
        let mut computes = self.computes.write();
        computes.retain(|c| c.name != compute.name);
        computes.push(compute);
    }

    pub fn set_default_datastore(&self, datastore: Option<Datastore>) {
        *self.default_datastore.write() = datastore;
    }

    /// Number of `get_compute_by_name` calls served so far.
    pub fn compute_lookups(&self) -> usize {
        self.compute_lookups.load(Ordering::Relaxed)
    }
}

impl WorkspaceContext for InMemoryWorkspace {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_compute_by_name(&self, name: &str) -> Result<Option<ComputeTarget>> {
        self.compute_lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.computes.read().iter().find(|c| c.name == name).cloned())
    }

    fn get_default_datastore(&self) -> Result<Option<Datastore>> {
        Ok(self.default_datastore.read().clone())
    }

    fn list_computes(&self) -> Result<Vec<ComputeTarget>> {
        Ok(self.computes.read().clone())
    }
}

// ─── Catalogue ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CatalogueState {
    by_id: FxHashMap<String, Arc<ComponentDefinition>>,
    /// `namespace://name` or `name` to version ids in registration order.
    by_name: FxHashMap<String, Vec<String>>,
}

/// Definition catalogue held in memory. Every registration gets a fresh
/// version id; a selector without a version picks the latest registration.
#[derive(Debug, Default)]
pub struct InMemoryCatalogue {
    state: RwLock<CatalogueState>,
}

fn name_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}://{}", ns, name),
        None => name.to_string(),
    }
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a definition and return its version id.
    pub fn insert(&self, definition: ComponentDefinition) -> String {
        let id = Uuid::new_v4().to_string();
        let key = name_key(definition.namespace.as_deref(), &definition.name);
        let mut state = self.state.write();
        state.by_id.insert(id.clone(), Arc::new(definition));
        state.by_name.entry(key).or_default().push(id.clone());
        id
    }

    /// Register a JSON spec and return its version id with the definition.
    pub fn register_with_id(&self, spec_source: &str) -> Result<(String, Arc<ComponentDefinition>)> {
        let definition = load_from_spec(spec_source)?;
        let id = self.insert(definition);
        let stored = self.load(&DefinitionKey::Id(id.clone()))?;
        tracing::debug!(id = %id, name = %stored.name, "registered component definition");
        Ok((id, stored))
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_id(&self, id: &str) -> Option<Arc<ComponentDefinition>> {
        self.state.read().by_id.get(id).cloned()
    }

    fn find_selector(&self, selector: &ComponentSelector) -> Option<Arc<ComponentDefinition>> {
        let state = self.state.read();
        let ids = state
            .by_name
            .get(&name_key(selector.namespace.as_deref(), &selector.name))?;
        let mut candidates = ids.iter().rev().filter_map(|id| state.by_id.get(id));
        match &selector.version {
            Some(version) => candidates
                .find(|d| d.version.as_deref() == Some(version.as_str()))
                .cloned(),
            None => candidates.next().cloned(),
        }
    }
}

impl DefinitionCatalogue for InMemoryCatalogue {
    fn load(&self, key: &DefinitionKey) -> Result<Arc<ComponentDefinition>> {
        match key {
            DefinitionKey::Id(id) => self
                .find_id(id)
                .ok_or_else(|| ComponentError::registry(vec![id.clone()], Vec::new())),
            DefinitionKey::Selector(selector) => self
                .find_selector(selector)
                .ok_or_else(|| ComponentError::registry(Vec::new(), vec![selector.key()])),
        }
    }

    fn load_batch(
        &self,
        ids: &[String],
        selectors: &[ComponentSelector],
    ) -> Result<Vec<Arc<ComponentDefinition>>> {
        let mut loaded = Vec::with_capacity(ids.len() + selectors.len());
        let mut failed_ids = Vec::new();
        let mut failed_selectors = Vec::new();
        for id in ids {
            match self.find_id(id) {
                Some(d) => loaded.push(d),
                None => failed_ids.push(id.clone()),
            }
        }
        for selector in selectors {
            match self.find_selector(selector) {
                Some(d) => loaded.push(d),
                None => failed_selectors.push(selector.key()),
            }
        }
        if failed_ids.is_empty() && failed_selectors.is_empty() {
            Ok(loaded)
        } else {
            Err(ComponentError::registry(failed_ids, failed_selectors))
        }
    }

    fn register(&self, spec_source: &str) -> Result<Arc<ComponentDefinition>> {
        self.register_with_id(spec_source).map(|(_, d)| d)
    }
}

// ─── Submission sink ────────────────────────────────────────────────────────

/// One hand-off recorded by [`InMemorySink`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub draft: bool,
    pub graph: Graph,
    pub module_node_run_settings: Vec<ModuleNodeRunSetting>,
    pub sub_pipelines_info: SubPipelinesInfo,
}

/// Sink that keeps every submission in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    submissions: Mutex<Vec<Submission>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    fn record(
        &self,
        draft: bool,
        graph: &Graph,
        module_node_run_settings: &[ModuleNodeRunSetting],
        sub_pipelines_info: &SubPipelinesInfo,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.submissions.lock().push(Submission {
            id: id.clone(),
            draft,
            graph: graph.clone(),
            module_node_run_settings: module_node_run_settings.to_vec(),
            sub_pipelines_info: sub_pipelines_info.clone(),
        });
        id
    }
}

impl SubmissionSink for InMemorySink {
    fn submit(
        &self,
        graph: &Graph,
        module_node_run_settings: &[ModuleNodeRunSetting],
        sub_pipelines_info: &SubPipelinesInfo,
    ) -> Result<String> {
        Ok(self.record(false, graph, module_node_run_settings, sub_pipelines_info))
    }

    fn draft(
        &self,
        graph: &Graph,
        module_node_run_settings: &[ModuleNodeRunSetting],
        sub_pipelines_info: &SubPipelinesInfo,
    ) -> Result<String> {
        Ok(self.record(true, graph, module_node_run_settings, sub_pipelines_info))
    }
}
