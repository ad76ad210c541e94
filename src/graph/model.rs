//! Wire-level records produced by lowering.
//!
//! Field names are the stable snake_case keys of the JSON export.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::Result;

// ─── Shared settings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeSetting {
    pub name: String,
    pub compute_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreSetting {
    pub data_store_name: String,
}

// ─── Datasets ───────────────────────────────────────────────────────────────

/// Path on a datastore, or a bare local path when `data_store_name` is
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataPath {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_name: Option<String>,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredDataSetReference {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedDataSetReference {
    pub id: String,
}

/// Inline value of a dataset: exactly one of the fields is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DataSetDefinitionValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literal_value: Option<DataPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_set_reference: Option<RegisteredDataSetReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_data_set_reference: Option<SavedDataSetReference>,
}

impl DataSetDefinitionValue {
    pub fn literal(data_store_name: Option<String>, relative_path: impl Into<String>) -> Self {
        Self {
            literal_value: Some(DataPath {
                data_store_name,
                relative_path: relative_path.into(),
            }),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.literal_value.is_none()
            && self.data_set_reference.is_none()
            && self.saved_data_set_reference.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSetDefinition {
    pub data_type_short_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DataSetDefinitionValue>,
}

impl DataSetDefinition {
    /// Whether the definition carries an inline value or names a datapath
    /// parameter.
    pub fn is_materialized(&self) -> bool {
        self.parameter_name.is_some() || self.value.as_ref().map_or(false, |v| !v.is_empty())
    }
}

// ─── Nodes and edges ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDatasetNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_set_definition: Option<DataSetDefinition>,
}

/// How a parameter assignment gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParameterValueType {
    Literal,
    GraphParameterName,
    Concatenate,
}

/// Value of one scalar slot: a literal, a reference to the graph
/// interface, or a concatenation of both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterAssignment {
    /// Slot name; absent on concatenation parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: String,
    pub value_type: ParameterValueType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignments_to_concatenate: Vec<ParameterAssignment>,
}

impl ParameterAssignment {
    pub fn literal(name: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            value: value.into(),
            value_type: ParameterValueType::Literal,
            assignments_to_concatenate: Vec::new(),
        }
    }

    pub fn graph_parameter(name: Option<&str>, parameter: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            value: parameter.into(),
            value_type: ParameterValueType::GraphParameterName,
            assignments_to_concatenate: Vec::new(),
        }
    }

    /// The value shows parameters as `@@name@@` placeholders.
    pub fn concatenate(name: Option<&str>, parts: Vec<ParameterAssignment>) -> Self {
        let value = parts
            .iter()
            .map(|p| match p.value_type {
                ParameterValueType::GraphParameterName => format!("@@{}@@", p.value),
                _ => p.value.clone(),
            })
            .collect();
        Self {
            name: name.map(str::to_string),
            value,
            value_type: ParameterValueType::Concatenate,
            assignments_to_concatenate: parts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSetting {
    pub name: String,
    pub data_store_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_on_compute: Option<String>,
    /// Set when the input is fed by a datapath parameter of the graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path_parameter_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRegistration {
    pub name: String,
    pub create_new_version: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetOutputOptions {
    pub path_on_datastore: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSetting {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_name: Option<String>,
    pub data_store_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_on_compute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_registration: Option<DatasetRegistration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_output_options: Option<DatasetOutputOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphModuleNode {
    pub id: String,
    /// Identifier of the component definition.
    pub module_id: String,
    pub name: String,
    pub regenerate_output: bool,
    pub use_graph_default_compute: bool,
    pub use_graph_default_datastore: bool,
    pub module_parameters: Vec<ParameterAssignment>,
    pub module_input_settings: Vec<InputSetting>,
    pub module_output_settings: Vec<OutputSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub node_id: String,
    pub port_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source_output_port: PortInfo,
    pub destination_input_port: PortInfo,
}

// ─── Interface ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceParameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_optional: bool,
    /// Wire type code: `"0"` int, `"1"` float, `"2"` bool, `"3"` string.
    #[serde(rename = "type")]
    pub param_type: String,
    /// Declared but fed nowhere in the tree.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataPathParameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DataSetDefinitionValue>,
    pub is_optional: bool,
    pub data_type_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EntityInterface {
    pub parameters: Vec<InterfaceParameter>,
    pub data_path_parameter_list: Vec<DataPathParameter>,
}

impl EntityInterface {
    pub fn parameter(&self, name: &str) -> Option<&InterfaceParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn data_path_parameter(&self, name: &str) -> Option<&DataPathParameter> {
        self.data_path_parameter_list.iter().find(|p| p.name == name)
    }
}

// ─── Graph ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Graph {
    pub module_nodes: Vec<GraphModuleNode>,
    pub dataset_nodes: Vec<GraphDatasetNode>,
    pub edges: Vec<GraphEdge>,
    pub entity_interface: EntityInterface,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_compute: Option<ComputeSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_datastore: Option<DatastoreSetting>,
}

impl Graph {
    pub fn module_node(&self, id: &str) -> Option<&GraphModuleNode> {
        self.module_nodes.iter().find(|n| n.id == id)
    }

    pub fn dataset_node(&self, id: &str) -> Option<&GraphDatasetNode> {
        self.dataset_nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_into(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        let node_id = node_id.to_string();
        self.edges
            .iter()
            .filter(move |e| e.destination_input_port.node_id == node_id)
    }

    /// Whether `id` names a module or dataset node of this graph.
    pub fn contains_node(&self, id: &str) -> bool {
        self.module_node(id).is_some() || self.dataset_node(id).is_some()
    }
}

// ─── Run settings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSettingParameterAssignment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub value_type: ParameterValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_graph_default_compute: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mlc_compute_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked_parameters: Vec<String>,
}

impl RunSettingParameterAssignment {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_type: ParameterValueType::Literal,
            use_graph_default_compute: None,
            mlc_compute_type: None,
            linked_parameters: Vec::new(),
        }
    }
}

/// Flattened run settings of one module node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleNodeRunSetting {
    pub module_id: String,
    pub node_id: String,
    pub step_type: String,
    pub run_settings: Vec<RunSettingParameterAssignment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compute_run_settings: Vec<RunSettingParameterAssignment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_space: Vec<RunSettingParameterAssignment>,
}

impl ModuleNodeRunSetting {
    pub fn setting(&self, name: &str) -> Option<&RunSettingParameterAssignment> {
        self.run_settings
            .iter()
            .chain(&self.compute_run_settings)
            .chain(&self.search_space)
            .find(|s| s.name == name)
    }
}

// ─── Sub-pipelines ──────────────────────────────────────────────────────────

/// One end of a subgraph port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubGraphConnection {
    /// A port of a module or dataset node.
    Node { node_id: String, port_name: String },
    /// A datapath parameter of the graph interface.
    GraphParameter { name: String },
    /// Nothing is bound.
    Unbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubGraphPort {
    pub name: String,
    pub external: Vec<SubGraphConnection>,
    pub internal: Vec<SubGraphConnection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataPathAssignment {
    pub name: String,
    pub source: SubGraphConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubGraphInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_graph_id: Option<String>,
    pub pipeline_definition_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_compute_target: Option<ComputeSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_data_store: Option<DatastoreSetting>,
    /// Module nodes of the subtree that rely on this pipeline's default
    /// compute.
    pub default_compute_node_ids: Vec<String>,
    /// Module nodes of the subtree that write at least one output to this
    /// pipeline's default datastore.
    pub default_datastore_node_ids: Vec<String>,
    pub parameter_assignments: Vec<ParameterAssignment>,
    pub data_path_assignments: Vec<DataPathAssignment>,
    pub inputs: Vec<SubGraphPort>,
    pub outputs: Vec<SubGraphPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubPipelineDefinition {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_compute_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_data_store: Option<String>,
    pub parameter_list: Vec<InterfaceParameter>,
    pub data_path_parameter_list: Vec<DataPathParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SubPipelinesInfo {
    pub sub_graph_info: Vec<SubGraphInfo>,
    pub node_id_to_sub_graph_id_mapping: BTreeMap<String, String>,
    pub sub_pipeline_definition: Vec<SubPipelineDefinition>,
}

impl SubPipelinesInfo {
    pub fn sub_graph(&self, id: &str) -> Option<&SubGraphInfo> {
        self.sub_graph_info.iter().find(|s| s.id == id)
    }
}

// ─── Artifacts ──────────────────────────────────────────────────────────────

/// Everything lowering produces for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphArtifacts {
    pub graph: Graph,
    pub module_node_run_settings: Vec<ModuleNodeRunSetting>,
    pub sub_pipelines_info: SubPipelinesInfo,
    /// Instance id of every component node to its graph node id.
    pub module_node_to_graph_node_mapping: BTreeMap<String, String>,
}

impl GraphArtifacts {
    /// Pretty JSON export.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn run_setting(&self, node_id: &str) -> Option<&ModuleNodeRunSetting> {
        self.module_node_run_settings.iter().find(|r| r.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenate_value() {
        let c = ParameterAssignment::concatenate(
            Some("text"),
            vec![
                ParameterAssignment::literal(None, "greeting: "),
                ParameterAssignment::graph_parameter(None, "msg"),
            ],
        );
        assert_eq!(c.value, "greeting: @@msg@@");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["value_type"], "Concatenate");
        assert_eq!(json["assignments_to_concatenate"][1]["value_type"], "GraphParameterName");
        assert!(json["assignments_to_concatenate"][0].get("name").is_none());
    }

    #[test]
    fn test_interface_parameter_keys() {
        let p = InterfaceParameter {
            name: "msg".into(),
            default_value: Some("hi".into()),
            is_optional: true,
            param_type: "3".into(),
            unused: false,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "3");
        assert!(json.get("unused").is_none());
    }

    #[test]
    fn test_dataset_definition_materialized() {
        let empty = DataSetDefinition {
            data_type_short_name: "AnyDirectory".into(),
            parameter_name: None,
            value: Some(DataSetDefinitionValue::default()),
        };
        assert!(!empty.is_materialized());
        let literal = DataSetDefinition {
            value: Some(DataSetDefinitionValue::literal(None, "./data")),
            ..empty.clone()
        };
        assert!(literal.is_materialized());
    }

    #[test]
    fn test_connection_tagging() {
        let json = serde_json::to_value(SubGraphConnection::GraphParameter { name: "d".into() }).unwrap();
        assert_eq!(json["kind"], "graph_parameter");
        assert_eq!(json["name"], "d");
    }
}
