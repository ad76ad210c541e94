//! Lowering composed pipelines to the wire graph.
//!
//! - [`model`]: the wire records and their JSON export
//! - [`node_id`]: 8-hex node id allocation
//! - [`builder`]: [`GraphBuilder`], which flattens a pipeline tree into one
//!   graph of module and dataset nodes
//! - [`subgraph`]: the [`SubPipelinesInfo`] record describing the nested
//!   pipelines that were flattened

/// Enter a tracing span for one lowering stage.
macro_rules! trace_stage {
    ($name:expr) => {
        let _span = tracing::info_span!("lowering_stage", stage = $name).entered();
    };
}

pub mod builder;
pub mod model;
pub mod node_id;
pub mod subgraph;

pub use builder::{GraphBuilder, LoweringOptions};
pub use model::{
    ComputeSetting, DataPath, DataPathAssignment, DataPathParameter, DataSetDefinition,
    DataSetDefinitionValue, DatasetOutputOptions, DatasetRegistration, DatastoreSetting,
    EntityInterface, Graph, GraphArtifacts, GraphDatasetNode, GraphEdge, GraphModuleNode,
    InputSetting, InterfaceParameter, ModuleNodeRunSetting, OutputSetting, ParameterAssignment,
    ParameterValueType, PortInfo, RegisteredDataSetReference, RunSettingParameterAssignment,
    SavedDataSetReference, SubGraphConnection, SubGraphInfo, SubGraphPort, SubPipelineDefinition,
    SubPipelinesInfo,
};
pub use node_id::{is_valid_node_id, NodeIdAllocator, NODE_ID_LEN};

pub const STAGE_ALLOCATE: &str = "allocate";
pub const STAGE_MODULES: &str = "modules";
pub const STAGE_INTERFACE: &str = "interface";
pub const STAGE_SUBGRAPHS: &str = "subgraphs";
pub const STAGE_POSTPROCESS: &str = "postprocess";

/// Port name dataset nodes expose to their consumers.
pub const DATASET_OUTPUT_PORT: &str = "data";

/// Data type of datapath interface entries.
pub const DATAPATH_DATA_TYPE: &str = "DataFrameDirectory";
