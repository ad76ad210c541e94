//! Integration tests for ml_component

use std::sync::Arc;

use ml_component::definition::RunSettingParam;
use ml_component::graph::{is_valid_node_id, ParameterValueType};
use ml_component::workspace::{InMemorySink, InMemoryWorkspace};
use ml_component::*;
use pretty_assertions::assert_eq;

fn producer() -> Arc<ComponentDefinition> {
    Arc::new(
        ComponentDefinition::builder("producer", ComponentType::Command)
            .version("1")
            .output(OutputDefinition::new("result", "AnyDirectory"))
            .run_setting(RunSettingParam::compute_target("target", ["AmlCompute"]))
            .build()
            .unwrap(),
    )
}

fn consumer() -> Arc<ComponentDefinition> {
    Arc::new(
        ComponentDefinition::builder("consumer", ComponentType::Command)
            .version("1")
            .input(InputDefinition::new("x", "AnyDirectory"))
            .run_setting(RunSettingParam::compute_target("target", ["AmlCompute"]))
            .build()
            .unwrap(),
    )
}

fn printer() -> Arc<ComponentDefinition> {
    Arc::new(
        ComponentDefinition::builder("printer", ComponentType::Command)
            .parameter(ParameterDefinition::new("text", ParamType::Str))
            .build()
            .unwrap(),
    )
}

fn sweep() -> Arc<ComponentDefinition> {
    Arc::new(
        ComponentDefinition::builder("sweep_train", ComponentType::Sweep)
            .run_setting(
                RunSettingParam::new("sweep.early_termination.policy_type", ParamType::Str)
                    .with_enum(["bandit", "median"])
                    .optional(),
            )
            .run_setting(
                RunSettingParam::new("sweep.early_termination.slack_factor", ParamType::Float)
                    .enabled_by("policy_type", ["bandit"])
                    .optional(),
            )
            .build()
            .unwrap(),
    )
}

fn seeded() -> Composer {
    Composer::new(ComposeConfig::default().with_node_id_seed(7)).unwrap()
}

// ============================================================================
// Seed scenarios
// ============================================================================

#[test]
fn test_single_component() {
    let def = Arc::new(
        ComponentDefinition::builder("choose", ComponentType::Command)
            .parameter(ParameterDefinition::new("p", ParamType::Str).with_enum(["a", "b"]))
            .build()
            .unwrap(),
    );
    let mut composer = seeded();
    let node = composer.component(&def).arg("p", "a").create().unwrap();

    let findings = composer
        .validate(node, &ValidateOptions::new().with_mode(validation::ValidationMode::Local))
        .unwrap();
    assert!(findings.is_empty(), "{findings:?}");

    let artifacts = composer.lower(node, LoweringOptions::new()).unwrap();
    let graph = &artifacts.graph;
    assert_eq!(graph.module_nodes.len(), 1);
    assert!(graph.edges.is_empty());
    assert!(graph.entity_interface.parameters.is_empty());

    let assignments = &graph.module_nodes[0].module_parameters;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].name.as_deref(), Some("p"));
    assert_eq!(assignments[0].value, "a");
    assert_eq!(assignments[0].value_type, ParameterValueType::Literal);
}

#[test]
fn test_two_components_with_edge() {
    let (p, c) = (producer(), consumer());
    let f = PipelineFunction::new("wired", move |composer, _| {
        let first = composer.component(&p).create()?;
        let result = composer.output(first, "result")?;
        composer.component(&c).arg("x", result).create()?;
        Ok(PipelineOutputs::new())
    });
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();
    let graph = &artifacts.graph;

    assert_eq!(graph.module_nodes.len(), 2);
    let (n1, n2) = (&graph.module_nodes[0].id, &graph.module_nodes[1].id);
    assert_ne!(n1, n2);
    assert!(is_valid_node_id(n1) && is_valid_node_id(n2));
    assert_eq!(graph.edges.len(), 1);
    let edge = &graph.edges[0];
    assert_eq!(&edge.source_output_port.node_id, n1);
    assert_eq!(edge.source_output_port.port_name, "result");
    assert_eq!(&edge.destination_input_port.node_id, n2);
    assert_eq!(edge.destination_input_port.port_name, "x");
    assert!(graph.entity_interface.data_path_parameter_list.is_empty());
}

#[test]
fn test_pipeline_parameter_threaded_through() {
    let pr = printer();
    let f = PipelineFunction::new("f", move |composer, args| {
        composer.component(&pr).arg("text", args.param("msg")?).create()?;
        Ok(PipelineOutputs::new())
    })
    .param(PipelineParam::new("msg").with_default("hi"));
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();
    let graph = &artifacts.graph;

    let params = &graph.entity_interface.parameters;
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "msg");
    assert_eq!(params[0].default_value.as_deref(), Some("hi"));
    assert_eq!(params[0].param_type, "3");

    let text = &graph.module_nodes[0].module_parameters[0];
    assert_eq!(text.value_type, ParameterValueType::GraphParameterName);
    assert_eq!(text.value, "msg");
}

#[test]
fn test_template_splicing() {
    let pr = printer();
    let f = PipelineFunction::new("f", move |composer, args| {
        let msg = args.param("msg")?;
        composer.component(&pr).arg("text", format!("greeting: {msg}")).create()?;
        Ok(PipelineOutputs::new())
    })
    .param(PipelineParam::new("msg").with_default("hi"));
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();

    let text = &artifacts.graph.module_nodes[0].module_parameters[0];
    assert_eq!(text.value_type, ParameterValueType::Concatenate);
    let parts = &text.assignments_to_concatenate;
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].value_type, ParameterValueType::Literal);
    assert_eq!(parts[0].value, "greeting: ");
    assert_eq!(parts[1].value_type, ParameterValueType::GraphParameterName);
    assert_eq!(parts[1].value, "msg");
}

#[test]
fn test_conditional_run_setting_not_enabled() {
    let s = sweep();
    let f = PipelineFunction::new("tune", move |composer, _| {
        let node = composer.component(&s).create()?;
        let settings = composer.runsettings_mut(node)?;
        settings.set("policy_type", "median")?;
        settings.set("slack_factor", 0.1)?;
        Ok(PipelineOutputs::new())
    });
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();

    let findings = composer.validate(root, &ValidateOptions::new()).unwrap();
    let not_enabled: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.kind == ErrorCode::NotEnabled)
        .collect();
    assert_eq!(not_enabled.len(), 1);
    assert!(not_enabled[0].message.contains("slack_factor"));
    assert!(not_enabled[0].message.contains("bandit"));

    // The inactive value never reaches the run settings.
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();
    let settings = &artifacts.module_node_run_settings[0];
    assert!(settings.setting("sweep.early_termination.slack_factor").is_none());
    assert_eq!(
        settings
            .setting("sweep.early_termination.policy_type")
            .and_then(|s| s.value.as_deref()),
        Some("median")
    );
}

#[test]
fn test_scope_output_requires_data_lake() {
    let scope = Arc::new(
        ComponentDefinition::builder("scope_job", ComponentType::Scope)
            .output(OutputDefinition::new("out", "CosmosStructureStream"))
            .build()
            .unwrap(),
    );
    let f = PipelineFunction::new("scoped", move |composer, _| {
        composer.component(&scope).create()?;
        Ok(PipelineOutputs::new())
    })
    .with_default_datastore(Datastore::blob("blobstore"));
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();

    let findings = composer.validate(root, &ValidateOptions::new()).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, ErrorCode::InvalidDatastore);
    assert!(findings[0].message.contains("'out'"));
    assert!(findings[0].message.contains("blobstore"));
}

// ============================================================================
// Graph invariants
// ============================================================================

#[test]
fn test_every_instance_maps_to_one_node() {
    let (p, c) = (producer(), consumer());
    let dataset = DatasetRef::registered("ds-1", "iris", Some("1"));
    let inner = PipelineFunction::new("inner", move |composer, _| {
        let first = composer.component(&p).create()?;
        let result = composer.output(first, "result")?;
        composer.component(&c).arg("x", result).create()?;
        composer.component(&c).arg("x", &dataset).create()?;
        composer.component(&c).arg("x", &dataset).create()?;
        Ok(PipelineOutputs::new())
    });
    let outer = PipelineFunction::new("outer", move |composer, _| {
        composer.pipeline(&inner).name("a").create()?;
        composer.pipeline(&inner).name("b").create()?;
        Ok(PipelineOutputs::new())
    });
    let mut composer = seeded();
    let root = composer.pipeline(&outer).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();
    let graph = &artifacts.graph;

    let modules = composer.modules_in(root).unwrap();
    assert_eq!(graph.module_nodes.len(), modules.len());
    for id in modules {
        let instance = composer.module(id).unwrap();
        let graph_id = &artifacts.module_node_to_graph_node_mapping[&instance.instance_id().to_string()];
        assert_eq!(graph.module_nodes.iter().filter(|n| &n.id == graph_id).count(), 1);
    }

    for edge in &graph.edges {
        let source = &edge.source_output_port;
        assert!(graph.contains_node(&edge.destination_input_port.node_id));
        match graph.module_node(&source.node_id) {
            Some(_) => assert_eq!(source.port_name, "result"),
            None => assert!(graph.dataset_node(&source.node_id).is_some()),
        }
    }

    // Same dataset and mode across both sub-pipelines: one node, four edges.
    assert_eq!(graph.dataset_nodes.len(), 1);
    let dataset_id = &graph.dataset_nodes[0].id;
    let from_dataset = graph
        .edges
        .iter()
        .filter(|e| &e.source_output_port.node_id == dataset_id)
        .count();
    assert_eq!(from_dataset, 4);

    let info = &artifacts.sub_pipelines_info;
    assert_eq!(info.sub_graph_info.len(), 3);
    assert_eq!(info.sub_pipeline_definition.len(), 2);
    assert_eq!(info.node_id_to_sub_graph_id_mapping.len(), 8);
}

#[test]
fn test_compute_inheritance() {
    let (p, c) = (producer(), consumer());
    let p_inner = Arc::clone(&p);
    let inner = PipelineFunction::new("inner", move |composer, _| {
        composer.component(&p_inner).name("inherits_inner").create()?;
        Ok(PipelineOutputs::new())
    })
    .with_default_compute("gpu");
    let outer = PipelineFunction::new("outer", move |composer, _| {
        composer.component(&p).name("inherits_root").create()?;
        let explicit = composer.component(&p).name("explicit").create()?;
        composer.runsettings_mut(explicit)?.set("target", "cpu")?;
        let result = composer.output(explicit, "result")?;
        composer.component(&c).name("consumer").arg("x", result).create()?;
        composer.pipeline(&inner).create()?;
        Ok(PipelineOutputs::new())
    });
    let workspace = InMemoryWorkspace::new("ws")
        .with_compute(ComputeTarget::new("cpu", "AmlCompute"))
        .with_compute(ComputeTarget::new("gpu", "AmlCompute"));
    let mut composer = seeded().with_workspace(Arc::new(workspace));
    let root = composer.pipeline(&outer).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();

    let flag = |name: &str| {
        artifacts
            .graph
            .module_nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.use_graph_default_compute)
            .unwrap()
    };
    assert!(flag("inherits_root"));
    assert!(flag("consumer"));
    assert!(!flag("explicit"));
    assert!(!flag("inherits_inner"));

    let findings = composer.validate(root, &ValidateOptions::new()).unwrap();
    assert!(findings.is_empty(), "{findings:?}");
}

#[test]
fn test_unknown_compute_is_reported() {
    let p = producer();
    let f = PipelineFunction::new("f", move |composer, _| {
        let node = composer.component(&p).create()?;
        composer.runsettings_mut(node)?.set("target", "missing")?;
        Ok(PipelineOutputs::new())
    });
    let workspace = InMemoryWorkspace::new("ws").with_compute(ComputeTarget::new("cpu", "AmlCompute"));
    let mut composer = seeded().with_workspace(Arc::new(workspace));
    let root = composer.pipeline(&f).create().unwrap();

    let err = composer.validate(root, &ValidateOptions::new().raising()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidCompute);
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_json_export_uses_wire_names() {
    let pr = printer();
    let f = PipelineFunction::new("f", move |composer, args| {
        composer.component(&pr).arg("text", args.param("msg")?).create()?;
        Ok(PipelineOutputs::new())
    })
    .param(PipelineParam::new("msg").with_default("hi"));
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();

    let value = artifacts.to_value().unwrap();
    assert!(value["graph"]["module_nodes"].is_array());
    assert_eq!(value["graph"]["entity_interface"]["parameters"][0]["type"], "3");
    let json = artifacts.to_json().unwrap();
    assert!(json.contains("module_node_run_settings"));
    assert!(json.contains("sub_pipelines_info"));
}

// ============================================================================
// Composition
// ============================================================================

#[test]
fn test_replace_component_keeps_bindings() {
    let c = consumer();
    let dataset = DatasetRef::registered("ds-1", "iris", None);
    let f = PipelineFunction::new("f", move |composer, _| {
        composer.component(&c).arg("x", &dataset).create()?;
        Ok(PipelineOutputs::new())
    });
    let mut composer = seeded();
    let root = composer.pipeline(&f).create().unwrap();

    let replacement = Arc::new(
        ComponentDefinition::builder("consumer", ComponentType::Command)
            .version("2")
            .input(InputDefinition::new("x", "AnyDirectory"))
            .parameter(ParameterDefinition::new("extra", ParamType::Int).with_default(0))
            .build()
            .unwrap(),
    );
    let replaced = composer
        .replace_component(root, "consumer:1", &replacement, true, false)
        .unwrap();
    assert_eq!(replaced, 1);

    let node = composer.children(root).unwrap()[0];
    let instance = composer.module(node).unwrap();
    assert_eq!(instance.definition().identifier, "consumer:2");
    assert!(instance.input("x").map_or(false, |p| p.is_bound()));

    // An incompatible replacement is rejected without changes.
    let narrower = Arc::new(
        ComponentDefinition::builder("consumer", ComponentType::Command)
            .version("3")
            .build()
            .unwrap(),
    );
    let err = composer
        .replace_component(root, "consumer:2", &narrower, true, false)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IncompatibleInterface);
    assert_eq!(
        composer.module(node).unwrap().definition().identifier,
        "consumer:2"
    );
}

#[test]
fn test_self_recursive_pipeline_is_fatal() {
    fn recurse() -> PipelineFunction {
        PipelineFunction::new("loop", |composer, _| {
            composer.pipeline(&recurse()).create()?;
            Ok(PipelineOutputs::new())
        })
    }
    let mut composer = seeded();
    let err = composer.pipeline(&recurse()).create().unwrap_err();
    assert_eq!(err.code(), ErrorCode::PipelineRecursion);
}

#[test]
fn test_submit_to_sink() {
    let (p, c) = (producer(), consumer());
    let f = PipelineFunction::new("f", move |composer, _| {
        let first = composer.component(&p).create()?;
        let result = composer.output(first, "result")?;
        composer.component(&c).arg("x", result).create()?;
        Ok(PipelineOutputs::new())
    })
    .with_default_compute("cpu");
    let workspace = InMemoryWorkspace::new("ws").with_compute(ComputeTarget::new("cpu", "AmlCompute"));
    let mut composer = seeded().with_workspace(Arc::new(workspace));
    let root = composer.pipeline(&f).create().unwrap();

    let sink = InMemorySink::new();
    let run_id = composer.submit(root, &sink, LoweringOptions::new()).unwrap();
    let recorded = sink.submissions();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].id, run_id);
    assert_eq!(recorded[0].graph.edges.len(), 1);
    assert_eq!(
        recorded[0].graph.default_compute.as_ref().map(|c| c.name.as_str()),
        Some("cpu")
    );
}
