//! Benchmarks for ml_component

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ml_component::parameter::TemplateBinding;
use ml_component::*;

fn stage() -> Arc<ComponentDefinition> {
    Arc::new(
        ComponentDefinition::builder("stage", ComponentType::Command)
            .version("1")
            .input(InputDefinition::new("x", "AnyDirectory").optional())
            .output(OutputDefinition::new("out", "AnyDirectory"))
            .parameter(ParameterDefinition::new("tag", ParamType::Str).with_default(""))
            .build()
            .unwrap(),
    )
}

/// A pipeline of `width` stages, each fed by the previous one and tagged
/// with a template over the pipeline parameter.
fn chain(width: usize) -> PipelineFunction {
    let def = stage();
    PipelineFunction::new("chain", move |composer, args| {
        let run = args.param("run")?;
        let mut previous: Option<OutputRef> = None;
        for i in 0..width {
            let mut builder = composer
                .component(&def)
                .arg("tag", format!("{run}-stage-{i}"));
            if let Some(out) = previous.take() {
                builder = builder.arg("x", out);
            }
            let node = builder.create()?;
            previous = Some(composer.output(node, "out")?);
        }
        Ok(PipelineOutputs::new())
    })
    .param(PipelineParam::new("run").with_default("bench"))
}

/// `depth` levels of pipelines, each holding a small chain and the next level.
fn nested(depth: usize) -> PipelineFunction {
    let mut current = chain(4);
    for _ in 0..depth {
        let inner = current;
        let leaf = chain(4);
        current = PipelineFunction::new("level", move |composer, _| {
            composer.pipeline(&leaf).create()?;
            composer.pipeline(&inner).create()?;
            Ok(PipelineOutputs::new())
        });
    }
    current
}

fn composed(function: &PipelineFunction) -> (Composer, NodeId) {
    let mut composer = Composer::new(ComposeConfig::default().with_node_id_seed(1)).unwrap();
    let root = composer.pipeline(function).create().unwrap();
    (composer, root)
}

fn benchmark_templates(c: &mut Criterion) {
    let bindings = vec![
        ("run".to_string(), TemplateBinding::Value(ParamValue::from("r1"))),
        ("epoch".to_string(), TemplateBinding::Value(ParamValue::Int(3))),
    ];
    let text = "out/@@run@@/epoch-@@epoch@@/@@missing@@/model.bin";

    c.bench_function("template_resolve", |b| {
        b.iter(|| TemplateAssignment::resolve(black_box(text), black_box(&bindings)))
    });
}

fn benchmark_composition(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose_chain");
    for width in [10, 100, 500].iter() {
        let function = chain(*width);
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &function, |b, function| {
            b.iter(|| composed(black_box(function)))
        });
    }
    group.finish();
}

fn benchmark_lowering(c: &mut Criterion) {
    let mut group = c.benchmark_group("lower_chain");
    for width in [10, 100, 500].iter() {
        let (composer, root) = composed(&chain(*width));
        group.throughput(Throughput::Elements(*width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &root, |b, root| {
            b.iter(|| composer.lower(black_box(*root), LoweringOptions::new()).unwrap())
        });
    }
    group.finish();

    let mut group = c.benchmark_group("lower_nested");
    for depth in [1, 5, 20].iter() {
        let (composer, root) = composed(&nested(*depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &root, |b, root| {
            b.iter(|| composer.lower(black_box(*root), LoweringOptions::new()).unwrap())
        });
    }
    group.finish();
}

fn benchmark_validation(c: &mut Criterion) {
    let (composer, root) = composed(&chain(200));
    let options = ValidateOptions::new();

    c.bench_function("validate_chain_200", |b| {
        b.iter(|| composer.validate(black_box(root), &options).unwrap())
    });
}

fn benchmark_export(c: &mut Criterion) {
    let (composer, root) = composed(&nested(5));
    let artifacts = composer.lower(root, LoweringOptions::new()).unwrap();

    c.bench_function("export_json", |b| b.iter(|| black_box(&artifacts).to_json().unwrap()));
}

criterion_group!(
    benches,
    benchmark_templates,
    benchmark_composition,
    benchmark_lowering,
    benchmark_validation,
    benchmark_export,
);

criterion_main!(benches);
