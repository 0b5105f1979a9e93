use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tfc::*;

const VADD: &str = include_str!("../demos/vadd.cpp");
const HIERARCHICAL: &str = include_str!("../demos/hierarchical.cpp");
const BUFFERS: &str = include_str!("../demos/buffers.cpp");

fn scenarios() -> [(&'static str, &'static str, &'static str); 3] {
    [
        ("vadd", VADD, "VecAdd"),
        ("hierarchical", HIERARCHICAL, "Top"),
        ("buffers", BUFFERS, "Top"),
    ]
}

/// A chain of `n_tasks` stream stages under one upper task.
fn generate_chain(n_tasks: usize) -> String {
    let mut src = String::from("#include <tapa.h>\n\n");
    for t in 0..n_tasks {
        src.push_str(&format!(
            "void Stage{t}(tapa::istream<int>& in, tapa::ostream<int>& out, int n) {{\n  for (int i = 0; i < n; ++i) out.write(in.read() + {t});\n}}\n\n"
        ));
    }
    src.push_str("void Top(tapa::istream<int>& src, tapa::ostream<int>& dst, int n) {\n");
    for t in 1..n_tasks {
        src.push_str(&format!("  tapa::stream<int, 4> q{t}(\"q{t}\");\n"));
    }
    src.push_str("  tapa::task()");
    for t in 0..n_tasks {
        let input = if t == 0 { "src".to_string() } else { format!("q{t}") };
        let output = if t + 1 == n_tasks {
            "dst".to_string()
        } else {
            format!("q{}", t + 1)
        };
        src.push_str(&format!("\n      .invoke(Stage{t}, {input}, {output}, n)"));
    }
    src.push_str(";\n}\n");
    src
}

fn options(top: &str) -> pipeline::Options {
    pipeline::Options {
        top: top.to_string(),
        ..pipeline::Options::default()
    }
}

fn compile_full(source: &str, top: &str) {
    let parsed = pipeline::parse_source(source);
    assert!(parsed.diagnostics.is_empty(), "benchmark scenario must parse");
    let unit = parsed.unit.expect("benchmark scenario must parse");
    let mut state = pipeline::CompilationState::new(source, &unit);
    pipeline::run_pipeline(&mut state, pass::PassId::Classify, &options(top), |_, _| {})
        .expect("benchmark scenario must compile");
    let bundle = emit::bundle(
        top,
        visitor::Target::XilinxHls,
        &state.provenance,
        state.graph.as_ref().expect("graph"),
        state.registry.as_ref().expect("registry"),
    );
    black_box(bundle);
}

// KPI: parser latency for representative scenarios.
fn bench_kpi_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_latency");

    for (name, source, _) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let result = parser::parse(black_box(source));
                black_box(&result.unit);
            });
        });
    }

    group.finish();
}

// KPI: full compile latency (parse -> index -> discover -> classify -> emit).
fn bench_kpi_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_compile_latency");

    for (name, source, top) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| compile_full(black_box(source), top));
        });
    }

    group.finish();
}

// KPI: phase-level latency on the vector-add scenario.
fn bench_kpi_phase_latency(c: &mut Criterion) {
    let source = VADD;

    // index (setup: parse)
    {
        let mut group = c.benchmark_group("kpi/phase_latency/index");
        group.bench_function("vadd", |b| {
            b.iter_batched(
                || parser::parse(source).unit.expect("benchmark scenario must parse"),
                |unit| {
                    let index = resolve::ProgramIndex::build(black_box(&unit), &[]);
                    black_box(index.len());
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }

    // discover (setup: parse + index)
    {
        let mut group = c.benchmark_group("kpi/phase_latency/discover");
        let unit = parser::parse(source).unit.expect("benchmark scenario must parse");
        let index = resolve::ProgramIndex::build(&unit, &[]);
        let root = index.lookup("VecAdd")[0];
        group.bench_function("vadd", |b| {
            b.iter(|| {
                let graph = graph::TaskGraph::build(&consteval::Evaluator::new(&index), black_box(root));
                black_box(graph);
            });
        });
        group.finish();
    }
}

// KPI: discovery and classification scaling vs number of tasks.
fn bench_kpi_compile_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/compile_scaling");

    for n_tasks in [1_usize, 5, 10, 20, 40] {
        let source = generate_chain(n_tasks);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}tasks", n_tasks)),
            &source,
            |b, source| {
                b.iter(|| compile_full(black_box(source.as_str()), "Top"));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_parse_latency,
    bench_kpi_full_compile_latency,
    bench_kpi_phase_latency,
    bench_kpi_compile_scaling,
);
criterion_main!(benches);
