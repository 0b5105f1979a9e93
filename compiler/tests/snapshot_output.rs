// Snapshot tests: lock the DOT view and the per-task metadata schema.
//
// Uses the library API (parse → index → discover → classify) and snapshots
// the emitted text. Snapshots are managed by `insta` and stored under
// `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use std::path::{Path, PathBuf};

use tfc::pass::PassId;
use tfc::pipeline::{self, CompilationState, Options};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// Run every pass and hand the finished state to `f`.
fn with_state<R>(source: &str, top: &str, f: impl FnOnce(&CompilationState<'_, '_>) -> R) -> R {
    let parsed = pipeline::parse_source(source);
    assert!(
        parsed.diagnostics.is_empty(),
        "parse errors: {:?}",
        parsed.diagnostics
    );
    let unit = parsed.unit.unwrap();
    let mut state = CompilationState::new(source, &unit);
    let options = Options {
        top: top.to_string(),
        ..Options::default()
    };
    pipeline::run_pipeline(&mut state, PassId::Classify, &options, |_, _| {}).unwrap();
    f(&state)
}

fn dot_snapshot(source: &str, top: &str) -> String {
    with_state(source, top, |state| {
        tfc::dot::emit_dot(state.graph.as_ref().unwrap(), state.registry.as_ref().unwrap())
    })
}

/// Per-task metadata in discovery order, without the rewritten code.
fn metadata_snapshot(source: &str, top: &str) -> String {
    with_state(source, top, |state| {
        let mut bundle = tfc::emit::bundle(
            top,
            Default::default(),
            &state.provenance,
            state.graph.as_ref().unwrap(),
            state.registry.as_ref().unwrap(),
        );
        let tasks = bundle["tasks"].as_object_mut().unwrap();
        for task in tasks.values_mut() {
            task.as_object_mut().unwrap().remove("code");
        }
        serde_json::to_string_pretty(&bundle["tasks"]).unwrap()
    })
}

fn read_demo(name: &str) -> String {
    let path = project_root().join("demos").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}

#[test]
fn snapshot_dot_hierarchical() {
    let output = dot_snapshot(&read_demo("hierarchical.cpp"), "Top");
    insta::assert_snapshot!("dot_hierarchical", output);
}

#[test]
fn snapshot_metadata_producer_consumer() {
    let source = r#"
void Produce(tapa::ostream<int>& out, int n) {
  for (int i = 0; i < n; ++i) out.write(i);
}
void Consume(tapa::istream<int>& in, tapa::mmap<int> dst, int n) {
  for (int i = 0; i < n; ++i) dst[i] = in.read();
}
void Top(tapa::mmap<int> dst, int n) {
  tapa::stream<int, 4> q("q");
  tapa::task().invoke(Produce, q, n).invoke<tapa::detach>(Consume, q, dst, n);
}
"#;
    let output = metadata_snapshot(source, "Top");
    insta::assert_snapshot!("metadata_producer_consumer", output);
}
