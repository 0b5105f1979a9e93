// emit.rs — Serialization of the completed task registry
//
// Turns the registry handed over by the classifier into the two textual
// products of a compilation: the JSON bundle (per-task metadata plus the
// rewritten code of each task) and the rewritten translation unit.
//
// Preconditions: the classify pass completed without errors.
// Postconditions: output is byte-identical across runs for the same input.
// Failure modes: none (pure formatting).
// Side effects: none.

use serde_json::{json, Map, Value};

use crate::graph::TaskGraph;
use crate::pipeline::Provenance;
use crate::resolve::ProgramIndex;
use crate::registry::TaskRegistry;
use crate::visitor::Target;

/// Build the JSON bundle for one compilation.
///
/// Tasks appear in discovery order, each holding its metadata object with
/// an extra `code` key carrying the rewritten function text.
pub fn bundle(
    top: &str,
    target: Target,
    provenance: &Provenance,
    graph: &TaskGraph,
    registry: &TaskRegistry<'_>,
) -> Value {
    let mut tasks = Map::new();
    for &id in &graph.order {
        let Some(record) = registry.get(id) else {
            continue;
        };
        let mut entry = record.metadata.clone();
        entry.insert("code".into(), json!(record.rewriter.rewritten_text()));
        tasks.insert(record.name.clone(), Value::Object(entry));
    }
    json!({
        "top": top,
        "target": target.name(),
        "provenance": {
            "source_hash": provenance.source_hash_hex(),
            "compiler_version": provenance.compiler_version,
        },
        "tasks": tasks,
    })
}

/// The discovered hierarchy alone, named through the program index.
pub fn graph(graph: &TaskGraph, index: &ProgramIndex<'_>) -> Value {
    let name = |id| index.func(id).short_name().to_string();
    let edges: Vec<Value> = graph
        .edges
        .iter()
        .map(|e| json!({ "parent": name(e.parent), "child": name(e.child), "count": e.count }))
        .collect();
    json!({
        "root": name(graph.root),
        "tasks": graph.order.iter().map(|&id| name(id)).collect::<Vec<_>>(),
        "edges": edges,
    })
}

/// The translation unit with every task function replaced by its rewritten
/// text. Everything outside task functions is copied unchanged.
pub fn code(source: &str, registry: &TaskRegistry<'_>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (_, record) in registry.iter() {
        let start = record.rewriter.base();
        let end = start + record.rewriter.original().len();
        if start < cursor || end > source.len() {
            continue;
        }
        out.push_str(&source[cursor..start]);
        out.push_str(&record.rewriter.rewritten_text());
        cursor = end;
    }
    out.push_str(&source[cursor..]);
    out
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::pipeline::{compute_provenance, run_pipeline, CompilationState, Options};
    use crate::pass::PassId;

    const SRC: &str = "\
#include <tapa.h>
void Produce(tapa::ostream<int>& out, int n) {
  for (int i = 0; i < n; ++i) out.write(i);
}
void Consume(tapa::istream<int>& in, int n) {
  for (int i = 0; i < n; ++i) in.read();
}
void Top(int n) {
  tapa::stream<int, 4> q(\"q\");
  tapa::task().invoke(Produce, q, n).invoke(Consume, q, n);
}
";

    fn compile(target: Target) -> (Value, String) {
        let unit = parse(SRC).unit.expect("unit");
        let mut state = CompilationState::new(SRC, &unit);
        let options = Options {
            top: "Top".into(),
            target,
            ..Options::default()
        };
        run_pipeline(&mut state, PassId::Classify, &options, |_, _| {}).expect("pipeline");
        let graph = state.graph.as_ref().expect("graph");
        let registry = state.registry.as_ref().expect("registry");
        (
            bundle("Top", target, &state.provenance, graph, registry),
            code(SRC, registry),
        )
    }

    #[test]
    fn bundle_lists_tasks_in_discovery_order() {
        let (bundle, _) = compile(Target::XilinxHls);
        let names: Vec<&String> = bundle["tasks"].as_object().unwrap().keys().collect();
        assert_eq!(names, ["Top", "Produce", "Consume"]);
        assert_eq!(bundle["top"], "Top");
        assert_eq!(bundle["target"], "xilinx-hls");
    }

    #[test]
    fn bundle_carries_provenance() {
        let (bundle, _) = compile(Target::XilinxHls);
        let expected = compute_provenance(SRC);
        assert_eq!(bundle["provenance"]["source_hash"], expected.source_hash_hex());
        assert_eq!(bundle["provenance"]["compiler_version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn every_task_has_code() {
        let (bundle, _) = compile(Target::XilinxHls);
        for (name, task) in bundle["tasks"].as_object().unwrap() {
            let code = task["code"].as_str().unwrap_or_default();
            assert!(code.contains(name.as_str()), "{name} code: {code}");
        }
    }

    #[test]
    fn code_keeps_text_outside_tasks() {
        let (_, code) = compile(Target::XilinxHls);
        assert!(code.starts_with("#include <tapa.h>\n"));
        assert!(code.contains("#pragma HLS interface ap_fifo port=out"));
        assert!(!code.contains("tapa::task()"));
    }

    #[test]
    fn graph_names_tasks_and_edges() {
        let unit = parse(SRC).unit.expect("unit");
        let mut state = CompilationState::new(SRC, &unit);
        let options = Options {
            top: "Top".into(),
            ..Options::default()
        };
        run_pipeline(&mut state, PassId::Discover, &options, |_, _| {}).expect("pipeline");
        let value = graph(
            state.graph.as_ref().expect("graph"),
            state.index.as_ref().expect("index"),
        );
        assert_eq!(value["root"], "Top");
        assert_eq!(value["tasks"], json!(["Top", "Produce", "Consume"]));
        assert_eq!(value["edges"][1], json!({ "parent": "Top", "child": "Consume", "count": 1 }));
    }

    #[test]
    fn generic_target_leaves_code_untouched() {
        let (bundle, code) = compile(Target::Generic);
        assert_eq!(code, SRC);
        assert_eq!(bundle["tasks"]["Top"]["vendor"], "none");
    }
}
