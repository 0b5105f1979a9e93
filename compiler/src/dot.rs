// dot.rs — Graphviz DOT output for task hierarchies
//
// Transforms a discovered TaskGraph plus the classifier's registry into DOT
// format suitable for rendering with `dot` or other Graphviz layout engines.
//
// Preconditions: `graph` is a fully constructed TaskGraph; `registry` holds
//                the records produced for it (missing records render as
//                plain nodes).
// Postconditions: returns a valid DOT string, one node per task and one
//                 edge per distinct parent/child pair.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::TaskGraph;
use crate::id::FuncId;
use crate::registry::TaskRegistry;

/// Emit the task hierarchy as a Graphviz DOT string.
pub fn emit_dot(graph: &TaskGraph, registry: &TaskRegistry<'_>) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph tasks {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    writeln!(buf).unwrap();

    for &task in &graph.order {
        let label = task_name(registry, task);
        let mut attrs = vec![format!("label=\"{label}\"")];
        let level = registry
            .get(task)
            .and_then(|r| r.metadata.get("level"))
            .and_then(|v| v.as_str());
        attrs.push(
            match level {
                Some("upper") => "shape=box",
                Some("lower") => "shape=ellipse",
                _ => "shape=plaintext",
            }
            .to_string(),
        );
        if task == graph.root {
            attrs.push("peripheries=2".to_string());
        }
        let recursive = registry
            .get(task)
            .and_then(|r| r.metadata.get("recursive"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if recursive {
            attrs.push("color=red".to_string());
        }
        writeln!(buf, "    {} [{}];", node_id(registry, task), attrs.join(", ")).unwrap();
    }

    if !graph.edges.is_empty() {
        writeln!(buf).unwrap();
    }
    for edge in &graph.edges {
        let from = node_id(registry, edge.parent);
        let to = node_id(registry, edge.child);
        if edge.count > 1 {
            writeln!(buf, "    {from} -> {to} [label=\"x{}\"];", edge.count).unwrap();
        } else {
            writeln!(buf, "    {from} -> {to};").unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn task_name(registry: &TaskRegistry<'_>, task: FuncId) -> String {
    registry
        .get(task)
        .map_or_else(|| task.to_string(), |r| r.name.clone())
}

/// DOT node ID: the sanitized task name, suffixed with the identity so that
/// overloads never collide.
fn node_id(registry: &TaskRegistry<'_>, task: FuncId) -> String {
    format!("{}_{}", sanitize(&task_name(registry, task)), task.0)
}

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
