// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;
use std::fmt;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded, handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Index,
    Discover,
    Classify,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Index,    // ProgramIndex
    Root,     // FuncId of the root task
    Graph,    // TaskGraph
    Registry, // TaskRegistry
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", descriptor(*self).name)
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions, documentation only.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Index => PassDescriptor {
            name: "index",
            inputs: &[],
            outputs: &[ArtifactId::Index],
            invalidation_key: "source + defines",
            invariants: "every declaration has a FuncId in source order",
        },
        PassId::Discover => PassDescriptor {
            name: "discover",
            inputs: &[PassId::Index],
            outputs: &[ArtifactId::Root, ArtifactId::Graph],
            invalidation_key: "index + top",
            invariants: "root resolved to a definition, tasks in BFS order",
        },
        PassId::Classify => PassDescriptor {
            name: "classify",
            inputs: &[PassId::Discover],
            outputs: &[ArtifactId::Registry],
            invalidation_key: "index + graph + target + strict_widths",
            invariants: "one registry record per discovered task",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 3] = [PassId::Index, PassId::Discover, PassId::Classify];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_discover_skips_classify() {
        let passes = required_passes(PassId::Discover);
        assert_eq!(passes, vec![PassId::Index, PassId::Discover]);
        assert!(!passes.contains(&PassId::Classify));
    }

    #[test]
    fn required_passes_classify_includes_all() {
        assert_eq!(required_passes(PassId::Classify), ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_index_is_minimal() {
        assert_eq!(required_passes(PassId::Index), vec![PassId::Index]);
    }

    #[test]
    fn no_parse_in_pass_id() {
        // Parse is handled outside the runner; PassId has no Parse variant.
        for pass in &ALL_PASSES {
            assert_ne!(descriptor(*pass).name, "parse");
        }
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            for dep in desc.inputs {
                let dep_passes = required_passes(*pass);
                let dep_pos = dep_passes.iter().position(|p| p == dep);
                let self_pos = dep_passes.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    #[test]
    fn display_uses_descriptor_name() {
        assert_eq!(PassId::Classify.to_string(), "classify");
    }
}
