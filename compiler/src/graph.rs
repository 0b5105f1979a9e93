// graph.rs — Task hierarchy discovery
//
// Builds the invocation graph between task functions: the direct children of
// a task, the breadth-first set of tasks reachable from a root, and the
// edge list (with instance counts) consumed by emission.
//
// Preconditions: `index` was built from the translation unit holding `root`.
// Postconditions: every returned `FuncId` names a declaration with a body;
//                 traversal order is BFS from the root, root first.
// Failure modes: none. Invocations of undefined functions are dropped.
// Side effects: none.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::consteval::{EvalResult, Evaluator};
use crate::id::FuncId;
use crate::recognize::{self, Invocation};
use crate::resolve::ProgramIndex;

// ── Children ────────────────────────────────────────────────────────────────

/// Invocations in `task`'s marker paired with the defining declaration of
/// each callee, in source order. Callees with no definition are skipped.
pub fn child_invocations<'a>(
    index: &ProgramIndex<'a>,
    task: FuncId,
) -> Vec<(FuncId, Invocation<'a>)> {
    let decl = index.func(task).decl;
    let Some(marker) = recognize::task_marker(decl.body.as_ref()) else {
        return Vec::new();
    };
    recognize::invocations(marker)
        .into_iter()
        .filter_map(|inv| {
            let child = index.definition_of(inv.callee, Some(inv.args.len()))?;
            Some((child, inv))
        })
        .collect()
}

/// De-aliased identities of every task `task` instantiates, in source order.
///
/// Duplicates are kept: two invocations of the same child give two entries.
pub fn direct_children(index: &ProgramIndex<'_>, task: FuncId) -> Vec<FuncId> {
    child_invocations(index, task)
        .into_iter()
        .map(|(child, _)| child)
        .collect()
}

// ── Traversal ───────────────────────────────────────────────────────────────

/// All tasks reachable from `root`, breadth-first, root first.
///
/// Each identity appears once, at its first discovery. Cycles terminate.
pub fn all_reachable(index: &ProgramIndex<'_>, root: FuncId) -> Vec<FuncId> {
    let mut order = vec![root];
    let mut visited = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(task) = queue.pop_front() {
        for child in direct_children(index, task) {
            if visited.insert(child) {
                order.push(child);
                queue.push_back(child);
            }
        }
    }
    order
}

/// Tasks reachable from `root` that can reach themselves again.
pub fn recursive_tasks(index: &ProgramIndex<'_>, root: FuncId) -> Vec<FuncId> {
    all_reachable(index, root)
        .into_iter()
        .filter(|&task| {
            direct_children(index, task)
                .into_iter()
                .any(|child| all_reachable(index, child).contains(&task))
        })
        .collect()
}

/// Number of instances one invocation creates: the folded `invoke<mode, N>`
/// count, or 1.
pub fn repeat_count(eval: &Evaluator<'_, '_>, inv: &Invocation<'_>) -> EvalResult<u64> {
    match &inv.count {
        Some(expr) => Ok(eval.eval(expr)?.max(0) as u64),
        None => Ok(1),
    }
}

// ── Task graph ──────────────────────────────────────────────────────────────

/// One parent → child edge, merged over all invocations between the pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEdge {
    pub parent: FuncId,
    pub child: FuncId,
    /// Child instances created by the parent.
    pub count: u64,
}

/// The discovered task hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    pub root: FuncId,
    /// Discovery (BFS) order, root first.
    pub order: Vec<FuncId>,
    /// Edges grouped by parent in discovery order, children in first
    /// invocation order.
    pub edges: Vec<TaskEdge>,
}

impl TaskGraph {
    /// Discover the hierarchy under `root`.
    ///
    /// Repeat counts that cannot be folded (for example, because they depend
    /// on the parent's own template parameters) count as one instance.
    pub fn build(eval: &Evaluator<'_, '_>, root: FuncId) -> Self {
        let index = eval.index();
        let order = all_reachable(index, root);
        let mut edges = Vec::new();
        for &parent in &order {
            let mut slot: HashMap<FuncId, usize> = HashMap::new();
            let start = edges.len();
            for (child, inv) in child_invocations(index, parent) {
                let count = repeat_count(eval, &inv).unwrap_or(1);
                match slot.get(&child) {
                    Some(&i) => {
                        let edge: &mut TaskEdge = &mut edges[start + i];
                        edge.count += count;
                    }
                    None => {
                        slot.insert(child, edges.len() - start);
                        edges.push(TaskEdge {
                            parent,
                            child,
                            count,
                        });
                    }
                }
            }
        }
        TaskGraph { root, order, edges }
    }

    pub fn children_of(&self, parent: FuncId) -> impl Iterator<Item = &TaskEdge> {
        self.edges.iter().filter(move |e| e.parent == parent)
    }

    /// Tasks with no outgoing edges.
    pub fn leaves(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|&t| self.children_of(t).next().is_none())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
