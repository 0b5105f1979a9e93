// registry.rs — Per-task rewriting state and metadata
//
// One `TaskRecord` per task identity, created lazily the first time either
// half is requested. Both the rewriter and the metadata object live in the
// same record, so they can never disagree about which tasks exist.
//
// Preconditions: every `FuncId` passed in was allocated by the index the
//                registry was created from.
// Postconditions: repeated requests for the same id return the same state.
// Failure modes: an id unknown to the translation unit panics (internal
//                consistency violation).
// Side effects: none.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::ast::Span;
use crate::id::FuncId;
use crate::resolve::ProgramIndex;
use crate::rewrite::Rewriter;

// ── Data types ──────────────────────────────────────────────────────────────

/// Schema-less metadata object attached to a task.
pub type Metadata = Map<String, Value>;

/// Rewriting state and metadata for one task function.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Short name, as used for metadata keys.
    pub name: String,
    pub rewriter: Rewriter,
    pub metadata: Metadata,
}

/// Where a function's text lives in the source.
#[derive(Debug, Clone)]
struct FuncSlot {
    name: String,
    span: Span,
}

/// Registry of task records for one compilation.
#[derive(Debug)]
pub struct TaskRegistry<'s> {
    source: &'s str,
    funcs: Vec<FuncSlot>,
    records: BTreeMap<FuncId, TaskRecord>,
}

impl<'s> TaskRegistry<'s> {
    /// An empty registry over the functions of `index`, whose text is `source`.
    pub fn new(source: &'s str, index: &ProgramIndex<'_>) -> Self {
        let funcs = index
            .funcs()
            .map(|f| FuncSlot {
                name: f.short_name().to_string(),
                span: f.decl.span,
            })
            .collect();
        TaskRegistry {
            source,
            funcs,
            records: BTreeMap::new(),
        }
    }

    /// The rewriter for `task`, created over the function's text on first use.
    pub fn rewriter(&mut self, task: FuncId) -> &mut Rewriter {
        &mut self.record(task).rewriter
    }

    /// The metadata for `task`, created as `{}` on first use.
    pub fn metadata(&mut self, task: FuncId) -> &mut Metadata {
        &mut self.record(task).metadata
    }

    /// Ensure `task` has a record without touching either half.
    pub fn ensure(&mut self, task: FuncId) {
        self.record(task);
    }

    pub fn get(&self, task: FuncId) -> Option<&TaskRecord> {
        self.records.get(&task)
    }

    pub fn contains(&self, task: FuncId) -> bool {
        self.records.contains_key(&task)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in `FuncId` (source) order.
    pub fn iter(&self) -> impl Iterator<Item = (FuncId, &TaskRecord)> {
        self.records.iter().map(|(&id, rec)| (id, rec))
    }

    /// Hand the completed records to the emitter.
    pub fn into_records(self) -> BTreeMap<FuncId, TaskRecord> {
        self.records
    }

    fn record(&mut self, task: FuncId) -> &mut TaskRecord {
        let source = self.source;
        let slot = self
            .funcs
            .get(task.0 as usize)
            .unwrap_or_else(|| panic!("internal: {task} is not a function of this unit"));
        self.records.entry(task).or_insert_with(|| {
            let text = source.get(slot.span.start..slot.span.end).unwrap_or_else(|| {
                panic!("internal: span of {} lies outside the source", slot.name)
            });
            TaskRecord {
                name: slot.name.clone(),
                rewriter: Rewriter::new(slot.span.start, text),
                metadata: Metadata::new(),
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    const SRC: &str = "void Leaf(int x) {}\nvoid Top(int x) { tapa::task().invoke(Leaf, x); }\n";

    #[test]
    fn records_are_created_lazily() {
        let unit = parse(SRC).unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let mut reg = TaskRegistry::new(SRC, &index);
        assert!(reg.is_empty());
        reg.metadata(FuncId(1));
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(FuncId(1)));
        assert!(!reg.contains(FuncId(0)));
        assert_eq!(reg.get(FuncId(1)).map(|r| r.name.as_str()), Some("Top"));
    }

    #[test]
    fn repeated_requests_share_state() {
        let unit = parse(SRC).unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let mut reg = TaskRegistry::new(SRC, &index);
        reg.metadata(FuncId(0)).insert("level".into(), json!("lower"));
        reg.metadata(FuncId(0)).insert("ports".into(), json!([]));
        assert_eq!(reg.metadata(FuncId(0)).len(), 2);

        let start = reg.rewriter(FuncId(0)).base();
        reg.rewriter(FuncId(0))
            .insert_after(start, "// leaf\n")
            .unwrap();
        assert!(!reg.rewriter(FuncId(0)).is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn rewriter_covers_the_function_text() {
        let unit = parse(SRC).unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let mut reg = TaskRegistry::new(SRC, &index);
        assert_eq!(reg.rewriter(FuncId(0)).original(), "void Leaf(int x) {}");
        assert_eq!(reg.rewriter(FuncId(1)).base(), SRC.find("void Top").unwrap());
    }

    #[test]
    fn iteration_is_in_source_order() {
        let unit = parse(SRC).unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let mut reg = TaskRegistry::new(SRC, &index);
        reg.ensure(FuncId(1));
        reg.ensure(FuncId(0));
        let ids: Vec<FuncId> = reg.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![FuncId(0), FuncId(1)]);
        assert_eq!(reg.into_records().len(), 2);
    }

    #[test]
    #[should_panic(expected = "internal:")]
    fn unknown_identity_is_fatal() {
        let unit = parse(SRC).unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let mut reg = TaskRegistry::new(SRC, &index);
        reg.metadata(FuncId(7));
    }
}
