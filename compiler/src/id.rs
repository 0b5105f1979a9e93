// Stable function identifiers
//
// Every function declaration in the translation unit gets a `FuncId`,
// allocated in source order during indexing. Task identity, registry keys
// and graph nodes are all `FuncId`s, so equality never depends on spans or
// on the call site that named the function.

use std::fmt;

/// Stable identifier for a function declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation (source) order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_func: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_func(&mut self) -> FuncId {
        let id = FuncId(self.next_func);
        self.next_func += 1;
        id
    }
}
