// Non-destructive source rewriter
//
// Records insertions, replacements and removals against byte ranges of one
// function's original text, and renders the edited text on demand. The
// original text is never mutated, so spans from the AST stay valid no
// matter how many edits have been queued.
//
// Preconditions: spans passed in are absolute offsets into the source the
//                rewriter was created over.
// Postconditions: `rewritten_text` applies every edit exactly once.
// Failure modes: out-of-range spans and overlapping replacements are
//                rejected with `RewriteError`; no edit is recorded then.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ast::Span;

/// Why an edit was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    #[error("span {start}..{end} is outside the rewritten region {base}..{limit}")]
    OutOfRange {
        start: usize,
        end: usize,
        base: usize,
        limit: usize,
    },
    #[error("span {start}..{end} overlaps an earlier edit")]
    Overlap { start: usize, end: usize },
}

/// Edit buffer over one region of the source.
#[derive(Debug, Clone)]
pub struct Rewriter {
    /// Absolute offset of `original[0]`.
    base: usize,
    original: String,
    /// Texts inserted at an offset, in emission order.
    inserts: BTreeMap<usize, Vec<String>>,
    /// start → (end, replacement), non-overlapping.
    replacements: BTreeMap<usize, (usize, String)>,
}

impl Rewriter {
    /// A rewriter over `original`, which starts at absolute offset `base`.
    pub fn new(base: usize, original: impl Into<String>) -> Self {
        Rewriter {
            base,
            original: original.into(),
            inserts: BTreeMap::new(),
            replacements: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// No edit has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.replacements.is_empty()
    }

    /// Insert `text` before everything already inserted at `offset`.
    pub fn insert_before(&mut self, offset: usize, text: impl Into<String>) -> Result<(), RewriteError> {
        let at = self.check_insert(offset)?;
        self.inserts.entry(at).or_default().insert(0, text.into());
        Ok(())
    }

    /// Insert `text` after everything already inserted at `offset`.
    pub fn insert_after(&mut self, offset: usize, text: impl Into<String>) -> Result<(), RewriteError> {
        let at = self.check_insert(offset)?;
        self.inserts.entry(at).or_default().push(text.into());
        Ok(())
    }

    /// Replace the text covered by `span`.
    pub fn replace(&mut self, span: Span, text: impl Into<String>) -> Result<(), RewriteError> {
        let (start, end) = self.local(span)?;
        let overlaps = self
            .replacements
            .iter()
            .any(|(&s, &(e, _))| s == start || (s < end && start < e))
            || self.inserts.range(start + 1..end).next().is_some();
        if overlaps {
            return Err(RewriteError::Overlap {
                start: span.start,
                end: span.end,
            });
        }
        self.replacements.insert(start, (end, text.into()));
        Ok(())
    }

    pub fn remove(&mut self, span: Span) -> Result<(), RewriteError> {
        self.replace(span, "")
    }

    /// The original text with every edit applied.
    pub fn rewritten_text(&self) -> String {
        let len = self.original.len();
        let mut out = String::with_capacity(len);
        let mut cursor = 0;
        loop {
            if let Some(texts) = self.inserts.get(&cursor) {
                texts.iter().for_each(|t| out.push_str(t));
            }
            if let Some((end, text)) = self.replacements.get(&cursor) {
                out.push_str(text);
                if *end > cursor {
                    cursor = *end;
                    continue;
                }
            }
            if cursor >= len {
                break;
            }
            let stop = self.next_stop(cursor);
            out.push_str(&self.original[cursor..stop]);
            cursor = stop;
        }
        out
    }

    /// The next offset after `cursor` where an edit begins, or the end.
    fn next_stop(&self, cursor: usize) -> usize {
        let insert = self.inserts.range(cursor + 1..).next().map(|(&k, _)| k);
        let replace = self.replacements.range(cursor + 1..).next().map(|(&k, _)| k);
        let stop = [insert, replace]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(self.original.len());
        self.boundary(stop)
    }

    /// Round `offset` up to a char boundary.
    fn boundary(&self, mut offset: usize) -> usize {
        while offset < self.original.len() && !self.original.is_char_boundary(offset) {
            offset += 1;
        }
        offset.min(self.original.len())
    }

    fn limit(&self) -> usize {
        self.base + self.original.len()
    }

    fn check_insert(&self, offset: usize) -> Result<usize, RewriteError> {
        let (at, _) = self.local(Span::from(offset..offset))?;
        let inside = self
            .replacements
            .range(..at)
            .next_back()
            .is_some_and(|(_, &(end, _))| at < end);
        if inside {
            return Err(RewriteError::Overlap {
                start: offset,
                end: offset,
            });
        }
        Ok(at)
    }

    fn local(&self, span: Span) -> Result<(usize, usize), RewriteError> {
        if span.start < self.base || span.end > self.limit() || span.start > span.end {
            return Err(RewriteError::OutOfRange {
                start: span.start,
                end: span.end,
                base: self.base,
                limit: self.limit(),
            });
        }
        Ok((span.start - self.base, span.end - self.base))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span::from(start..end)
    }

    #[test]
    fn untouched_text_round_trips() {
        let rw = Rewriter::new(10, "void f() {}");
        assert!(rw.is_empty());
        assert_eq!(rw.rewritten_text(), "void f() {}");
    }

    #[test]
    fn insertions_respect_before_and_after() {
        let mut rw = Rewriter::new(0, "{}");
        rw.insert_after(1, "b").unwrap();
        rw.insert_after(1, "c").unwrap();
        rw.insert_before(1, "a").unwrap();
        assert_eq!(rw.rewritten_text(), "{abc}");
    }

    #[test]
    fn insert_at_end() {
        let mut rw = Rewriter::new(0, "x");
        rw.insert_after(1, ";").unwrap();
        assert_eq!(rw.rewritten_text(), "x;");
    }

    #[test]
    fn replacement_uses_absolute_offsets() {
        let src = "int a; void f(tapa::mmap<float> m) {}";
        let start = src.find("tapa::mmap<float>").unwrap();
        let mut rw = Rewriter::new(7, &src[7..]);
        rw.replace(span(start, start + "tapa::mmap<float>".len()), "float*")
            .unwrap();
        assert_eq!(rw.rewritten_text(), "void f(float* m) {}");
    }

    #[test]
    fn removal_and_surrounding_inserts() {
        let mut rw = Rewriter::new(0, "{ body; }");
        rw.remove(span(2, 7)).unwrap();
        rw.insert_after(2, "new;").unwrap();
        rw.insert_after(1, "\n").unwrap();
        assert_eq!(rw.rewritten_text(), "{\n new; }");
    }

    #[test]
    fn multiple_replacements_apply_in_order() {
        let mut rw = Rewriter::new(0, "a b c");
        rw.replace(span(4, 5), "C").unwrap();
        rw.replace(span(0, 1), "A").unwrap();
        assert_eq!(rw.rewritten_text(), "A b C");
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut rw = Rewriter::new(5, "abc");
        assert!(matches!(
            rw.replace(span(0, 2), "x"),
            Err(RewriteError::OutOfRange { .. })
        ));
        assert!(rw.insert_after(9, "x").is_err());
        assert!(rw.is_empty());
    }

    #[test]
    fn overlapping_edits_are_rejected() {
        let mut rw = Rewriter::new(0, "abcdef");
        rw.replace(span(1, 4), "X").unwrap();
        assert!(matches!(
            rw.replace(span(2, 5), "Y"),
            Err(RewriteError::Overlap { .. })
        ));
        assert!(rw.insert_after(2, "!").is_err());
        rw.insert_after(4, "!").unwrap();
        assert_eq!(rw.rewritten_text(), "aX!ef");
    }
}
