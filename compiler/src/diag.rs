// Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases,
// plus the table of stable diagnostic codes.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // ── Errors ──

    /// Syntax error in the translation unit.
    pub const E0001: DiagCode = DiagCode("E0001");
    /// The requested root task is not declared anywhere.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// The requested root task is declared but never defined.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// A port width could not be folded and strict widths are enabled.
    pub const E0103: DiagCode = DiagCode("E0103");

    // ── Warnings ──

    /// A port width could not be folded; width 0 substituted.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// A task can reach itself through invocation edges.
    pub const W0102: DiagCode = DiagCode("W0102");
    /// A task marker appears in a function unreachable from the root.
    pub const W0103: DiagCode = DiagCode("W0103");
    /// A channel operation contradicts the port's direction.
    pub const W0104: DiagCode = DiagCode("W0104");
    /// A repeat count or channel-array size exceeds the unroll limit.
    pub const W0105: DiagCode = DiagCode("W0105");

    /// Every assigned code, in registry order.
    pub const ALL: &[DiagCode] = &[E0001, E0101, E0102, E0103, W0101, W0102, W0103, W0104, W0105];
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Render with a `line:col` prefix resolved against `source`.
    pub fn render(&self, path: &str, source: &str) -> String {
        let (line, col) = line_col(source, self.span.start);
        let mut out = format!("{path}:{line}:{col}: {self}");
        for related in &self.related_spans {
            let (line, col) = line_col(source, related.span.start);
            out.push_str(&format!("\n  note: {path}:{line}:{col}: {}", related.label));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    (line, col)
}
