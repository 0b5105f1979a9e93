// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts for one translation unit and runs the minimal set
// of passes for a given terminal PassId. Parsing happens before the runner
// (`parse_source`), so `--emit ast` never touches it.
//
// Preconditions: the unit was parsed from `source` without errors.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; rewrite conflicts.
// Side effects: calls on_pass_complete callback after each pass for immediate display;
//               prints per-pass timing to stderr when verbose.

use std::time::Instant;

use tracing::debug;

use crate::ast::{Span, TranslationUnit};
use crate::consteval::Evaluator;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::graph::TaskGraph;
use crate::id::FuncId;
use crate::parser;
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::TaskRegistry;
use crate::resolve::{Define, ProgramIndex};
use crate::rewrite::RewriteError;
use crate::visitor::{Target, Visitor, VisitorConfig};

// ── Options ────────────────────────────────────────────────────────────────

/// Everything the driver configures for one compilation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Name of the root task.
    pub top: String,
    pub target: Target,
    /// `-D NAME=VALUE` overrides, applied after in-source macros.
    pub defines: Vec<Define>,
    pub strict_widths: bool,
    pub verbose: bool,
}

// ── Parsing ────────────────────────────────────────────────────────────────

/// Result of the parse step that precedes the pass runner.
pub struct ParseOutcome {
    pub unit: Option<TranslationUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse `source`, converting syntax errors into `E0001` diagnostics.
pub fn parse_source(source: &str) -> ParseOutcome {
    let result = parser::parse(source);
    let diagnostics = result
        .errors
        .iter()
        .map(|err| {
            let span = *err.span();
            Diagnostic::error(codes::E0001, span, err.to_string())
        })
        .collect();
    ParseOutcome {
        unit: result.unit,
        diagnostics,
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata recorded in the emitted bundle.
///
/// `source_hash`: SHA-256 of the raw source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from source text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState<'u, 's> {
    pub source: &'s str,
    pub unit: &'u TranslationUnit,
    pub index: Option<ProgramIndex<'u>>,
    pub root: Option<FuncId>,
    pub graph: Option<TaskGraph>,
    pub registry: Option<TaskRegistry<'s>>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Provenance,
}

impl<'u, 's> CompilationState<'u, 's> {
    pub fn new(source: &'s str, unit: &'u TranslationUnit) -> Self {
        Self {
            source,
            unit,
            index: None,
            root: None,
            graph: None,
            registry: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: compute_provenance(source),
        }
    }
}

/// A required artifact that an earlier pass must have produced.
fn artifact<'x, T>(slot: &'x Option<T>, what: &str) -> &'x T {
    slot.as_ref()
        .unwrap_or_else(|| panic!("internal: {what} missing; pass order violated"))
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed. For `Diagnostics`, the specific diagnostics
/// are available in `CompilationState.diagnostics`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{failing_pass} pass reported errors")]
    Diagnostics { failing_pass: PassId },
    #[error("conflicting rewrite: {0}")]
    Rewrite(#[from] RewriteError),
}

// ── Helper: check diagnostics for errors ───────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState<'_, '_>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "tfc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError::Diagnostics {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: unknown or undefined root task; strict width failures;
///   rewrite conflicts.
pub fn run_pipeline(
    state: &mut CompilationState<'_, '_>,
    terminal: PassId,
    options: &Options,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Index => {
                let index = ProgramIndex::build(state.unit, &options.defines);
                debug!(functions = index.len(), "indexed translation unit");
                state.index = Some(index);
                Vec::new()
            }
            PassId::Discover => {
                let index = artifact(&state.index, "program index");
                match find_root(index, state.unit, &options.top) {
                    Ok(root) => {
                        let graph = TaskGraph::build(&Evaluator::new(index), root);
                        debug!(root = %options.top, tasks = graph.order.len(), "discovered task hierarchy");
                        state.root = Some(root);
                        state.graph = Some(graph);
                        Vec::new()
                    }
                    Err(diag) => vec![diag],
                }
            }
            PassId::Classify => {
                let index = artifact(&state.index, "program index");
                let graph = artifact(&state.graph, "task graph");
                let mut registry = TaskRegistry::new(state.source, index);
                let config = VisitorConfig {
                    target: options.target,
                    strict_widths: options.strict_widths,
                };
                let diags = Visitor::new(index, state.source, &mut registry, graph.root, &graph.order, config)
                    .run()?;
                state.registry = Some(registry);
                diags
            }
        };
        let elapsed = t.elapsed();
        finish_pass(state, pass_id, diags, elapsed, options.verbose, &mut on_pass_complete)?;
    }
    Ok(())
}

/// Resolve the root task name to its defining declaration.
fn find_root(index: &ProgramIndex<'_>, unit: &TranslationUnit, top: &str) -> Result<FuncId, Diagnostic> {
    let candidates = index.lookup(top);
    let Some(&first) = candidates.first() else {
        return Err(Diagnostic::error(
            codes::E0101,
            Span::from(unit.span.start..unit.span.start),
            format!("root task `{top}` is not declared in this translation unit"),
        )
        .with_hint("pass the name of a function with `--top`"));
    };
    candidates
        .iter()
        .map(|&id| index.func(id))
        .filter(|f| f.has_body())
        .min_by_key(|f| (!f.is_primary(), f.id))
        .map(|f| f.id)
        .ok_or_else(|| {
            let decl = index.func(first).decl;
            Diagnostic::error(
                codes::E0102,
                decl.name.span,
                format!("root task `{top}` is declared but never defined"),
            )
            .with_hint("the root task's body must be in this translation unit")
        })
}

// ── Tests ──────────────────────────────────────────────────────────────────
