// Task marker and invocation recognizer
//
// Stateless pattern matching over AST shapes: finds the task-composition
// marker (`tapa::task().invoke(...)...`) in a function body, extracts its
// invocations in source order, and collects the channel operations a body
// performs on each named variable.
//
// Preconditions: none; any AST shape is accepted.
// Postconditions: negative results are `None` / empty, never errors.
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::ast::*;

// ── Task marker ─────────────────────────────────────────────────────────────

/// The expression statement in `body` that composes a task, if any.
///
/// A marker is a method-call chain rooted in a zero-argument call of
/// `tapa::task` (or `task` brought in by `using namespace tapa;`). Only
/// top-level statements of the body are considered.
pub fn task_marker(body: Option<&Block>) -> Option<&Expr> {
    body?.stmts.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::Expr(expr) if is_task_chain(expr) => Some(expr),
        _ => None,
    })
}

fn is_task_chain(expr: &Expr) -> bool {
    let mut cur = expr.peel();
    while let ExprKind::MethodCall { receiver, .. } = &cur.kind {
        cur = receiver.peel();
    }
    let ExprKind::Call { callee, args } = &cur.kind else {
        return false;
    };
    let Some(name) = callee.as_name() else {
        return false;
    };
    let segments: Vec<&str> = name.segments.iter().map(|s| s.name.as_str()).collect();
    args.is_empty() && matches!(segments.as_slice(), ["tapa", "task"] | ["task"])
}

// ── Invocations ─────────────────────────────────────────────────────────────

/// How the parent waits for a child instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    Join,
    Detach,
}

impl InvokeMode {
    /// Scheduling step recorded in metadata: `0` for join, `-1` for detach.
    pub fn step(self) -> i64 {
        match self {
            InvokeMode::Join => 0,
            InvokeMode::Detach => -1,
        }
    }
}

/// One `.invoke(...)` link of a task chain.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// The task named by the first argument, e.g. `Load` or `Foo<4>`.
    pub callee: &'a QualName,
    /// Arguments after the task name.
    pub args: &'a [Expr],
    pub mode: InvokeMode,
    /// Repeat count from `invoke<mode, N>`, unevaluated.
    pub count: Option<Expr>,
    pub span: Span,
}

/// The invocations of a task marker, in source order.
///
/// Links other than `invoke` are ignored, as are invocations whose first
/// argument is not a plain (optionally templated) name.
pub fn invocations(marker: &Expr) -> Vec<Invocation<'_>> {
    let mut out = Vec::new();
    collect_invocations(marker, &mut out);
    out
}

fn collect_invocations<'a>(expr: &'a Expr, out: &mut Vec<Invocation<'a>>) {
    let ExprKind::MethodCall {
        receiver,
        method,
        args,
        ..
    } = &expr.peel().kind
    else {
        return;
    };
    // Receiver first: the innermost link is the first invocation.
    collect_invocations(receiver, out);
    if method.name != "invoke" {
        return;
    }
    let Some((first, rest)) = args.split_first() else {
        return;
    };
    let Some(callee) = first.as_name() else {
        return;
    };
    let mut mode = InvokeMode::Join;
    let mut count = None;
    for targ in method.template_args.iter().flatten() {
        match targ {
            TemplateArg::Type(ty) if ty.name.last().name == "detach" => mode = InvokeMode::Detach,
            TemplateArg::Type(ty) if ty.name.last().name == "join" => mode = InvokeMode::Join,
            other => count = other.as_expr(),
        }
    }
    out.push(Invocation {
        callee,
        args: rest,
        mode,
        count,
        span: expr.span,
    });
}

// ── Walking ─────────────────────────────────────────────────────────────────

/// Call `f` on every statement reachable from `stmts`, pre-order.
pub fn for_each_stmt<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        match &stmt.kind {
            StmtKind::Compound(block) => for_each_stmt(&block.stmts, f),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                for_each_stmt(std::slice::from_ref(then_branch.as_ref()), f);
                if let Some(e) = else_branch {
                    for_each_stmt(std::slice::from_ref(e.as_ref()), f);
                }
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    for_each_stmt(std::slice::from_ref(init.as_ref()), f);
                }
                for_each_stmt(std::slice::from_ref(body.as_ref()), f);
            }
            StmtKind::RangeFor { body, .. }
            | StmtKind::While { body, .. }
            | StmtKind::DoWhile { body, .. }
            | StmtKind::Switch { body, .. }
            | StmtKind::Label { body, .. } => {
                for_each_stmt(std::slice::from_ref(body.as_ref()), f)
            }
            _ => {}
        }
    }
}

/// Call `f` on every expression reachable from `stmts`, pre-order.
pub fn for_each_expr<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Expr)) {
    for_each_stmt(stmts, &mut |stmt| {
        let exprs: Vec<&Expr> = match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Case(e) => vec![e],
            StmtKind::Return(e) => e.iter().collect(),
            StmtKind::Decl(decl) => decl
                .declarators
                .iter()
                .flat_map(|d| {
                    let init: Vec<&Expr> = match &d.init {
                        Some(Init::Assign(e)) => vec![e],
                        Some(Init::Ctor(args) | Init::Brace(args)) => args.iter().collect(),
                        None => Vec::new(),
                    };
                    d.array_dims.iter().chain(init)
                })
                .collect(),
            StmtKind::If { cond, .. }
            | StmtKind::While { cond, .. }
            | StmtKind::DoWhile { cond, .. }
            | StmtKind::Switch { cond, .. } => vec![cond],
            StmtKind::For { cond, step, .. } => cond.iter().chain(step.iter()).collect(),
            StmtKind::RangeFor { range, .. } => vec![range],
            _ => Vec::new(),
        };
        for e in exprs {
            walk_expr(e, f);
        }
    });
}

fn walk_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            walk_expr(callee, f);
            args.iter().for_each(|a| walk_expr(a, f));
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            walk_expr(receiver, f);
            args.iter().for_each(|a| walk_expr(a, f));
        }
        ExprKind::Member { base, .. } => walk_expr(base, f),
        ExprKind::Index { base, index } => {
            walk_expr(base, f);
            walk_expr(index, f);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Postfix { operand, .. } => {
            walk_expr(operand, f)
        }
        ExprKind::Binary { lhs, rhs, .. } | ExprKind::Assign { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr(cond, f);
            walk_expr(then_expr, f);
            walk_expr(else_expr, f);
        }
        ExprKind::Cast { expr, .. } | ExprKind::SizeofExpr(expr) | ExprKind::Paren(expr) => {
            walk_expr(expr, f)
        }
        ExprKind::InitList(items) => items.iter().for_each(|i| walk_expr(i, f)),
        _ => {}
    }
}

/// `#pragma` lines anywhere in `body`, in source order.
pub fn pragmas(body: &Block) -> Vec<&str> {
    let mut out = Vec::new();
    for_each_stmt(&body.stmts, &mut |stmt| {
        if let StmtKind::Directive(text) = &stmt.kind {
            if text.trim_start_matches('#').trim_start().starts_with("pragma") {
                out.push(text.as_str());
            }
        }
    });
    out
}

// ── Channel operations ──────────────────────────────────────────────────────

/// An operation a body performs on a channel-typed variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOp {
    Read,
    Write,
    Peek,
    TryRead,
    TryWrite,
    Empty,
    Full,
    Eot,
    Close,
    Open,
    Acquire,
    Access,
}

impl ChannelOp {
    fn from_method(name: &str) -> Option<Self> {
        Some(match name {
            "read" | "read_nb" => ChannelOp::Read,
            "write" | "write_nb" => ChannelOp::Write,
            "peek" => ChannelOp::Peek,
            "try_read" => ChannelOp::TryRead,
            "try_write" => ChannelOp::TryWrite,
            "empty" | "try_eot" => ChannelOp::Empty,
            "full" => ChannelOp::Full,
            "eot" => ChannelOp::Eot,
            "close" => ChannelOp::Close,
            "open" => ChannelOp::Open,
            "acquire" => ChannelOp::Acquire,
            _ => return None,
        })
    }

    /// Operations only a consumer performs.
    pub fn is_input_only(self) -> bool {
        matches!(
            self,
            ChannelOp::Read
                | ChannelOp::Peek
                | ChannelOp::TryRead
                | ChannelOp::Empty
                | ChannelOp::Eot
                | ChannelOp::Open
        )
    }

    /// Operations only a producer performs.
    pub fn is_output_only(self) -> bool {
        matches!(
            self,
            ChannelOp::Write | ChannelOp::TryWrite | ChannelOp::Full | ChannelOp::Close
        )
    }
}

impl fmt::Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelOp::Read => "read",
            ChannelOp::Write => "write",
            ChannelOp::Peek => "peek",
            ChannelOp::TryRead => "try_read",
            ChannelOp::TryWrite => "try_write",
            ChannelOp::Empty => "empty",
            ChannelOp::Full => "full",
            ChannelOp::Eot => "eot",
            ChannelOp::Close => "close",
            ChannelOp::Open => "open",
            ChannelOp::Acquire => "acquire",
            ChannelOp::Access => "access",
        };
        write!(f, "{s}")
    }
}

/// Channel operations per root variable name.
///
/// `x.read()`, `x[i].write(v)`, `x << v` (write), `x >> v` (read) and
/// `x[i]` (access) are recognized.
pub fn channel_ops(body: &Block) -> BTreeMap<String, BTreeSet<ChannelOp>> {
    let mut ops: BTreeMap<String, BTreeSet<ChannelOp>> = BTreeMap::new();
    let mut record = |name: Option<&str>, op: ChannelOp| {
        if let Some(name) = name {
            ops.entry(name.to_string()).or_default().insert(op);
        }
    };
    for_each_expr(&body.stmts, &mut |expr| match &expr.kind {
        ExprKind::MethodCall {
            receiver, method, ..
        } => {
            if let Some(op) = ChannelOp::from_method(&method.name) {
                record(receiver.root_name(), op);
            }
        }
        ExprKind::Binary {
            op: BinOp::Shl,
            lhs,
            ..
        } => record(lhs.as_name().map(|n| n.last().name.as_str()), ChannelOp::Write),
        ExprKind::Binary {
            op: BinOp::Shr,
            lhs,
            ..
        } => record(lhs.as_name().map(|n| n.last().name.as_str()), ChannelOp::Read),
        ExprKind::Index { base, .. } => record(base.as_name().map(|n| n.last().name.as_str()), ChannelOp::Access),
        _ => {}
    });
    ops
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn body(src: &str) -> Block {
        let result = parse(src);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        let unit = result.unit.expect("unit");
        let ItemKind::Function(f) = &unit.items[0].kind else {
            panic!("expected function")
        };
        f.body.clone().expect("body")
    }

    #[test]
    fn no_body_is_not_a_task() {
        assert!(task_marker(None).is_none());
    }

    #[test]
    fn plain_body_is_not_a_task() {
        let b = body("void f(int x) { x = x + 1; foo().invoke(Bar); }");
        assert!(task_marker(Some(&b)).is_none());
    }

    #[test]
    fn finds_marker_and_invocations_in_order() {
        let b = body(
            "void Top(tapa::mmap<float> m) {\n  tapa::stream<float> q(\"q\");\n  tapa::task().invoke(Load, m, q).invoke(Store, q, m);\n}",
        );
        let marker = task_marker(Some(&b)).expect("marker");
        let invs = invocations(marker);
        let names: Vec<_> = invs.iter().map(|i| i.callee.path()).collect();
        assert_eq!(names, vec!["Load", "Store"]);
        assert_eq!(invs[0].args.len(), 2);
        assert_eq!(invs[0].mode, InvokeMode::Join);
    }

    #[test]
    fn bare_task_with_using_namespace() {
        let b = body("void Top() { task().invoke(A); }");
        let marker = task_marker(Some(&b)).expect("marker");
        assert_eq!(invocations(marker).len(), 1);
    }

    #[test]
    fn marker_without_invocations() {
        let b = body("void Top() { tapa::task(); }");
        let marker = task_marker(Some(&b)).expect("marker");
        assert!(invocations(marker).is_empty());
    }

    #[test]
    fn modes_and_counts() {
        let b = body(
            "void Top() { tapa::task().invoke<tapa::detach>(A).invoke<tapa::join, 4>(B, qs); }",
        );
        let invs = invocations(task_marker(Some(&b)).expect("marker"));
        assert_eq!(invs[0].mode, InvokeMode::Detach);
        assert_eq!(invs[0].mode.step(), -1);
        assert!(invs[0].count.is_none());
        assert_eq!(invs[1].mode, InvokeMode::Join);
        assert!(matches!(
            invs[1].count.as_ref().map(|e| &e.kind),
            Some(ExprKind::Int(4))
        ));
    }

    #[test]
    fn unresolvable_callees_are_skipped() {
        let b = body("void Top() { tapa::task().invoke(*fp, x).invoke(Real, y).then(z); }");
        let invs = invocations(task_marker(Some(&b)).expect("marker"));
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].callee.path(), "Real");
    }

    #[test]
    fn templated_callee_keeps_arguments() {
        let b = body("void Top() { tapa::task().invoke(Foo<4>, a).invoke(Foo<8>, b); }");
        let invs = invocations(task_marker(Some(&b)).expect("marker"));
        assert_eq!(invs.len(), 2);
        assert!(invs.iter().all(|i| i.callee.path() == "Foo"));
    }

    #[test]
    fn channel_ops_serialize_as_their_names() {
        for op in [ChannelOp::Read, ChannelOp::TryWrite, ChannelOp::Eot, ChannelOp::Access] {
            assert_eq!(serde_json::to_value(op).unwrap(), serde_json::json!(op.to_string()));
        }
    }

    #[test]
    fn channel_ops_by_receiver() {
        let b = body(
            "void Add(tapa::istream<float>& a, tapa::ostream<float>& c, tapa::mmap<float> m) {\n  for (int i = 0; i < 8; ++i) {\n    float v = a.read();\n    if (!a.empty()) c.write(v + m[i]);\n  }\n  c.close();\n}",
        );
        let ops = channel_ops(&b);
        assert_eq!(
            ops["a"].iter().copied().collect::<Vec<_>>(),
            vec![ChannelOp::Read, ChannelOp::Empty]
        );
        assert_eq!(
            ops["c"].iter().copied().collect::<Vec<_>>(),
            vec![ChannelOp::Write, ChannelOp::Close]
        );
        assert!(ops["m"].contains(&ChannelOp::Access));
    }

    #[test]
    fn shift_operators_count_as_stream_ops() {
        let b = body("void f() { out << in.read(); in >> x; }");
        let ops = channel_ops(&b);
        assert!(ops["out"].contains(&ChannelOp::Write));
        assert!(ops["in"].contains(&ChannelOp::Read));
    }

    #[test]
    fn pragmas_are_collected_recursively() {
        let b = body(
            "void f() {\n#pragma HLS inline off\n  for (;;) {\n#pragma HLS pipeline II=1\n  }\n}",
        );
        assert_eq!(
            pragmas(&b),
            vec!["#pragma HLS inline off", "#pragma HLS pipeline II=1"]
        );
    }
}
