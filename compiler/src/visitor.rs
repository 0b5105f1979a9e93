// visitor.rs — Task classification and body rewriting
//
// Walks every function definition in source order. Functions outside the
// discovered task set are left alone. Each task is classified as upper-level
// (its marker invokes children) or lower-level (a leaf), and its registry
// record is filled in:
//
//   upper → ports, `tasks` instance entries, local `fifos` / `buffers` linked
//           to their producer and consumer instances, and a composition body
//   lower → per-port facts (width, count, dims, observed channel ops), body
//           pragmas, a target-typed signature and interface pragmas
//
// Preconditions: `tasks` came from `graph::all_reachable` over `index`.
// Postconditions: every task has exactly one registry record with `level`,
//                 `target`, `vendor` and `ports` set.
// Failure modes: width fold failures are warnings (errors under strict
//                widths); rewrite conflicts abort with `RewriteError`.
// Side effects: emits `tracing` events.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::ast::*;
use crate::consteval::Evaluator;
use crate::diag::{codes, Diagnostic};
use crate::graph;
use crate::id::FuncId;
use crate::layout;
use crate::ports::{self, BufferConfig, Direction, PartitionKind, PortKind};
use crate::recognize::{self, ChannelOp};
use crate::registry::{Metadata, TaskRegistry};
use crate::resolve::ProgramIndex;
use crate::rewrite::RewriteError;

/// Depth of a local stream declared without one.
pub const DEFAULT_STREAM_DEPTH: i64 = 2;

/// Repeated instances and channel-array elements past this are not unrolled.
pub const MAX_UNROLL: u64 = 4096;

// ── Configuration ───────────────────────────────────────────────────────────

/// Backend the rewritten code is shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Vitis HLS: `hls::stream` signatures and `#pragma HLS interface`.
    #[default]
    XilinxHls,
    /// Metadata only; code is emitted unchanged.
    Generic,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::XilinxHls => "xilinx-hls",
            Target::Generic => "generic",
        }
    }

    pub fn vendor(self) -> &'static str {
        match self {
            Target::XilinxHls => "xilinx",
            Target::Generic => "none",
        }
    }

    fn rewrites_code(self) -> bool {
        self == Target::XilinxHls
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown target '{0}' (expected 'xilinx-hls' or 'generic')")]
pub struct UnknownTarget(pub String);

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xilinx-hls" | "xilinx" => Ok(Target::XilinxHls),
            "generic" => Ok(Target::Generic),
            other => Err(UnknownTarget(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VisitorConfig {
    pub target: Target,
    /// Width fold failures are errors instead of warnings.
    pub strict_widths: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Upper,
    Lower,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Upper => "upper",
            Level::Lower => "lower",
        }
    }
}

// ── Visitor ─────────────────────────────────────────────────────────────────

/// The function currently being processed.
#[derive(Debug)]
struct TaskCtx {
    task: FuncId,
    name: String,
    is_top: bool,
    /// Template parameters of the task, unbound while it is processed.
    dependent: Vec<String>,
}

/// A local channel declared in an upper-level body.
enum LocalChannel {
    Fifo,
    Buffer,
}

pub struct Visitor<'v, 'a, 's> {
    index: &'v ProgramIndex<'a>,
    source: &'s str,
    registry: &'v mut TaskRegistry<'s>,
    root: FuncId,
    tasks: HashSet<FuncId>,
    recursive: HashSet<FuncId>,
    config: VisitorConfig,
    ctx: Option<TaskCtx>,
    diagnostics: Vec<Diagnostic>,
}

impl<'v, 'a, 's> Visitor<'v, 'a, 's> {
    pub fn new(
        index: &'v ProgramIndex<'a>,
        source: &'s str,
        registry: &'v mut TaskRegistry<'s>,
        root: FuncId,
        tasks: &[FuncId],
        config: VisitorConfig,
    ) -> Self {
        Visitor {
            index,
            source,
            registry,
            root,
            tasks: tasks.iter().copied().collect(),
            recursive: graph::recursive_tasks(index, root).into_iter().collect(),
            config,
            ctx: None,
            diagnostics: Vec::new(),
        }
    }

    /// Process every function definition; returns the diagnostics raised.
    pub fn run(mut self) -> Result<Vec<Diagnostic>, RewriteError> {
        let index = self.index;
        for entry in index.funcs() {
            if let Some(body) = &entry.decl.body {
                self.visit_function(entry.id, entry.decl, body)?;
            }
        }
        Ok(self.diagnostics)
    }

    fn visit_function(
        &mut self,
        id: FuncId,
        decl: &'a FunctionDecl,
        body: &'a Block,
    ) -> Result<(), RewriteError> {
        let name = self.index.func(id).short_name().to_string();
        let marker = recognize::task_marker(Some(body));

        if !self.tasks.contains(&id) {
            if let Some(marker) = marker {
                let root = self.index.func(self.root).short_name();
                self.diagnostics.push(
                    Diagnostic::warning(
                        codes::W0103,
                        marker.span,
                        format!("task marker in `{name}`, which is not reachable from `{root}`"),
                    )
                    .with_hint(format!("invoke `{name}` from `{root}` or drop the marker")),
                );
            }
            return Ok(());
        }

        let level = match marker {
            Some(m) if !recognize::invocations(m).is_empty() => Level::Upper,
            _ => Level::Lower,
        };
        debug!(task = %name, level = level.as_str(), "classified task");

        self.ctx = Some(TaskCtx {
            task: id,
            name: name.clone(),
            is_top: id == self.root,
            dependent: decl
                .template_params
                .iter()
                .flatten()
                .map(|p| p.name().to_string())
                .collect(),
        });

        let target = self.config.target;
        let meta = self.meta();
        meta.insert("level".into(), json!(level.as_str()));
        meta.insert("target".into(), json!(target.name()));
        meta.insert("vendor".into(), json!(target.vendor()));

        let result = match level {
            Level::Upper => self.visit_upper(decl, body),
            Level::Lower => self.visit_lower(decl, body),
        };

        if self.recursive.contains(&id) {
            self.meta().insert("recursive".into(), json!(true));
            self.diagnostics.push(
                Diagnostic::warning(
                    codes::W0102,
                    decl.name.span,
                    format!("task `{name}` instantiates itself through its children"),
                )
                .with_hint("the hierarchy is emitted once per task; instances are not unrolled"),
            );
        }
        self.ctx = None;
        result
    }

    // ── Upper-level tasks ──

    fn visit_upper(&mut self, decl: &'a FunctionDecl, body: &'a Block) -> Result<(), RewriteError> {
        let index = self.index;
        let eval = self.eval();
        let task = self.ctx().task;

        let kinds: Vec<PortKind> = decl
            .params
            .iter()
            .map(|p| ports::classify(self.index, &p.ty))
            .collect();
        let port_list: Vec<Value> = decl
            .params
            .iter()
            .zip(&kinds)
            .map(|(param, kind)| self.port_entry(&eval, param, kind, None))
            .collect();

        // Channel arrays addressable by `name[k]`, with their lengths.
        let mut arrays: HashMap<String, u64> = HashMap::new();
        for (param, kind) in decl.params.iter().zip(&kinds) {
            if let (Some(name), Some(count)) = (&param.name, kind.count()) {
                if let Ok(n) = eval.eval(count) {
                    arrays.insert(name.name.clone(), n.max(0) as u64);
                }
            }
        }
        let mut fifos = Map::new();
        let mut buffers = Map::new();
        let mut channels: HashMap<String, LocalChannel> = HashMap::new();
        self.collect_locals(&eval, body, &mut fifos, &mut buffers, &mut channels, &mut arrays);

        let mut tasks = Map::new();
        let mut cursors: HashMap<(String, Option<Direction>), u64> = HashMap::new();
        let mut instance_lines = Vec::new();
        for (child, inv) in graph::child_invocations(index, task) {
            let child_entry = index.func(child);
            let child_name = child_entry.short_name().to_string();
            let child_kinds: Vec<PortKind> = child_entry
                .decl
                .params
                .iter()
                .map(|p| ports::classify(index, &p.ty))
                .collect();
            let count = graph::repeat_count(&eval, &inv).unwrap_or_else(|err| {
                warn!(task = %self.ctx().name, child = %child_name, %err, "repeat count not constant; using 1");
                1
            });
            let count = self.unroll_limit(count, &format!("instances of `{child_name}`"), inv.span);
            let template_args = inv
                .callee
                .last()
                .template_args
                .as_ref()
                .map(|targs| targs.iter().map(|t| self.targ_value(&eval, t)).collect::<Vec<_>>());

            for _ in 0..count {
                let slot = tasks
                    .entry(child_name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let idx = slot.as_array().map_or(0, Vec::len);
                let mut args = Map::new();
                let mut arg_texts = Vec::new();
                for (pos, ((param, pkind), arg)) in child_entry
                    .decl
                    .params
                    .iter()
                    .zip(&child_kinds)
                    .zip(inv.args)
                    .enumerate()
                {
                    let pname = param
                        .name
                        .as_ref()
                        .map_or_else(|| format!("_{pos}"), |n| n.name.clone());
                    let text = self.bind_arg(&eval, arg, pkind, &arrays, &mut cursors);
                    if let Some(dir) = pkind.direction() {
                        let side = match dir {
                            Direction::In => Some("consumed_by"),
                            Direction::Out => Some("produced_by"),
                            Direction::Local => None,
                        };
                        if let Some(side) = side {
                            let link = json!([child_name, idx]);
                            link_channel(&mut fifos, &mut buffers, &channels, &text, side, &link);
                        }
                    }
                    args.insert(pname, json!({ "cat": pkind.cat(), "arg": text }));
                    arg_texts.push(text);
                }
                let mut entry = Map::new();
                entry.insert("step".into(), json!(inv.mode.step()));
                entry.insert("args".into(), Value::Object(args));
                if let Some(targs) = &template_args {
                    entry.insert("template_args".into(), json!(targs));
                }
                if let Some(list) = tasks.get_mut(&child_name).and_then(Value::as_array_mut) {
                    list.push(Value::Object(entry));
                }
                instance_lines.push(format!(
                    "  // invoke {child_name}[{idx}] step={}: ({})",
                    inv.mode.step(),
                    arg_texts.join(", ")
                ));
            }
            self.registry.ensure(child);
        }

        let meta = self.meta();
        meta.insert("ports".into(), Value::Array(port_list));
        meta.insert("tasks".into(), Value::Object(tasks));
        meta.insert("fifos".into(), Value::Object(fifos));
        meta.insert("buffers".into(), Value::Object(buffers));

        if self.config.target.rewrites_code() {
            let mut lines = vec!["{".to_string()];
            lines.extend(self.interface_pragmas(&eval, decl, &kinds));
            lines.extend(instance_lines);
            lines.push("}".to_string());
            self.registry
                .rewriter(task)
                .replace(body.span, lines.join("\n"))?;
        }
        Ok(())
    }

    /// Record local streams and buffers declared anywhere in `body`.
    fn collect_locals(
        &mut self,
        eval: &Evaluator<'v, 'a>,
        body: &'a Block,
        fifos: &mut Map<String, Value>,
        buffers: &mut Map<String, Value>,
        channels: &mut HashMap<String, LocalChannel>,
        arrays: &mut HashMap<String, u64>,
    ) {
        let mut decls = Vec::new();
        recognize::for_each_stmt(&body.stmts, &mut |stmt| {
            if let StmtKind::Decl(var) = &stmt.kind {
                decls.push(var);
            }
        });
        for var in decls {
            let kind = ports::classify(self.index, &var.ty);
            if kind.direction() != Some(Direction::Local) {
                continue;
            }
            for declarator in &var.declarators {
                let name = declarator.name.name.clone();
                let elements = match kind.count() {
                    Some(count) => match eval.eval(count) {
                        Ok(n) => {
                            let n = self.unroll_limit(n.max(0) as u64, &format!("elements of `{name}`"), declarator.span);
                            arrays.insert(name.clone(), n);
                            (0..n).map(|i| format!("{name}[{i}]")).collect()
                        }
                        Err(err) => {
                            warn!(task = %self.ctx().name, local = %name, %err, "channel count not constant");
                            vec![name.clone()]
                        }
                    },
                    None => vec![name.clone()],
                };
                match &kind {
                    PortKind::Stream { elem, depth, .. } | PortKind::Streams { elem, depth, .. } => {
                        let width = self.width(eval, elem, declarator.span);
                        let depth = depth
                            .as_ref()
                            .map_or(json!(DEFAULT_STREAM_DEPTH), |d| self.fold(eval, d));
                        for element in elements {
                            fifos.insert(
                                element,
                                json!({ "depth": depth, "width": width, "type": self.type_text(elem) }),
                            );
                        }
                        channels.insert(name, LocalChannel::Fifo);
                    }
                    PortKind::Buffer { config, .. } | PortKind::Buffers { config, .. } => {
                        let entry = self.buffer_entry(eval, config, declarator.span);
                        for element in elements {
                            buffers.insert(element, entry.clone());
                        }
                        channels.insert(name, LocalChannel::Buffer);
                    }
                    _ => {}
                }
            }
        }
    }

    fn buffer_entry(&mut self, eval: &Evaluator<'v, 'a>, config: &BufferConfig, span: Span) -> Value {
        let width = self.width(eval, &config.elem, span);
        let dims: Vec<Value> = config.dims.iter().map(|d| self.fold(eval, d)).collect();
        let partitions: Vec<Value> = config
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let factor = match p.kind {
                    PartitionKind::Normal => json!(1),
                    PartitionKind::Complete => dims.get(i).cloned().unwrap_or(json!(1)),
                    PartitionKind::Cyclic | PartitionKind::Block => {
                        p.factor.as_ref().map_or(json!(1), |f| self.fold(eval, f))
                    }
                };
                json!({ "type": p.kind.as_str(), "factor": factor })
            })
            .collect();
        json!({
            "width": width,
            "type": self.type_text(&config.elem),
            "dims": dims,
            "n_sections": config.n_sections.as_ref().map_or(json!(1), |n| self.fold(eval, n)),
            "partitions": partitions,
            "memcore_type": config.memcore.as_str(),
        })
    }

    /// Text an argument is recorded with. A whole channel array passed to a
    /// singular channel parameter binds its next unused element; producers
    /// and consumers of one array advance separately.
    fn bind_arg(
        &self,
        eval: &Evaluator<'v, 'a>,
        arg: &Expr,
        param: &PortKind,
        arrays: &HashMap<String, u64>,
        cursors: &mut HashMap<(String, Option<Direction>), u64>,
    ) -> String {
        let singular = matches!(
            param,
            PortKind::Stream { .. } | PortKind::Buffer { .. } | PortKind::Mmap { .. }
        );
        if let Some(name) = arg.as_name().filter(|n| n.is_single()) {
            let name = &name.segments[0].name;
            if singular {
                if let Some(&len) = arrays.get(name) {
                    let cursor = cursors.entry((name.clone(), param.direction())).or_insert(0);
                    let k = *cursor;
                    *cursor += 1;
                    if k >= len {
                        warn!(task = %self.ctx().name, array = %name, "more bindings than channels");
                    }
                    return format!("{name}[{k}]");
                }
            }
            return name.clone();
        }
        if let ExprKind::Index { base, index } = &arg.peel().kind {
            if let (Some(name), Ok(k)) = (base.as_name().filter(|n| n.is_single()), eval.eval(index)) {
                return format!("{}[{k}]", name.segments[0].name);
            }
        }
        self.text(arg.span).to_string()
    }

    fn targ_value(&self, eval: &Evaluator<'v, 'a>, targ: &TemplateArg) -> Value {
        match targ {
            TemplateArg::Expr(e) => self.fold(eval, e),
            TemplateArg::Type(ty) => match targ.as_expr().map(|e| eval.eval(&e)) {
                Some(Ok(v)) => json!(v),
                _ => json!(self.type_text(ty)),
            },
        }
    }

    // ── Lower-level tasks ──

    fn visit_lower(&mut self, decl: &'a FunctionDecl, body: &'a Block) -> Result<(), RewriteError> {
        let eval = self.eval();
        let task = self.ctx().task;
        let ops = recognize::channel_ops(body);

        let kinds: Vec<PortKind> = decl
            .params
            .iter()
            .map(|p| ports::classify(self.index, &p.ty))
            .collect();
        let mut port_list = Vec::new();
        for (param, kind) in decl.params.iter().zip(&kinds) {
            let seen = param.name.as_ref().and_then(|n| ops.get(&n.name));
            if let Some(seen) = seen {
                self.check_direction(param, kind, seen);
            }
            port_list.push(self.port_entry(&eval, param, kind, seen));
        }
        let pragmas: Vec<Value> = recognize::pragmas(body).into_iter().map(|p| json!(p)).collect();

        let meta = self.meta();
        meta.insert("ports".into(), Value::Array(port_list));
        meta.insert("pragmas".into(), Value::Array(pragmas));

        if !self.config.target.rewrites_code() {
            return Ok(());
        }
        for (param, kind) in decl.params.iter().zip(&kinds) {
            if let Some(text) = self.param_text(&eval, param, kind) {
                self.registry.rewriter(task).replace(param.span, text)?;
            }
        }
        let lines = self.interface_pragmas(&eval, decl, &kinds);
        if !lines.is_empty() {
            let text: String = lines.iter().map(|l| format!("\n{l}")).collect();
            self.registry
                .rewriter(task)
                .insert_after(body.span.start + 1, text)?;
        }
        Ok(())
    }

    fn check_direction(&mut self, param: &Param, kind: &PortKind, seen: &BTreeSet<ChannelOp>) {
        let Some(name) = &param.name else { return };
        if !kind.is_stream() {
            return;
        }
        let bad = match kind.direction() {
            Some(Direction::In) => seen.iter().find(|op| op.is_output_only()),
            Some(Direction::Out) => seen.iter().find(|op| op.is_input_only()),
            _ => None,
        };
        if let Some(op) = bad {
            self.diagnostics.push(
                Diagnostic::warning(
                    codes::W0104,
                    param.span,
                    format!("`{}` is an {} but `{}` calls `{op}` on it", name.name, kind.cat(), self.ctx().name),
                )
                .with_hint("check the port direction in the signature"),
            );
        }
    }

    /// Target-typed parameter text, or `None` to keep the original.
    fn param_text(&self, eval: &Evaluator<'v, 'a>, param: &Param, kind: &PortKind) -> Option<String> {
        let name = &param.name.as_ref()?.name;
        let count = |c: Option<&Expr>| {
            c.map(|e| format!("[{}]", self.fold_text(eval, e)))
                .unwrap_or_default()
        };
        let text = match kind {
            PortKind::Stream { elem, .. } => format!("hls::stream<{}>& {name}", self.type_text(elem)),
            PortKind::Streams { elem, count: c, .. } => {
                format!("hls::stream<{}> {name}{}", self.type_text(elem), count(c.as_ref()))
            }
            PortKind::Mmap { elem, .. } => format!("{}* {name}", self.type_text(elem)),
            PortKind::Mmaps { elem, count: c } => {
                format!("{}* {name}{}", self.type_text(elem), count(c.as_ref()))
            }
            PortKind::Buffer { config, .. } => {
                format!("{} {name}{}", self.type_text(&config.elem), self.dims_text(eval, config))
            }
            PortKind::Buffers { config, count: c, .. } => format!(
                "{} {name}{}{}",
                self.type_text(&config.elem),
                count(c.as_ref()),
                self.dims_text(eval, config)
            ),
            PortKind::Scalar => return None,
        };
        Some(text)
    }

    fn dims_text(&self, eval: &Evaluator<'v, 'a>, config: &BufferConfig) -> String {
        config
            .dims
            .iter()
            .map(|d| format!("[{}]", self.fold_text(eval, d)))
            .collect()
    }

    // ── Shared helpers ──

    /// Metadata entry for one parameter.
    fn port_entry(
        &mut self,
        eval: &Evaluator<'v, 'a>,
        param: &Param,
        kind: &PortKind,
        ops: Option<&BTreeSet<ChannelOp>>,
    ) -> Value {
        let mut port = Map::new();
        let name = param.name.as_ref().map_or("", |n| n.name.as_str());
        port.insert("name".into(), json!(name));
        port.insert("cat".into(), json!(kind.cat()));
        let ty = kind.elem().unwrap_or(&param.ty);
        port.insert("type".into(), json!(self.type_text(ty)));
        let width = self.width(eval, ty, param.span);
        port.insert("width".into(), json!(width));
        if let PortKind::Stream { depth: Some(d), .. } | PortKind::Streams { depth: Some(d), .. } = kind {
            port.insert("depth".into(), self.fold(eval, d));
        }
        if let Some(count) = kind.count() {
            port.insert("count".into(), self.fold(eval, count));
        }
        let dims: Vec<Value> = match kind.buffer_config() {
            Some(config) => config.dims.iter().map(|d| self.fold(eval, d)).collect(),
            None if matches!(kind, PortKind::Scalar) => {
                param.ty.array_dims.iter().map(|d| self.fold(eval, d)).collect()
            }
            None => Vec::new(),
        };
        if !dims.is_empty() {
            port.insert("dims".into(), Value::Array(dims));
        }
        if let Some(ops) = ops.filter(|o| !o.is_empty()) {
            port.insert("ops".into(), json!(ops));
        }
        Value::Object(port)
    }

    /// Interface pragmas for the current task's ports.
    fn interface_pragmas(
        &self,
        eval: &Evaluator<'v, 'a>,
        decl: &FunctionDecl,
        kinds: &[PortKind],
    ) -> Vec<String> {
        let is_top = self.ctx().is_top;
        let mut lines = Vec::new();
        for (param, kind) in decl.params.iter().zip(kinds) {
            let Some(name) = param.name.as_ref().map(|n| n.name.as_str()) else {
                continue;
            };
            match kind {
                PortKind::Mmap { .. } | PortKind::Mmaps { .. } if is_top => {
                    lines.push(format!("#pragma HLS interface m_axi port={name} offset=slave bundle=gmem_{name}"));
                    lines.push(format!("#pragma HLS interface s_axilite port={name} bundle=control"));
                }
                PortKind::Mmap { .. } | PortKind::Mmaps { .. } => {
                    lines.push(format!("#pragma HLS interface m_axi port={name} offset=direct bundle={name}"));
                }
                PortKind::Stream { .. } | PortKind::Streams { .. } if is_top => {
                    lines.push(format!("#pragma HLS interface axis port={name}"));
                }
                PortKind::Stream { .. } | PortKind::Streams { .. } => {
                    lines.push(format!("#pragma HLS interface ap_fifo port={name}"));
                }
                PortKind::Buffer { config, .. } | PortKind::Buffers { config, .. } => {
                    lines.push(format!("#pragma HLS interface bram port={name}"));
                    lines.push(format!(
                        "#pragma HLS bind_storage variable={name} type=ram_2p impl={}",
                        config.memcore.as_str().to_ascii_lowercase()
                    ));
                    for (dim, p) in config.partitions.iter().enumerate() {
                        if p.kind == PartitionKind::Normal {
                            continue;
                        }
                        let factor = p
                            .factor
                            .as_ref()
                            .map(|f| format!(" factor={}", self.fold_text(eval, f)))
                            .unwrap_or_default();
                        lines.push(format!(
                            "#pragma HLS array_partition variable={name} {}{factor} dim={}",
                            p.kind.as_str(),
                            dim + 1
                        ));
                    }
                }
                PortKind::Scalar if is_top => {
                    lines.push(format!("#pragma HLS interface s_axilite port={name} bundle=control"));
                }
                PortKind::Scalar => {
                    lines.push(format!("#pragma HLS interface ap_stable port={name}"));
                }
            }
        }
        if is_top {
            lines.push("#pragma HLS interface s_axilite port=return bundle=control".to_string());
        }
        lines
    }

    /// Bit width of `ty`, or 0 with a diagnostic when it does not fold.
    fn width(&mut self, eval: &Evaluator<'v, 'a>, ty: &TypeExpr, span: Span) -> u64 {
        match layout::width_of(eval, ty) {
            Ok(width) => width,
            Err(err) => {
                let task = self.ctx().name.clone();
                let ty_text = self.type_text(ty);
                warn!(task = %task, ty = %ty_text, %err, "width does not fold");
                let message = format!("cannot determine the width of `{ty_text}` in `{task}`: {err}");
                let diag = if self.config.strict_widths {
                    Diagnostic::error(codes::E0103, span, message)
                } else {
                    Diagnostic::warning(codes::W0101, span, message).with_hint("width 0 recorded")
                };
                self.diagnostics.push(diag);
                0
            }
        }
    }

    /// `n`, clamped to `MAX_UNROLL` with a warning.
    fn unroll_limit(&mut self, n: u64, what: &str, span: Span) -> u64 {
        if n <= MAX_UNROLL {
            return n;
        }
        let task = self.ctx().name.clone();
        warn!(task = %task, what, n, "expansion truncated");
        self.diagnostics.push(
            Diagnostic::warning(
                codes::W0105,
                span,
                format!("{n} {what} in `{task}` exceed the unroll limit of {MAX_UNROLL}"),
            )
            .with_hint(format!("only the first {MAX_UNROLL} are recorded")),
        );
        MAX_UNROLL
    }

    /// Folded value as a JSON number, or the source text when it does not fold.
    fn fold(&self, eval: &Evaluator<'v, 'a>, expr: &Expr) -> Value {
        match eval.eval(expr) {
            Ok(v) => json!(v),
            Err(_) => json!(self.text(expr.span)),
        }
    }

    fn fold_text(&self, eval: &Evaluator<'v, 'a>, expr: &Expr) -> String {
        match eval.eval(expr) {
            Ok(v) => v.to_string(),
            Err(_) => self.text(expr.span).to_string(),
        }
    }

    /// Spelling of `ty` without array dimensions.
    fn type_text(&self, ty: &TypeExpr) -> String {
        let mut out = String::new();
        if ty.is_const {
            out.push_str("const ");
        }
        out.push_str(self.text(ty.name.span));
        for ind in &ty.indirection {
            out.push_str(match ind {
                Indirection::Pointer => "*",
                Indirection::LRef => "&",
                Indirection::RRef => "&&",
            });
        }
        out
    }

    fn text(&self, span: Span) -> &'s str {
        self.source.get(span.start..span.end).unwrap_or_default()
    }

    fn ctx(&self) -> &TaskCtx {
        self.ctx
            .as_ref()
            .unwrap_or_else(|| panic!("internal: no task is being processed"))
    }

    fn meta(&mut self) -> &mut Metadata {
        let task = self.ctx().task;
        self.registry.metadata(task)
    }

    fn eval(&self) -> Evaluator<'v, 'a> {
        Evaluator::new(self.index).with_dependent(self.ctx().dependent.iter().map(String::as_str))
    }
}

/// Record `link` on the local channel `text` names; a whole array links
/// every element.
fn link_channel(
    fifos: &mut Map<String, Value>,
    buffers: &mut Map<String, Value>,
    channels: &HashMap<String, LocalChannel>,
    text: &str,
    side: &str,
    link: &Value,
) {
    let root = text.split('[').next().unwrap_or(text);
    let table = match channels.get(root) {
        Some(LocalChannel::Fifo) => fifos,
        Some(LocalChannel::Buffer) => buffers,
        None => return,
    };
    let prefix = format!("{text}[");
    for (key, entry) in table.iter_mut() {
        if key != text && !key.starts_with(&prefix) {
            continue;
        }
        if let Some(obj) = entry.as_object_mut() {
            obj.entry(side.to_string()).or_insert_with(|| link.clone());
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TranslationUnit;
    use crate::parser::parse;

    fn unit(src: &str) -> TranslationUnit {
        let result = parse(src);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.unit.expect("unit")
    }

    struct Run {
        meta: HashMap<String, Metadata>,
        code: HashMap<String, String>,
        diags: Vec<Diagnostic>,
    }

    fn run(src: &str, top: &str, config: VisitorConfig) -> Run {
        let u = unit(src);
        let index = ProgramIndex::build(&u, &[]);
        let root = index
            .funcs()
            .find(|f| f.short_name() == top && f.has_body())
            .map(|f| f.id)
            .expect("root");
        let tasks = graph::all_reachable(&index, root);
        let mut registry = TaskRegistry::new(src, &index);
        let diags = Visitor::new(&index, src, &mut registry, root, &tasks, config)
            .run()
            .expect("rewrite");
        let mut meta = HashMap::new();
        let mut code = HashMap::new();
        for (_, rec) in registry.iter() {
            meta.insert(rec.name.clone(), rec.metadata.clone());
            code.insert(rec.name.clone(), rec.rewriter.rewritten_text());
        }
        Run { meta, code, diags }
    }

    const VADD: &str = r#"
void Load(tapa::mmap<const float> src, tapa::ostream<float>& out, int n) {
  for (int i = 0; i < n; ++i) out.write(src[i]);
}
void Add(tapa::istream<float>& a, tapa::istream<float>& b, tapa::ostream<float>& c, int n) {
  for (int i = 0; i < n; ++i) {
#pragma HLS pipeline II=1
    c.write(a.read() + b.read());
  }
}
void Store(tapa::istream<float>& in, tapa::mmap<float> dst, int n) {
  for (int i = 0; i < n; ++i) dst[i] = in.read();
}
void VecAdd(tapa::mmap<const float> a, tapa::mmap<const float> b, tapa::mmap<float> c, int n) {
  tapa::stream<float> qa("qa");
  tapa::stream<float, 8> qb("qb");
  tapa::stream<float> qc("qc");
  tapa::task()
      .invoke(Load, a, qa, n)
      .invoke(Load, b, qb, n)
      .invoke(Add, qa, qb, qc, n)
      .invoke(Store, qc, c, n);
}
"#;

    #[test]
    fn upper_task_records_instances_and_fifos() {
        let r = run(VADD, "VecAdd", VisitorConfig::default());
        let top = &r.meta["VecAdd"];
        assert_eq!(top["level"], json!("upper"));
        assert_eq!(top["target"], json!("xilinx-hls"));
        assert_eq!(top["tasks"]["Load"].as_array().map(Vec::len), Some(2));
        assert_eq!(top["tasks"]["Load"][1]["args"]["out"], json!({ "cat": "ostream", "arg": "qb" }));
        assert_eq!(top["tasks"]["Add"][0]["step"], json!(0));
        assert_eq!(
            top["fifos"]["qa"],
            json!({
                "depth": 2,
                "width": 32,
                "type": "float",
                "produced_by": ["Load", 0],
                "consumed_by": ["Add", 0],
            })
        );
        assert_eq!(top["fifos"]["qb"]["depth"], json!(8));
        assert_eq!(top["fifos"]["qb"]["produced_by"], json!(["Load", 1]));
        assert_eq!(top["fifos"]["qc"]["consumed_by"], json!(["Store", 0]));
        assert!(r.diags.is_empty(), "{:?}", r.diags);
    }

    #[test]
    fn lower_tasks_record_ports_and_pragmas() {
        let r = run(VADD, "VecAdd", VisitorConfig::default());
        let add = &r.meta["Add"];
        assert_eq!(add["level"], json!("lower"));
        assert_eq!(
            add["ports"][0],
            json!({ "name": "a", "cat": "istream", "type": "float", "width": 32, "ops": ["read"] })
        );
        assert_eq!(add["ports"][3]["cat"], json!("scalar"));
        assert_eq!(add["ports"][3]["width"], json!(32));
        assert_eq!(add["pragmas"], json!(["#pragma HLS pipeline II=1"]));
        let load = &r.meta["Load"];
        assert_eq!(load["ports"][0]["cat"], json!("mmap"));
        assert_eq!(load["ports"][0]["type"], json!("const float"));
    }

    #[test]
    fn lower_signature_is_rewritten_for_hls() {
        let r = run(VADD, "VecAdd", VisitorConfig::default());
        let add = &r.code["Add"];
        assert!(add.starts_with(
            "void Add(hls::stream<float>& a, hls::stream<float>& b, hls::stream<float>& c, int n) {"
        ));
        assert!(add.contains("#pragma HLS interface ap_fifo port=a"));
        assert!(add.contains("#pragma HLS interface ap_stable port=n"));
        let store = &r.code["Store"];
        assert!(store.contains("float* dst"));
        assert!(store.contains("#pragma HLS interface m_axi port=dst offset=direct bundle=dst"));
    }

    #[test]
    fn upper_body_becomes_composition_block() {
        let r = run(VADD, "VecAdd", VisitorConfig::default());
        let top = &r.code["VecAdd"];
        assert!(top.contains("#pragma HLS interface m_axi port=a offset=slave bundle=gmem_a"));
        assert!(top.contains("#pragma HLS interface s_axilite port=return bundle=control"));
        assert!(top.contains("// invoke Load[1] step=0: (b, qb, n)"));
        assert!(!top.contains("tapa::task()"));
    }

    #[test]
    fn generic_target_keeps_code() {
        let config = VisitorConfig {
            target: Target::Generic,
            strict_widths: false,
        };
        let r = run(VADD, "VecAdd", config);
        assert_eq!(r.meta["Add"]["vendor"], json!("none"));
        let start = VADD.find("void Add").unwrap();
        assert!(VADD[start..].starts_with(r.code["Add"].as_str()));
    }

    #[test]
    fn stream_arrays_bind_elements_in_order() {
        let src = r#"
void Worker(tapa::istream<int>& in, tapa::ostream<int>& out) {}
void Top(tapa::istreams<int, 2>& ins, tapa::ostreams<int, 2>& outs) {
  tapa::streams<int, 2> mid("mid");
  tapa::task()
      .invoke<tapa::join, 2>(Worker, ins, mid)
      .invoke<tapa::detach, 2>(Worker, mid, outs);
}
"#;
        let r = run(src, "Top", VisitorConfig::default());
        let top = &r.meta["Top"];
        let workers = top["tasks"]["Worker"].as_array().expect("instances");
        assert_eq!(workers.len(), 4);
        assert_eq!(workers[0]["args"]["in"]["arg"], json!("ins[0]"));
        assert_eq!(workers[1]["args"]["out"]["arg"], json!("mid[1]"));
        assert_eq!(workers[2]["args"]["in"]["arg"], json!("mid[0]"));
        assert_eq!(workers[3]["step"], json!(-1));
        assert_eq!(top["fifos"]["mid[1]"]["produced_by"], json!(["Worker", 1]));
        assert_eq!(top["fifos"]["mid[1]"]["consumed_by"], json!(["Worker", 3]));
        assert_eq!(top["ports"][0]["count"], json!(2));
    }

    #[test]
    fn template_instances_keep_their_arguments() {
        let src = r#"
template <int N> void Scale(tapa::istream<ap_uint<N>>& in, tapa::ostream<ap_uint<N>>& out) {}
void Top(tapa::istream<ap_uint<4>>& a, tapa::ostream<ap_uint<4>>& b) {
  tapa::stream<ap_uint<4>> q("q");
  tapa::task().invoke(Scale<4>, a, q).invoke(Scale<4>, q, b);
}
"#;
        let r = run(src, "Top", VisitorConfig::default());
        let scale = &r.meta["Top"]["tasks"]["Scale"];
        assert_eq!(scale[0]["template_args"], json!([4]));
        assert_eq!(r.meta["Top"]["fifos"]["q"]["width"], json!(4));
        // Port widths of the primary template depend on N.
        assert_eq!(r.meta["Scale"]["ports"][0]["width"], json!(0));
        assert!(r.diags.iter().all(|d| d.code == Some(codes::W0101)));
        assert!(!r.diags.is_empty());
    }

    #[test]
    fn strict_widths_turn_fold_failures_into_errors() {
        let src = "void Top(tapa::istream<mystery_t>& in) { in.read(); }";
        let config = VisitorConfig {
            strict_widths: true,
            ..VisitorConfig::default()
        };
        let r = run(src, "Top", config);
        assert_eq!(r.diags.len(), 1);
        assert!(r.diags[0].is_error());
        assert_eq!(r.diags[0].code, Some(codes::E0103));
        assert_eq!(r.meta["Top"]["ports"][0]["width"], json!(0));
    }

    #[test]
    fn buffers_record_configuration() {
        let src = r#"
void Prod(tapa::obuffer<float[64], 2, tapa::array_partition<tapa::cyclic<4>>, tapa::memcore<tapa::uram>>& b) {
  auto section = b.acquire();
}
void Cons(tapa::ibuffer<float[64], 2, tapa::array_partition<tapa::cyclic<4>>, tapa::memcore<tapa::uram>>& b) {
  auto section = b.acquire();
}
void Top() {
  tapa::buffer<float[64], 2, tapa::array_partition<tapa::cyclic<4>>, tapa::memcore<tapa::uram>> buf;
  tapa::task().invoke(Prod, buf).invoke(Cons, buf);
}
"#;
        let r = run(src, "Top", VisitorConfig::default());
        assert_eq!(
            r.meta["Top"]["buffers"]["buf"],
            json!({
                "width": 32,
                "type": "float",
                "dims": [64],
                "n_sections": 2,
                "partitions": [{ "type": "cyclic", "factor": 4 }],
                "memcore_type": "URAM",
                "produced_by": ["Prod", 0],
                "consumed_by": ["Cons", 0],
            })
        );
        assert_eq!(r.meta["Prod"]["ports"][0]["dims"], json!([64]));
        assert_eq!(r.meta["Prod"]["ports"][0]["ops"], json!(["acquire"]));
        assert!(r.code["Cons"].contains("float b[64]"));
        assert!(r.code["Cons"].contains("#pragma HLS bind_storage variable=b type=ram_2p impl=uram"));
    }

    #[test]
    fn direction_mismatch_is_reported() {
        let src = "void Top(tapa::istream<int>& in) { in.write(1); }";
        let r = run(src, "Top", VisitorConfig::default());
        assert!(r.diags.iter().any(|d| d.code == Some(codes::W0104)));
    }

    #[test]
    fn unreachable_marker_is_reported() {
        let src = "void Leaf(int x) {}\n\
                   void Stray(int x) { tapa::task().invoke(Leaf, x); }\n\
                   void Top(int x) { tapa::task().invoke(Leaf, x); }";
        let r = run(src, "Top", VisitorConfig::default());
        assert!(!r.meta.contains_key("Stray"));
        let stray: Vec<_> = r.diags.iter().filter(|d| d.code == Some(codes::W0103)).collect();
        assert_eq!(stray.len(), 1);
    }

    #[test]
    fn recursive_tasks_are_flagged() {
        let src = "void Top(int x) { tapa::task().invoke(Top, x); }";
        let r = run(src, "Top", VisitorConfig::default());
        assert_eq!(r.meta["Top"]["recursive"], json!(true));
        assert!(r.diags.iter().any(|d| d.code == Some(codes::W0102)));
    }

    #[test]
    fn empty_marker_is_a_lower_task() {
        let src = "void Top(int x) { tapa::task(); }";
        let r = run(src, "Top", VisitorConfig::default());
        assert_eq!(r.meta["Top"]["level"], json!("lower"));
        assert!(r.meta["Top"].get("tasks").is_none());
    }

    #[test]
    fn huge_repeat_counts_are_clamped() {
        let src = "void Leaf(int x) {}\n\
                   void Top(int x) {\n\
                     tapa::streams<int, 1073741824> qs(\"qs\");\n\
                     tapa::task().invoke<tapa::join, 1000000000>(Leaf, x);\n\
                   }";
        let r = run(src, "Top", VisitorConfig::default());
        let leaves = r.meta["Top"]["tasks"]["Leaf"].as_array().expect("instances");
        assert_eq!(leaves.len() as u64, MAX_UNROLL);
        let fifos = r.meta["Top"]["fifos"].as_object().expect("fifos");
        assert_eq!(fifos.len() as u64, MAX_UNROLL);
        assert!(fifos.contains_key("qs[4095]"));
        let clamped = r.diags.iter().filter(|d| d.code == Some(codes::W0105)).count();
        assert_eq!(clamped, 2);
    }

    #[test]
    fn target_names_parse() {
        assert_eq!("generic".parse::<Target>(), Ok(Target::Generic));
        assert_eq!("xilinx-hls".parse::<Target>(), Ok(Target::XilinxHls));
        assert!("intel".parse::<Target>().is_err());
    }
}
