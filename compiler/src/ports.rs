// ports.rs — Channel shape classification
//
// Maps a parameter or local variable type onto the closed set of channel
// shapes a task can be connected through: streams, memory-mapped ports,
// shared buffers (and their array forms), or plain scalars. Aliases are
// desugared through the program index before classification, so
// `using ibuf_t = tapa::ibuffer<...>;` classifies like the type it names.
//
// Preconditions: `ty` was parsed from the same unit `index` was built from.
// Postconditions: every type has exactly one shape; unrecognized types are
//                 `Scalar`.
// Failure modes: none. Template arguments are kept unevaluated.
// Side effects: none.

use std::fmt;

use crate::ast::*;
use crate::resolve::ProgramIndex;

/// Alias chains longer than this are treated as opaque.
const MAX_ALIAS_DEPTH: usize = 16;

// ── Shapes ──────────────────────────────────────────────────────────────────

/// Data direction of a channel, from the task's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    /// Declared inside an upper-level task and connected between children.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Normal,
    Complete,
    Cyclic,
    Block,
}

impl PartitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionKind::Normal => "normal",
            PartitionKind::Complete => "complete",
            PartitionKind::Cyclic => "cyclic",
            PartitionKind::Block => "block",
        }
    }
}

/// Partitioning of one buffer dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub kind: PartitionKind,
    /// Factor of `cyclic<k>` / `block<k>`.
    pub factor: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemCore {
    #[default]
    Bram,
    Uram,
}

impl MemCore {
    pub fn as_str(self) -> &'static str {
        match self {
            MemCore::Bram => "BRAM",
            MemCore::Uram => "URAM",
        }
    }
}

/// Static configuration of a shared buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Word type, without the array dimensions.
    pub elem: TypeExpr,
    pub dims: Vec<Expr>,
    pub n_sections: Option<Expr>,
    /// One entry per dimension, padded with `normal`.
    pub partitions: Vec<Partition>,
    pub memcore: MemCore,
}

/// Channel shape of a parameter or local.
#[derive(Debug, Clone, PartialEq)]
pub enum PortKind {
    Stream {
        dir: Direction,
        elem: TypeExpr,
        depth: Option<Expr>,
    },
    Streams {
        dir: Direction,
        elem: TypeExpr,
        count: Option<Expr>,
        depth: Option<Expr>,
    },
    Mmap {
        elem: TypeExpr,
        is_async: bool,
    },
    Mmaps {
        elem: TypeExpr,
        count: Option<Expr>,
    },
    Buffer {
        dir: Direction,
        config: BufferConfig,
    },
    Buffers {
        dir: Direction,
        count: Option<Expr>,
        config: BufferConfig,
    },
    Scalar,
}

impl PortKind {
    /// Category name recorded in metadata.
    pub fn cat(&self) -> &'static str {
        use Direction::*;
        match self {
            PortKind::Stream { dir: In, .. } => "istream",
            PortKind::Stream { dir: Out, .. } => "ostream",
            PortKind::Stream { dir: Local, .. } => "stream",
            PortKind::Streams { dir: In, .. } => "istreams",
            PortKind::Streams { dir: Out, .. } => "ostreams",
            PortKind::Streams { dir: Local, .. } => "streams",
            PortKind::Mmap { is_async: true, .. } => "async_mmap",
            PortKind::Mmap { .. } => "mmap",
            PortKind::Mmaps { .. } => "mmaps",
            PortKind::Buffer { dir: In, .. } => "ibuffer",
            PortKind::Buffer { dir: Out, .. } => "obuffer",
            PortKind::Buffer { dir: Local, .. } => "buffer",
            PortKind::Buffers { dir: In, .. } => "ibuffers",
            PortKind::Buffers { dir: Out, .. } => "obuffers",
            PortKind::Buffers { dir: Local, .. } => "buffers",
            PortKind::Scalar => "scalar",
        }
    }

    /// Direction for streams and buffers; `None` for memory and scalars.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            PortKind::Stream { dir, .. }
            | PortKind::Streams { dir, .. }
            | PortKind::Buffer { dir, .. }
            | PortKind::Buffers { dir, .. } => Some(*dir),
            _ => None,
        }
    }

    /// Type of one word moved through the channel.
    pub fn elem(&self) -> Option<&TypeExpr> {
        match self {
            PortKind::Stream { elem, .. }
            | PortKind::Streams { elem, .. }
            | PortKind::Mmap { elem, .. }
            | PortKind::Mmaps { elem, .. } => Some(elem),
            PortKind::Buffer { config, .. } | PortKind::Buffers { config, .. } => {
                Some(&config.elem)
            }
            PortKind::Scalar => None,
        }
    }

    /// Number of channels for array forms.
    pub fn count(&self) -> Option<&Expr> {
        match self {
            PortKind::Streams { count, .. }
            | PortKind::Mmaps { count, .. }
            | PortKind::Buffers { count, .. } => count.as_ref(),
            _ => None,
        }
    }

    pub fn buffer_config(&self) -> Option<&BufferConfig> {
        match self {
            PortKind::Buffer { config, .. } | PortKind::Buffers { config, .. } => Some(config),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            PortKind::Streams { .. } | PortKind::Mmaps { .. } | PortKind::Buffers { .. }
        )
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, PortKind::Stream { .. } | PortKind::Streams { .. })
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cat())
    }
}

// ── Classification ──────────────────────────────────────────────────────────

/// Classify `ty`, desugaring non-template aliases first.
pub fn classify(index: &ProgramIndex<'_>, ty: &TypeExpr) -> PortKind {
    let mut cur = ty;
    for _ in 0..MAX_ALIAS_DEPTH {
        if let Some(kind) = classify_direct(cur) {
            return kind;
        }
        match alias_target(index, cur) {
            Some(next) => cur = next,
            None => break,
        }
    }
    PortKind::Scalar
}

fn alias_target<'a>(index: &ProgramIndex<'a>, ty: &TypeExpr) -> Option<&'a TypeExpr> {
    if ty.name.last().template_args.is_some() {
        return None;
    }
    let alias = index.alias(&ty.name.path())?;
    match alias.target {
        AliasTarget::Type(target) if alias.params.is_empty() => Some(target),
        _ => None,
    }
}

/// Shape of `ty` from its own spelling, or `None` if it is not a
/// channel type.
fn classify_direct(ty: &TypeExpr) -> Option<PortKind> {
    let segments = &ty.name.segments;
    let in_tapa = match segments.len() {
        1 => true,
        2 => segments[0].name == "tapa",
        _ => false,
    };
    if !in_tapa {
        return None;
    }
    let args = ty.template_args();
    let arg_type = |i: usize| match args.get(i) {
        Some(TemplateArg::Type(t)) => Some(t.clone()),
        _ => None,
    };
    let arg_expr = |i: usize| args.get(i).and_then(TemplateArg::as_expr);

    let kind = match ty.name.last().name.as_str() {
        name @ ("istream" | "ostream" | "stream") => PortKind::Stream {
            dir: direction(name),
            elem: arg_type(0)?,
            depth: arg_expr(1),
        },
        name @ ("istreams" | "ostreams" | "streams") => PortKind::Streams {
            dir: direction(name),
            elem: arg_type(0)?,
            count: arg_expr(1),
            depth: arg_expr(2),
        },
        "mmap" => PortKind::Mmap {
            elem: arg_type(0)?,
            is_async: false,
        },
        "async_mmap" => PortKind::Mmap {
            elem: arg_type(0)?,
            is_async: true,
        },
        "mmaps" => PortKind::Mmaps {
            elem: arg_type(0)?,
            count: arg_expr(1),
        },
        name @ ("ibuffer" | "obuffer" | "buffer") => PortKind::Buffer {
            dir: direction(name),
            config: buffer_config(args, 1)?,
        },
        name @ ("ibuffers" | "obuffers" | "buffers") => PortKind::Buffers {
            dir: direction(name),
            count: arg_expr(1),
            config: buffer_config(args, 2)?,
        },
        _ => return None,
    };
    Some(kind)
}

fn direction(name: &str) -> Direction {
    match name.as_bytes().first() {
        Some(b'i') => Direction::In,
        Some(b'o') => Direction::Out,
        _ => Direction::Local,
    }
}

/// `<T[dims], [count,] n_sections, array_partition<...>, memcore<...>>`,
/// with `sections_at` the position of `n_sections`.
fn buffer_config(args: &[TemplateArg], sections_at: usize) -> Option<BufferConfig> {
    let TemplateArg::Type(word) = args.first()? else {
        return None;
    };
    let mut elem = word.clone();
    let dims = std::mem::take(&mut elem.array_dims);
    let n_sections = args.get(sections_at).and_then(TemplateArg::as_expr);

    let mut partitions = Vec::new();
    let mut memcore = MemCore::default();
    for arg in args.iter().skip(sections_at + 1) {
        let TemplateArg::Type(t) = arg else { continue };
        match t.name.last().name.as_str() {
            "array_partition" => {
                partitions = t.template_args().iter().filter_map(partition).collect();
            }
            "memcore" => {
                memcore = match t.template_args().first() {
                    Some(TemplateArg::Type(core)) if core.name.last().name == "uram" => {
                        MemCore::Uram
                    }
                    _ => MemCore::Bram,
                };
            }
            _ => {}
        }
    }
    while partitions.len() < dims.len() {
        partitions.push(Partition {
            kind: PartitionKind::Normal,
            factor: None,
        });
    }
    Some(BufferConfig {
        elem,
        dims,
        n_sections,
        partitions,
        memcore,
    })
}

fn partition(arg: &TemplateArg) -> Option<Partition> {
    let TemplateArg::Type(t) = arg else {
        return None;
    };
    let kind = match t.name.last().name.as_str() {
        "normal" => PartitionKind::Normal,
        "complete" => PartitionKind::Complete,
        "cyclic" => PartitionKind::Cyclic,
        "block" => PartitionKind::Block,
        _ => return None,
    };
    Some(Partition {
        kind,
        factor: t.template_args().first().and_then(TemplateArg::as_expr),
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Classify every parameter of the last function in `src`.
    fn kinds(src: &str) -> Vec<PortKind> {
        let result = parse(src);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        let unit = result.unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let Some(Item {
            kind: ItemKind::Function(f),
            ..
        }) = unit.items.last()
        else {
            panic!("expected function last")
        };
        f.params.iter().map(|p| classify(&index, &p.ty)).collect()
    }

    fn cats(src: &str) -> Vec<&'static str> {
        kinds(src).iter().map(PortKind::cat).collect()
    }

    #[test]
    fn stream_and_mmap_categories() {
        assert_eq!(
            cats(
                "void f(tapa::istream<float>& a, tapa::ostream<float>& b, \
                 tapa::mmap<int> m, tapa::async_mmap<int> am, int n);"
            ),
            vec!["istream", "ostream", "mmap", "async_mmap", "scalar"]
        );
    }

    #[test]
    fn array_forms_keep_counts() {
        let ks = kinds("void f(tapa::istreams<float, 4>& a, tapa::mmaps<int, 2> m);");
        assert_eq!(ks[0].cat(), "istreams");
        assert!(matches!(ks[0].count().map(|e| &e.kind), Some(ExprKind::Int(4))));
        assert_eq!(ks[1].cat(), "mmaps");
        assert!(ks.iter().all(PortKind::is_array));
    }

    #[test]
    fn unqualified_names_under_using_namespace() {
        assert_eq!(
            cats("using namespace tapa;\nvoid f(istream<float>& a, mmap<float> m);"),
            vec!["istream", "mmap"]
        );
    }

    #[test]
    fn foreign_namespaces_are_scalars() {
        assert_eq!(
            cats("void f(hls::stream<float>& a, std::vector<int> v);"),
            vec!["scalar", "scalar"]
        );
    }

    #[test]
    fn local_stream_depth() {
        let ks = kinds("void f(tapa::stream<float, 8> q, tapa::streams<int, 3, 16> qs);");
        assert_eq!(ks[0].direction(), Some(Direction::Local));
        let PortKind::Stream { depth, .. } = &ks[0] else {
            panic!("expected stream")
        };
        assert!(matches!(depth.as_ref().map(|e| &e.kind), Some(ExprKind::Int(8))));
        let PortKind::Streams { count, depth, .. } = &ks[1] else {
            panic!("expected streams")
        };
        assert!(matches!(count.as_ref().map(|e| &e.kind), Some(ExprKind::Int(3))));
        assert!(matches!(depth.as_ref().map(|e| &e.kind), Some(ExprKind::Int(16))));
    }

    #[test]
    fn buffer_config_is_extracted() {
        let ks = kinds(
            "void f(tapa::ibuffer<float[64][8], 2, tapa::array_partition<tapa::cyclic<4>>, \
             tapa::memcore<tapa::uram>>& b);",
        );
        let PortKind::Buffer { dir, config } = &ks[0] else {
            panic!("expected buffer")
        };
        assert_eq!(*dir, Direction::In);
        assert_eq!(config.elem.name.path(), "float");
        assert!(config.elem.array_dims.is_empty());
        assert_eq!(config.dims.len(), 2);
        assert!(matches!(
            config.n_sections.as_ref().map(|e| &e.kind),
            Some(ExprKind::Int(2))
        ));
        let parts: Vec<_> = config.partitions.iter().map(|p| p.kind).collect();
        assert_eq!(parts, vec![PartitionKind::Cyclic, PartitionKind::Normal]);
        assert!(config.partitions[0].factor.is_some());
        assert_eq!(config.memcore.as_str(), "URAM");
    }

    #[test]
    fn buffer_defaults() {
        let ks = kinds("void f(tapa::obuffer<int[16]>& b);");
        let config = ks[0].buffer_config().expect("buffer");
        assert_eq!(ks[0].cat(), "obuffer");
        assert!(config.n_sections.is_none());
        assert_eq!(config.partitions.len(), 1);
        assert_eq!(config.partitions[0].kind, PartitionKind::Normal);
        assert_eq!(config.memcore, MemCore::Bram);
    }

    #[test]
    fn buffer_arrays_skip_the_count() {
        let ks = kinds(
            "void f(tapa::ibuffers<int[32], 4, 1, tapa::array_partition<tapa::complete>>& b);",
        );
        assert_eq!(ks[0].cat(), "ibuffers");
        assert!(matches!(ks[0].count().map(|e| &e.kind), Some(ExprKind::Int(4))));
        let config = ks[0].buffer_config().expect("buffer");
        assert!(matches!(
            config.n_sections.as_ref().map(|e| &e.kind),
            Some(ExprKind::Int(1))
        ));
        assert_eq!(config.partitions[0].kind, PartitionKind::Complete);
    }

    #[test]
    fn aliases_are_desugared() {
        assert_eq!(
            cats(
                "using word_t = float;\n\
                 using in_t = tapa::istream<word_t>;\n\
                 typedef in_t in2_t;\n\
                 void f(in2_t& a, word_t w);"
            ),
            vec!["istream", "scalar"]
        );
    }
}
