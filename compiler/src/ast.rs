// AST node types for annotated C++ task sources.
//
// Covers the C++ subset task kernels are written in: functions (optionally
// templated), records, aliases, enums, globals and the statements and
// expressions found in task bodies. Every node carries a `SimpleSpan` so the
// rewriter can address the original text.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span covering `a` through `b`.
pub fn join(a: Span, b: Span) -> Span {
    Span::from(a.start..b.end)
}

// ── Root ──

/// A complete translation unit: a sequence of top-level items.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    pub items: Vec<Item>,
    pub span: Span,
}

// ── Items ──

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// A whole preprocessor line, e.g. `#define N 64`.
    Directive(String),
    Namespace(NamespaceDecl),
    Function(FunctionDecl),
    Record(RecordDecl),
    Alias(AliasDecl),
    Enum(EnumDecl),
    Var(VarDecl),
    /// `using namespace x;`
    UsingNamespace(QualName),
    /// Stray `;`.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceDecl {
    pub name: Option<Ident>,
    pub items: Vec<Item>,
}

/// `template <...>` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateParam {
    /// `typename T` / `class T`, with optional default type.
    Type {
        name: Ident,
        default: Option<TypeExpr>,
    },
    /// `int N`, with optional default value.
    Value {
        ty: TypeExpr,
        name: Ident,
        default: Option<Expr>,
    },
}

impl TemplateParam {
    pub fn name(&self) -> &str {
        match self {
            TemplateParam::Type { name, .. } | TemplateParam::Value { name, .. } => &name.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Declared name, possibly qualified for out-of-line definitions.
    pub name: QualName,
    pub template_params: Option<Vec<TemplateParam>>,
    pub ret: TypeExpr,
    pub params: Vec<Param>,
    pub body: Option<Block>,
    pub span: Span,
}

impl FunctionDecl {
    pub fn is_template(&self) -> bool {
        self.template_params.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeExpr,
    pub name: Option<Ident>,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Class,
    Union,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDecl {
    pub kind: RecordKind,
    pub name: Option<Ident>,
    pub template_params: Option<Vec<TemplateParam>>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Type(TypeExpr),
    /// Inline record definition, e.g. `union { ... } u;` or an anonymous union.
    Record(Box<RecordDecl>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub ty: FieldType,
    /// `None` for anonymous nested records.
    pub name: Option<Ident>,
    pub array_dims: Vec<Expr>,
    pub bit_width: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AliasTarget {
    Type(TypeExpr),
    Record(Box<RecordDecl>),
}

/// `using name = T;`, `typedef T name;` or `template <...> using name = T;`.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDecl {
    pub name: Ident,
    pub template_params: Option<Vec<TemplateParam>>,
    pub target: AliasTarget,
    pub array_dims: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Option<Ident>,
    pub variants: Vec<(Ident, Option<Expr>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub is_const: bool,
    pub ty: TypeExpr,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: Ident,
    /// Pointer/reference operators attached to this declarator (`int *p`).
    pub indirection: Vec<Indirection>,
    pub array_dims: Vec<Expr>,
    pub init: Option<Init>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    /// `= expr`
    Assign(Expr),
    /// `name(args)`
    Ctor(Vec<Expr>),
    /// `name{args}` or `= {args}`
    Brace(Vec<Expr>),
}

// ── Types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirection {
    Pointer,
    LRef,
    RRef,
}

/// A type as written: `const tapa::istream<float>&`, `unsigned int`,
/// `data_t[N]` (array dimensions only appear in template arguments).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: QualName,
    pub is_const: bool,
    pub indirection: Vec<Indirection>,
    pub array_dims: Vec<Expr>,
    pub span: Span,
}

impl TypeExpr {
    pub fn is_reference(&self) -> bool {
        self.indirection
            .iter()
            .any(|i| matches!(i, Indirection::LRef | Indirection::RRef))
    }

    pub fn is_pointer(&self) -> bool {
        self.indirection.contains(&Indirection::Pointer)
    }

    /// Template arguments of the last name segment.
    pub fn template_args(&self) -> &[TemplateArg] {
        self.name.last().template_args.as_deref().unwrap_or(&[])
    }
}

/// `a::b<c>::d`
#[derive(Debug, Clone, PartialEq)]
pub struct QualName {
    /// Leading `::`.
    pub global: bool,
    pub segments: Vec<NameSegment>,
    pub span: Span,
}

impl QualName {
    pub fn last(&self) -> &NameSegment {
        // The parser never produces an empty path.
        &self.segments[self.segments.len() - 1]
    }

    /// Path without template arguments, e.g. `tapa::istream`.
    pub fn path(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("::")
    }

    pub fn is_single(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].template_args.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameSegment {
    pub name: String,
    pub template_args: Option<Vec<TemplateArg>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArg {
    Type(TypeExpr),
    Expr(Expr),
}

impl TemplateArg {
    /// View a type-shaped argument as an expression when it is a bare name.
    ///
    /// `ap_uint<W>` parses `W` as a type; the evaluator still needs it as a
    /// name reference.
    pub fn as_expr(&self) -> Option<Expr> {
        match self {
            TemplateArg::Expr(e) => Some(e.clone()),
            TemplateArg::Type(ty)
                if ty.indirection.is_empty() && ty.array_dims.is_empty() && !ty.is_const =>
            {
                Some(Expr {
                    kind: ExprKind::Name(ty.name.clone()),
                    span: ty.span,
                })
            }
            TemplateArg::Type(_) => None,
        }
    }
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Compound(Block),
    Decl(VarDecl),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    RangeFor {
        var_ty: TypeExpr,
        var: Ident,
        range: Expr,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
    },
    Case(Expr),
    DefaultLabel,
    Label {
        name: Ident,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    /// `#pragma ...` inside a body.
    Directive(String),
    Empty,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    Char(char),
    Name(QualName),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `recv.method<targs>(args)` / `recv->method(args)`.
    MethodCall {
        receiver: Box<Expr>,
        arrow: bool,
        method: NameSegment,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        arrow: bool,
        field: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lhs = rhs` (`op == None`) or compound `lhs op= rhs`.
    Assign {
        op: Option<BinOp>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: TypeExpr,
        expr: Box<Expr>,
    },
    SizeofType(TypeExpr),
    SizeofExpr(Box<Expr>),
    InitList(Vec<Expr>),
    Paren(Box<Expr>),
}

impl Expr {
    /// Strip redundant parentheses.
    pub fn peel(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.peel(),
            _ => self,
        }
    }

    /// The qualified name this expression refers to, if it is a plain name.
    pub fn as_name(&self) -> Option<&QualName> {
        match &self.peel().kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// The root variable of an lvalue-ish expression: `a`, `a[i]`, `a.b`, `*a`.
    pub fn root_name(&self) -> Option<&str> {
        match &self.peel().kind {
            ExprKind::Name(name) if name.segments.len() == 1 => Some(&name.segments[0].name),
            ExprKind::Index { base, .. } | ExprKind::Member { base, .. } => base.root_name(),
            ExprKind::Unary {
                op: UnaryOp::Deref | UnaryOp::AddrOf,
                operand,
            } => operand.root_name(),
            _ => None,
        }
    }
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
