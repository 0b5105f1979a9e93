// Program index: symbol tables over a parsed translation unit
//
// Walks the parsed AST once and builds lookup tables for everything later
// phases ask the host front end about: function declarations (with their
// definitions and template identity), records, type aliases, and
// compile-time constants (object-like `#define`s, `const`/`constexpr`
// globals, enumerators, command-line overrides).
//
// Preconditions: `unit` is the AST produced by the parser.
// Postconditions: every function declaration has a `FuncId`, allocated in
//                 source order; later declarations of a name shadow nothing.
// Failure modes: none. Unparseable macro bodies are skipped (not constants).
// Side effects: none.

use std::collections::HashMap;
use std::str::FromStr;

use crate::ast::*;
use crate::id::{FuncId, IdAllocator};

// ── Public types ────────────────────────────────────────────────────────────

/// One function declaration.
#[derive(Debug)]
pub struct FuncEntry<'a> {
    pub id: FuncId,
    /// Fully qualified path, e.g. `kernels::Load`.
    pub name: String,
    pub decl: &'a FunctionDecl,
}

impl<'a> FuncEntry<'a> {
    pub fn has_body(&self) -> bool {
        self.decl.body.is_some()
    }

    /// Last path segment, the name used in metadata and reports.
    pub fn short_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }

    /// Whether this declaration is a primary template or plain function
    /// (not an explicit specialization like `Foo<4>`).
    pub fn is_primary(&self) -> bool {
        self.decl.name.last().template_args.is_none()
    }

    /// Whether a call with `argc` arguments can bind to this declaration.
    pub fn accepts(&self, argc: usize) -> bool {
        let total = self.decl.params.len();
        let required = self
            .decl
            .params
            .iter()
            .filter(|p| p.default.is_none())
            .count();
        (required..=total).contains(&argc)
    }
}

/// A type alias: `typedef`, `using`, or alias template.
#[derive(Debug)]
pub struct AliasEntry<'a> {
    pub name: String,
    pub params: Vec<&'a TemplateParam>,
    pub target: &'a AliasTarget,
    pub array_dims: &'a [Expr],
}

/// A named compile-time constant.
#[derive(Debug)]
pub enum ConstDef<'a> {
    /// `const int N = expr;`, `constexpr`, or `enum { A = expr }`.
    Expr(&'a Expr),
    /// Macro body or `-D` value, parsed separately from the unit.
    Owned(Expr),
    /// Enumerator without an initializer: `base + offset`, where `base` is
    /// the last explicit enumerator value in the same enum.
    Enumerator { base: Option<&'a Expr>, offset: i64 },
}

/// A `-D NAME=VALUE` override.
#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub value: Expr,
}

/// A `-D` argument that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefineError {
    #[error("expected NAME or NAME=VALUE, got '{0}'")]
    Malformed(String),
    #[error("value of '{name}' is not an expression: '{value}'")]
    BadValue { name: String, value: String },
}

impl FromStr for Define {
    type Err = DefineError;

    /// `NAME=VALUE`, or bare `NAME` (value 1, as a preprocessor would).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s.split_once('=').unwrap_or((s, "1"));
        let name = name.trim();
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(DefineError::Malformed(s.to_string()));
        }
        let parsed = crate::parser::parse_expr(value);
        match parsed.expr {
            Some(expr) if parsed.errors.is_empty() => Ok(Define {
                name: name.to_string(),
                value: expr,
            }),
            _ => Err(DefineError::BadValue {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// Symbol tables for one translation unit.
#[derive(Debug)]
pub struct ProgramIndex<'a> {
    funcs: Vec<FuncEntry<'a>>,
    by_path: HashMap<String, Vec<FuncId>>,
    by_short: HashMap<String, Vec<FuncId>>,
    records: HashMap<String, &'a RecordDecl>,
    aliases: HashMap<String, AliasEntry<'a>>,
    enums: HashMap<String, &'a EnumDecl>,
    consts: HashMap<String, ConstDef<'a>>,
}

// ── Construction ────────────────────────────────────────────────────────────

impl<'a> ProgramIndex<'a> {
    /// Index `unit`. `defines` take precedence over in-source constants.
    pub fn build(unit: &'a TranslationUnit, defines: &[Define]) -> Self {
        let mut index = ProgramIndex {
            funcs: Vec::new(),
            by_path: HashMap::new(),
            by_short: HashMap::new(),
            records: HashMap::new(),
            aliases: HashMap::new(),
            enums: HashMap::new(),
            consts: HashMap::new(),
        };
        let mut ids = IdAllocator::new();
        index.collect_items(&unit.items, "", &mut ids);
        for define in defines {
            index
                .consts
                .insert(define.name.clone(), ConstDef::Owned(define.value.clone()));
        }
        index
    }

    fn collect_items(&mut self, items: &'a [Item], prefix: &str, ids: &mut IdAllocator) {
        for item in items {
            match &item.kind {
                ItemKind::Namespace(ns) => {
                    let inner = match &ns.name {
                        Some(name) => qualify(prefix, &name.name),
                        None => prefix.to_string(),
                    };
                    self.collect_items(&ns.items, &inner, ids);
                }
                ItemKind::Function(decl) => self.add_function(decl, prefix, ids),
                ItemKind::Record(record) => self.add_record(record, prefix, ids),
                ItemKind::Alias(alias) => {
                    if let AliasTarget::Record(record) = &alias.target {
                        self.add_record(record, prefix, ids);
                    }
                    let name = qualify(prefix, &alias.name.name);
                    self.aliases.insert(
                        name.clone(),
                        AliasEntry {
                            name,
                            params: alias.template_params.iter().flatten().collect(),
                            target: &alias.target,
                            array_dims: &alias.array_dims,
                        },
                    );
                }
                ItemKind::Enum(decl) => self.add_enum(decl, prefix),
                ItemKind::Var(var) if var.is_const => {
                    for d in &var.declarators {
                        let value = match &d.init {
                            Some(Init::Assign(e)) => Some(e),
                            Some(Init::Ctor(args) | Init::Brace(args)) if args.len() == 1 => {
                                args.first()
                            }
                            _ => None,
                        };
                        if let Some(value) = value {
                            self.consts
                                .insert(qualify(prefix, &d.name.name), ConstDef::Expr(value));
                        }
                    }
                }
                ItemKind::Directive(text) => self.add_macro(text),
                ItemKind::Var(_) | ItemKind::UsingNamespace(_) | ItemKind::Empty => {}
            }
        }
    }

    fn add_function(&mut self, decl: &'a FunctionDecl, prefix: &str, ids: &mut IdAllocator) {
        let id = ids.alloc_func();
        let path = qualify(prefix, &decl.name.path());
        let short = decl.name.last().name.clone();
        self.by_path.entry(path.clone()).or_default().push(id);
        self.by_short.entry(short).or_default().push(id);
        self.funcs.push(FuncEntry {
            id,
            name: path,
            decl,
        });
    }

    fn add_record(&mut self, record: &'a RecordDecl, prefix: &str, ids: &mut IdAllocator) {
        let Some(name) = &record.name else {
            return;
        };
        let path = qualify(prefix, &name.name);
        for method in &record.methods {
            self.add_function(method, &path, ids);
        }
        self.records.insert(path, record);
    }

    fn add_enum(&mut self, decl: &'a EnumDecl, prefix: &str) {
        if let Some(name) = &decl.name {
            self.enums.insert(qualify(prefix, &name.name), decl);
        }
        let mut base: Option<&'a Expr> = None;
        let mut offset = 0;
        for (variant, value) in &decl.variants {
            let def = match value {
                Some(expr) => {
                    base = Some(expr);
                    offset = 0;
                    ConstDef::Expr(expr)
                }
                None => ConstDef::Enumerator { base, offset },
            };
            offset += 1;
            // Unscoped enumerators live in the enclosing scope.
            self.consts.insert(qualify(prefix, &variant.name), def);
        }
    }

    /// Record an object-like `#define NAME body`.
    fn add_macro(&mut self, text: &str) {
        let Some(rest) = text.trim_start_matches('#').trim_start().strip_prefix("define") else {
            return;
        };
        let rest = rest.trim_start();
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let (name, body) = rest.split_at(name_len);
        // Function-like macros are not constants.
        if name.is_empty() || body.starts_with('(') {
            return;
        }
        let body = body.replace("\\\n", " ");
        let body = body.trim();
        if body.is_empty() {
            return;
        }
        let parsed = crate::parser::parse_expr(body);
        match parsed.expr {
            Some(expr) if parsed.errors.is_empty() => {
                self.consts.insert(name.to_string(), ConstDef::Owned(expr));
            }
            _ => tracing::debug!(name, "skipping non-expression macro"),
        }
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}::{name}")
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl<'a> ProgramIndex<'a> {
    /// Number of function declarations (the valid `FuncId` range).
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub fn contains(&self, id: FuncId) -> bool {
        (id.0 as usize) < self.funcs.len()
    }

    /// Look up a declaration by id.
    ///
    /// Panics on an id this index never allocated.
    pub fn func(&self, id: FuncId) -> &FuncEntry<'a> {
        self.funcs
            .get(id.0 as usize)
            .unwrap_or_else(|| panic!("internal: {id} is not a function of this unit"))
    }

    /// All declarations, in source order.
    pub fn funcs(&self) -> impl Iterator<Item = &FuncEntry<'a>> {
        self.funcs.iter()
    }

    /// Declarations matching `path`: exact qualified path first, then by last
    /// segment.
    pub fn lookup(&self, path: &str) -> &[FuncId] {
        if let Some(ids) = self.by_path.get(path) {
            return ids;
        }
        let short = path.rsplit("::").next().unwrap_or(path);
        self.by_short
            .get(short)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve a referenced name to the declaration that defines it.
    ///
    /// Template arguments on the reference are ignored, so `Foo<4>` and
    /// `Foo<8>` both resolve to the primary template `Foo`. Among defining
    /// candidates, primary templates win over explicit specializations and a
    /// declaration accepting `argc` arguments wins over one that does not.
    /// Returns `None` when only forward declarations exist.
    pub fn definition_of(&self, name: &QualName, argc: Option<usize>) -> Option<FuncId> {
        let candidates: Vec<&FuncEntry<'a>> = self
            .lookup(&name.path())
            .iter()
            .map(|&id| self.func(id))
            .filter(|f| f.has_body())
            .collect();
        let rank = |f: &&FuncEntry<'a>| {
            let arity_ok = argc.map_or(true, |n| f.accepts(n));
            (!arity_ok, !f.is_primary())
        };
        candidates.into_iter().min_by_key(rank).map(|f| f.id)
    }

    pub fn record(&self, path: &str) -> Option<&'a RecordDecl> {
        lookup_scoped(&self.records, path).copied()
    }

    pub fn alias(&self, path: &str) -> Option<&AliasEntry<'a>> {
        lookup_scoped(&self.aliases, path)
    }

    pub fn is_enum(&self, path: &str) -> bool {
        lookup_scoped(&self.enums, path).is_some()
    }

    pub fn constant(&self, path: &str) -> Option<&ConstDef<'a>> {
        lookup_scoped(&self.consts, path)
    }
}

/// Exact path first, then the last segment.
fn lookup_scoped<'m, V>(map: &'m HashMap<String, V>, path: &str) -> Option<&'m V> {
    map.get(path).or_else(|| {
        let short = path.rsplit("::").next()?;
        map.get(short).or_else(|| {
            map.iter()
                .filter(|(k, _)| k.rsplit("::").next() == Some(short))
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(_, v)| v)
        })
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
