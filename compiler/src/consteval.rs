// Constant evaluator
//
// Folds compile-time constant expressions (template arguments, array bounds,
// bit-field widths, macro bodies) to `i64`, resolving names through the
// program index and through template parameters bound in scope.
//
// Preconditions: `index` was built from the same unit the expression came from.
// Postconditions: `Ok(v)` is the value a C++ compiler would fold to for the
//                 integer subset supported here.
// Failure modes: unknown names, template-dependent values, division by zero,
//                overflow, unsupported forms and recursive macros yield
//                `EvalError`; evaluation never panics.
// Side effects: none.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::layout;
use crate::resolve::{ConstDef, ProgramIndex};

/// Why an expression could not be folded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("'{0}' is not a compile-time constant")]
    UnknownName(String),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("value depends on template parameter '{0}'")]
    Dependent(String),
    #[error("'{0}' is defined in terms of itself")]
    Cycle(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("unsupported constant expression")]
    Unsupported,
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Evaluator over one program index, with an optional template scope.
pub struct Evaluator<'i, 'a> {
    index: &'i ProgramIndex<'a>,
    values: HashMap<String, i64>,
    types: HashMap<String, TypeExpr>,
    /// Template parameters that are in scope but unbound.
    dependent: HashSet<String>,
    /// Constants currently being expanded, for cycle detection.
    active: RefCell<Vec<String>>,
}

impl<'i, 'a> Evaluator<'i, 'a> {
    pub fn new(index: &'i ProgramIndex<'a>) -> Self {
        Evaluator {
            index,
            values: HashMap::new(),
            types: HashMap::new(),
            dependent: HashSet::new(),
            active: RefCell::new(Vec::new()),
        }
    }

    pub fn index(&self) -> &'i ProgramIndex<'a> {
        self.index
    }

    /// An evaluator inside a template whose parameters are not bound, such
    /// as the body of a primary template task.
    pub fn with_dependent<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        self.dependent.extend(names.into_iter().map(str::to_string));
        self
    }

    /// A child scope with additional bindings, used to desugar alias
    /// templates. Outer bindings stay visible unless shadowed.
    pub fn scoped(
        &self,
        values: HashMap<String, i64>,
        types: HashMap<String, TypeExpr>,
    ) -> Evaluator<'i, 'a> {
        let mut child = Evaluator {
            index: self.index,
            values: self.values.clone(),
            types: self.types.clone(),
            dependent: self.dependent.clone(),
            active: RefCell::new(self.active.borrow().clone()),
        };
        for name in values.keys().chain(types.keys()) {
            child.dependent.remove(name);
        }
        child.values.extend(values);
        child.types.extend(types);
        child
    }

    /// Type bound to a template type parameter in scope, if any.
    pub fn bound_type(&self, name: &str) -> Option<&TypeExpr> {
        self.types.get(name)
    }

    pub fn is_dependent(&self, name: &str) -> bool {
        self.dependent.contains(name)
    }

    /// Run `f` with `name` marked as being expanded. Re-entering a name that
    /// is already being expanded fails with `Cycle`.
    pub fn expanding<T>(&self, name: &str, f: impl FnOnce() -> EvalResult<T>) -> EvalResult<T> {
        if self.active.borrow().iter().any(|n| n == name) {
            return Err(EvalError::Cycle(name.to_string()));
        }
        self.active.borrow_mut().push(name.to_string());
        let result = f();
        self.active.borrow_mut().pop();
        result
    }

    // ── Evaluation ──

    pub fn eval(&self, expr: &Expr) -> EvalResult<i64> {
        match &expr.kind {
            ExprKind::Int(v) => i64::try_from(*v).map_err(|_| EvalError::Overflow),
            ExprKind::Bool(b) => Ok(i64::from(*b)),
            ExprKind::Char(c) => Ok(i64::from(u32::from(*c))),
            ExprKind::Paren(inner) => self.eval(inner),
            ExprKind::Name(name) => self.eval_name(name),
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => v.checked_neg().ok_or(EvalError::Overflow),
                    UnaryOp::Plus => Ok(v),
                    UnaryOp::Not => Ok(i64::from(v == 0)),
                    UnaryOp::BitNot => Ok(!v),
                    _ => Err(EvalError::Unsupported),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval(cond)? != 0 {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            ExprKind::Cast { expr, .. } => self.eval(expr),
            ExprKind::SizeofType(ty) => Ok(layout::natural(self, ty)?.bytes()),
            ExprKind::SizeofExpr(inner) => match inner.as_name() {
                Some(name) => {
                    let ty = TypeExpr {
                        name: name.clone(),
                        is_const: false,
                        indirection: Vec::new(),
                        array_dims: Vec::new(),
                        span: inner.span,
                    };
                    Ok(layout::natural(self, &ty)?.bytes())
                }
                None => Err(EvalError::Unsupported),
            },
            ExprKind::Call { callee, args } => self.eval_call(callee, args),
            _ => Err(EvalError::Unsupported),
        }
    }

    fn eval_name(&self, name: &QualName) -> EvalResult<i64> {
        let path = name.path();
        if name.segments.len() == 1 {
            if let Some(v) = self.values.get(&path) {
                return Ok(*v);
            }
            if self.dependent.contains(&path) {
                return Err(EvalError::Dependent(path));
            }
        }
        let Some(def) = self.index.constant(&path) else {
            return Err(EvalError::UnknownName(path));
        };
        self.expanding(&path, || match def {
            ConstDef::Expr(e) => self.eval(e),
            ConstDef::Owned(e) => self.eval(e),
            ConstDef::Enumerator { base, offset } => match base {
                Some(e) => self.eval(e).and_then(|b| {
                    b.checked_add(*offset).ok_or(EvalError::Overflow)
                }),
                None => Ok(*offset),
            },
        })
    }

    fn eval_binary(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> EvalResult<i64> {
        // Short-circuit before touching the right-hand side.
        match op {
            BinOp::And => {
                return Ok(i64::from(self.eval(lhs)? != 0 && self.eval(rhs)? != 0));
            }
            BinOp::Or => {
                return Ok(i64::from(self.eval(lhs)? != 0 || self.eval(rhs)? != 0));
            }
            _ => {}
        }
        let a = self.eval(lhs)?;
        let b = self.eval(rhs)?;
        let overflow = || EvalError::Overflow;
        match op {
            BinOp::Mul => a.checked_mul(b).ok_or_else(overflow),
            BinOp::Add => a.checked_add(b).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).ok_or_else(overflow),
            BinOp::Div | BinOp::Rem if b == 0 => Err(EvalError::DivisionByZero),
            BinOp::Div => a.checked_div(b).ok_or_else(overflow),
            BinOp::Rem => a.checked_rem(b).ok_or_else(overflow),
            BinOp::Shl => u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shl(s))
                .ok_or_else(overflow),
            BinOp::Shr => u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shr(s))
                .ok_or_else(overflow),
            BinOp::Lt => Ok(i64::from(a < b)),
            BinOp::Gt => Ok(i64::from(a > b)),
            BinOp::Le => Ok(i64::from(a <= b)),
            BinOp::Ge => Ok(i64::from(a >= b)),
            BinOp::Eq => Ok(i64::from(a == b)),
            BinOp::Ne => Ok(i64::from(a != b)),
            BinOp::BitAnd => Ok(a & b),
            BinOp::BitXor => Ok(a ^ b),
            BinOp::BitOr => Ok(a | b),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    /// `tapa::widthof<T>()`, `static_cast<T>(x)`, `int(x)`.
    fn eval_call(&self, callee: &Expr, args: &[Expr]) -> EvalResult<i64> {
        let Some(name) = callee.as_name() else {
            return Err(EvalError::Unsupported);
        };
        let last = name.last();
        let targs = last.template_args.as_deref().unwrap_or(&[]);
        match (last.name.as_str(), targs, args) {
            ("widthof", [TemplateArg::Type(ty)], []) => {
                let bits = layout::width_of(self, ty)?;
                i64::try_from(bits).map_err(|_| EvalError::Overflow)
            }
            ("static_cast" | "reinterpret_cast" | "const_cast", [_], [arg]) => self.eval(arg),
            (_, [], [arg]) if layout::is_builtin(&name.path()) => self.eval(arg),
            _ => Err(EvalError::Unsupported),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
