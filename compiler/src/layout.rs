// Type layout and port width policy
//
// Two questions about a type: its natural storage layout (size and
// alignment in bits, as a C++ compiler would lay it out) and its port width
// (the number of bits a hardware channel carrying it needs).
//
// Port width policy:
//   - fixed-width integer wrappers (`ap_int`, `ap_uint`, `ap_fixed`,
//     `ap_ufixed`): the first template argument;
//   - `tapa::vec_t<T, N>`: `width(T) * N`;
//   - plain records: the sum of the fields' natural storage widths;
//   - aliases (including alias templates) are desugared first;
//   - anything else: the natural storage width.
//
// Preconditions: the evaluator's index covers every named type.
// Postconditions: widths are in bits.
// Failure modes: `EvalError` for unknown types and unfoldable arguments.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::*;
use crate::consteval::{EvalError, EvalResult, Evaluator};
use crate::resolve::{AliasEntry, ProgramIndex};

/// Natural storage layout, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub bits: u64,
    pub align: u64,
}

impl Layout {
    const fn scalar(bits: u64) -> Self {
        Layout { bits, align: bits }
    }

    /// `sizeof` in bytes.
    pub fn bytes(&self) -> i64 {
        (self.bits / 8) as i64
    }

    fn repeat(self, n: u64) -> EvalResult<Self> {
        Ok(Layout {
            bits: self.bits.checked_mul(n).ok_or(EvalError::Overflow)?,
            align: self.align,
        })
    }
}

const POINTER: Layout = Layout::scalar(64);

// ── Builtin types ──

fn builtin(path: &str) -> Option<Layout> {
    let name = path.strip_prefix("std::").unwrap_or(path);
    let bits = match name {
        "bool" | "char" | "signed char" | "unsigned char" | "int8_t" | "uint8_t" => 8,
        "short" | "short int" | "unsigned short" | "unsigned short int" | "int16_t"
        | "uint16_t" | "half" => 16,
        "int" | "signed" | "signed int" | "unsigned" | "unsigned int" | "int32_t"
        | "uint32_t" | "float" => 32,
        "long" | "long int" | "unsigned long" | "unsigned long int" | "long long"
        | "long long int" | "unsigned long long" | "unsigned long long int" | "int64_t"
        | "uint64_t" | "size_t" | "ssize_t" | "ptrdiff_t" | "intptr_t" | "uintptr_t"
        | "double" => 64,
        "long double" => 128,
        _ => return None,
    };
    Some(Layout::scalar(bits))
}

/// Whether `path` names a builtin arithmetic type.
pub fn is_builtin(path: &str) -> bool {
    builtin(path).is_some()
}

// ── Wrapper recognition ──

enum Wrapper<'t> {
    /// `ap_uint<W>` and friends: the width argument.
    FixedWidth(&'t TemplateArg),
    /// `tapa::vec_t<T, N>`.
    Vector(&'t TypeExpr, &'t TemplateArg),
}

fn wrapper(name: &QualName) -> Option<Wrapper<'_>> {
    let scoped_ok = match name.segments.as_slice() {
        [_] => true,
        [ns, _] => matches!(ns.name.as_str(), "tapa" | "hls"),
        _ => false,
    };
    if !scoped_ok {
        return None;
    }
    let last = name.last();
    let targs = last.template_args.as_deref()?;
    match (last.name.as_str(), targs) {
        ("ap_int" | "ap_uint" | "ap_fixed" | "ap_ufixed", [width, ..]) => {
            Some(Wrapper::FixedWidth(width))
        }
        ("vec_t", [TemplateArg::Type(elem), n]) => Some(Wrapper::Vector(elem, n)),
        _ => None,
    }
}

fn eval_arg(eval: &Evaluator<'_, '_>, arg: &TemplateArg) -> EvalResult<u64> {
    let expr = arg.as_expr().ok_or(EvalError::Unsupported)?;
    let v = eval.eval(&expr)?;
    u64::try_from(v).map_err(|_| EvalError::Overflow)
}

fn array_len(eval: &Evaluator<'_, '_>, dims: &[Expr]) -> EvalResult<u64> {
    dims.iter().try_fold(1u64, |acc, d| {
        let n = u64::try_from(eval.eval(d)?).map_err(|_| EvalError::Overflow)?;
        acc.checked_mul(n).ok_or(EvalError::Overflow)
    })
}

/// Storage of an arbitrary-precision integer: whole bytes, rounded up to a
/// power of two up to 8 bytes and to a multiple of 8 bytes beyond.
fn ap_storage(width: u64) -> Layout {
    let bytes = width.div_ceil(8).max(1);
    let bytes = if bytes <= 8 {
        bytes.next_power_of_two()
    } else {
        bytes.div_ceil(8) * 8
    };
    Layout {
        bits: bytes * 8,
        align: (bytes * 8).min(64),
    }
}

// ── Template scopes ──

/// Bind `params` to `targs` (or their defaults) in a child scope of `eval`.
fn bind_params<'i, 'a>(
    eval: &Evaluator<'i, 'a>,
    params: &[&TemplateParam],
    targs: &[TemplateArg],
) -> EvalResult<Evaluator<'i, 'a>> {
    let mut values = HashMap::new();
    let mut types = HashMap::new();
    for (i, param) in params.iter().enumerate() {
        match (param, targs.get(i)) {
            (TemplateParam::Type { name, .. }, Some(TemplateArg::Type(ty))) => {
                types.insert(name.name.clone(), ty.clone());
            }
            (TemplateParam::Type { name, .. }, Some(TemplateArg::Expr(e))) => {
                let qual = e.as_name().ok_or(EvalError::Unsupported)?;
                types.insert(
                    name.name.clone(),
                    TypeExpr {
                        name: qual.clone(),
                        is_const: false,
                        indirection: Vec::new(),
                        array_dims: Vec::new(),
                        span: e.span,
                    },
                );
            }
            (TemplateParam::Type { name, default }, None) => {
                let ty = default
                    .as_ref()
                    .ok_or_else(|| EvalError::Dependent(name.name.clone()))?;
                types.insert(name.name.clone(), ty.clone());
            }
            (TemplateParam::Value { name, .. }, Some(arg)) => {
                let v = eval_arg(eval, arg)?;
                values.insert(
                    name.name.clone(),
                    i64::try_from(v).map_err(|_| EvalError::Overflow)?,
                );
            }
            (TemplateParam::Value { name, default, .. }, None) => {
                let e = default
                    .as_ref()
                    .ok_or_else(|| EvalError::Dependent(name.name.clone()))?;
                values.insert(name.name.clone(), eval.eval(e)?);
            }
        }
    }
    Ok(eval.scoped(values, types))
}

fn targs_of(name: &QualName) -> &[TemplateArg] {
    name.last().template_args.as_deref().unwrap_or(&[])
}

/// The alias declared as `path`, skipping `typedef struct pkt pkt;` which
/// only re-exports the record of the same name.
fn alias_of<'x, 'a>(index: &'x ProgramIndex<'a>, path: &str) -> Option<&'x AliasEntry<'a>> {
    let alias = index.alias(path)?;
    let self_named = match alias.target {
        AliasTarget::Type(ty) => {
            alias.params.is_empty()
                && alias.array_dims.is_empty()
                && ty.indirection.is_empty()
                && ty.array_dims.is_empty()
                && ty.name.last().template_args.is_none()
                && ty.name.path() == path
        }
        AliasTarget::Record(_) => false,
    };
    (!self_named).then_some(alias)
}

fn alias_scope<'i, 'a>(
    eval: &Evaluator<'i, 'a>,
    alias: &AliasEntry<'_>,
    name: &QualName,
) -> EvalResult<Evaluator<'i, 'a>> {
    bind_params(eval, &alias.params, targs_of(name))
}

fn record_scope<'i, 'a>(
    eval: &Evaluator<'i, 'a>,
    record: &RecordDecl,
    name: &QualName,
) -> EvalResult<Evaluator<'i, 'a>> {
    let params: Vec<&TemplateParam> = record.template_params.iter().flatten().collect();
    bind_params(eval, &params, targs_of(name))
}

// ── Natural layout ──

/// Natural storage layout of `ty`. References lay out as their referent.
pub fn natural(eval: &Evaluator<'_, '_>, ty: &TypeExpr) -> EvalResult<Layout> {
    if ty.is_pointer() {
        return Ok(POINTER);
    }
    let elem = natural_named(eval, &ty.name)?;
    elem.repeat(array_len(eval, &ty.array_dims)?)
}

fn natural_named(eval: &Evaluator<'_, '_>, name: &QualName) -> EvalResult<Layout> {
    let path = name.path();
    if name.is_single() {
        if let Some(bound) = eval.bound_type(&path) {
            return natural(eval, bound);
        }
        if eval.is_dependent(&path) {
            return Err(EvalError::Dependent(path));
        }
    }
    if let Some(layout) = builtin(&path) {
        return Ok(layout);
    }
    match wrapper(name) {
        Some(Wrapper::FixedWidth(width)) => return Ok(ap_storage(eval_arg(eval, width)?)),
        Some(Wrapper::Vector(elem, n)) => {
            return natural(eval, elem)?.repeat(eval_arg(eval, n)?);
        }
        None => {}
    }
    let index = eval.index();
    if let Some(alias) = alias_of(index, &path) {
        return eval.expanding(&path, || {
            let scope = alias_scope(eval, alias, name)?;
            let target = match alias.target {
                AliasTarget::Type(ty) => natural(&scope, ty)?,
                AliasTarget::Record(record) => record_layout(&scope, record)?,
            };
            target.repeat(array_len(&scope, alias.array_dims)?)
        });
    }
    if let Some(record) = index.record(&path) {
        let scope = record_scope(eval, record, name)?;
        return record_layout(&scope, record);
    }
    if index.is_enum(&path) {
        return Ok(Layout::scalar(32));
    }
    Err(EvalError::UnknownType(path))
}

fn field_layout(eval: &Evaluator<'_, '_>, field: &FieldDecl) -> EvalResult<Layout> {
    let base = match &field.ty {
        FieldType::Type(ty) => natural(eval, ty)?,
        FieldType::Record(record) => record_layout(eval, record)?,
    };
    base.repeat(array_len(eval, &field.array_dims)?)
}

fn align_up(offset: u64, align: u64) -> u64 {
    if align == 0 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

/// Layout of a struct/class (sequential, padded) or union (overlapping).
pub fn record_layout(eval: &Evaluator<'_, '_>, record: &RecordDecl) -> EvalResult<Layout> {
    let mut offset = 0u64;
    let mut size = 0u64;
    let mut align = 8u64;
    for field in &record.fields {
        let fl = field_layout(eval, field)?;
        align = align.max(fl.align);
        if record.kind == RecordKind::Union {
            size = size.max(fl.bits);
            continue;
        }
        match &field.bit_width {
            Some(bw) => {
                let width = u64::try_from(eval.eval(bw)?).map_err(|_| EvalError::Overflow)?;
                let unit = fl.bits.max(8);
                if offset % unit + width > unit {
                    offset = align_up(offset, unit);
                }
                offset += width;
            }
            None => {
                offset = align_up(offset, fl.align) + fl.bits;
            }
        }
        size = offset;
    }
    Ok(Layout {
        bits: align_up(size.max(8), align),
        align,
    })
}

// ── Port width ──

/// Port width of `ty` in bits, per the width policy above.
pub fn width_of(eval: &Evaluator<'_, '_>, ty: &TypeExpr) -> EvalResult<u64> {
    if ty.is_pointer() {
        return Ok(POINTER.bits);
    }
    let elem = width_named(eval, &ty.name)?;
    elem.checked_mul(array_len(eval, &ty.array_dims)?)
        .ok_or(EvalError::Overflow)
}

fn width_named(eval: &Evaluator<'_, '_>, name: &QualName) -> EvalResult<u64> {
    let path = name.path();
    if name.is_single() {
        if let Some(bound) = eval.bound_type(&path) {
            return width_of(eval, bound);
        }
        if eval.is_dependent(&path) {
            return Err(EvalError::Dependent(path));
        }
    }
    if let Some(layout) = builtin(&path) {
        return Ok(layout.bits);
    }
    match wrapper(name) {
        Some(Wrapper::FixedWidth(width)) => return eval_arg(eval, width),
        Some(Wrapper::Vector(elem, n)) => {
            return width_of(eval, elem)?
                .checked_mul(eval_arg(eval, n)?)
                .ok_or(EvalError::Overflow);
        }
        None => {}
    }
    let index = eval.index();
    if let Some(alias) = alias_of(index, &path) {
        return eval.expanding(&path, || {
            let scope = alias_scope(eval, alias, name)?;
            let width = match alias.target {
                AliasTarget::Type(ty) => width_of(&scope, ty)?,
                AliasTarget::Record(record) => record_width(&scope, record)?,
            };
            width
                .checked_mul(array_len(&scope, alias.array_dims)?)
                .ok_or(EvalError::Overflow)
        });
    }
    if let Some(record) = index.record(&path) {
        let scope = record_scope(eval, record, name)?;
        return record_width(&scope, record);
    }
    natural_named(eval, name).map(|l| l.bits)
}

/// Sum of the fields' natural widths for structs; natural size for unions.
/// Bit-fields count their declared type, not the bit-width specifier.
fn record_width(eval: &Evaluator<'_, '_>, record: &RecordDecl) -> EvalResult<u64> {
    if record.kind == RecordKind::Union {
        return record_layout(eval, record).map(|l| l.bits);
    }
    record.fields.iter().try_fold(0u64, |acc, field| {
        let bits = field_layout(eval, field)?.bits;
        acc.checked_add(bits).ok_or(EvalError::Overflow)
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolve::ProgramIndex;

    /// Width of the first parameter's type of the last function in `src`.
    fn width(src: &str) -> EvalResult<u64> {
        with_param(src, |eval, ty| width_of(eval, ty))
    }

    fn size(src: &str) -> EvalResult<u64> {
        with_param(src, |eval, ty| natural(eval, ty).map(|l| l.bits))
    }

    fn with_param(
        src: &str,
        f: impl Fn(&Evaluator<'_, '_>, &TypeExpr) -> EvalResult<u64>,
    ) -> EvalResult<u64> {
        let result = parse(src);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        let unit = result.unit.expect("unit");
        let index = ProgramIndex::build(&unit, &[]);
        let func = index.funcs().last().expect("a function");
        let eval = Evaluator::new(&index).with_dependent(
            func.decl
                .template_params
                .iter()
                .flatten()
                .map(TemplateParam::name),
        );
        f(&eval, &func.decl.params[0].ty)
    }

    #[test]
    fn builtin_widths() {
        assert_eq!(width("void f(float x);"), Ok(32));
        assert_eq!(width("void f(unsigned long long x);"), Ok(64));
        assert_eq!(width("void f(std::uint16_t x);"), Ok(16));
        assert_eq!(width("void f(int* p);"), Ok(64));
    }

    #[test]
    fn fixed_width_integers_use_their_argument() {
        assert_eq!(width("#define W 12\nvoid f(ap_uint<W + 1> x);"), Ok(13));
        assert_eq!(width("void f(ap_fixed<18, 6> x);"), Ok(18));
        assert_eq!(size("void f(ap_uint<13> x);"), Ok(16));
        assert_eq!(size("void f(ap_uint<65> x);"), Ok(128));
    }

    #[test]
    fn records_sum_field_widths() {
        let src = "struct pkt { ap_uint<3> tag; float v; bool last; };\nvoid f(pkt p);";
        assert_eq!(width(src), Ok(8 + 32 + 8));
        // Natural layout pads: 1 byte, 3 padding, 4, 1, 3 padding.
        assert_eq!(size(src), Ok(96));
    }

    #[test]
    fn unions_and_anonymous_members() {
        let src = "typedef struct {\n  union {\n    struct { uint16_t pageid; uint8_t code; } fields;\n    uint64_t msg;\n  };\n  bool c_dn;\n} req_t;\nvoid f(req_t r);";
        // Union is 64 bits; plus the 8-bit flag.
        assert_eq!(width(src), Ok(72));
    }

    #[test]
    fn vectors_multiply() {
        assert_eq!(width("void f(tapa::vec_t<float, 2> v);"), Ok(64));
        assert_eq!(width("using float_v2 = tapa::vec_t<float, 2>;\nvoid f(float_v2 v);"), Ok(64));
    }

    #[test]
    fn alias_templates_are_desugared() {
        let src = "using float_v2 = tapa::vec_t<float, 2>;\ntemplate <typename T>\nusing bits = ap_uint<tapa::widthof<T>()>;\nvoid f(bits<float_v2> b);";
        assert_eq!(width(src), Ok(64));
    }

    #[test]
    fn arrays_multiply() {
        assert_eq!(width("#define N 4\nvoid f(float a[N]);"), Ok(128));
    }

    #[test]
    fn dependent_width_fails() {
        assert_eq!(
            width("template <int N> void f(ap_uint<N> x);"),
            Err(EvalError::Dependent("N".into()))
        );
    }

    #[test]
    fn unknown_type_fails() {
        assert_eq!(
            width("void f(mystery_t x);"),
            Err(EvalError::UnknownType("mystery_t".into()))
        );
    }

    #[test]
    fn self_named_typedef_uses_the_record() {
        let src = "struct pkt { int a; ap_uint<4> b; };\ntypedef struct pkt pkt;\nvoid f(pkt p);";
        assert_eq!(width(src), Ok(36));
        assert_eq!(size(src), Ok(64));
    }

    #[test]
    fn alias_cycles_fail() {
        let src = "using A = B;\nusing B = A;\nvoid f(A x);";
        assert_eq!(width(src), Err(EvalError::Cycle("A".into())));
        assert_eq!(size(src), Err(EvalError::Cycle("A".into())));
        let direct = "typedef loop_t loop_t[2];\nvoid f(loop_t x);";
        assert_eq!(width(direct), Err(EvalError::Cycle("loop_t".into())));
    }

    #[test]
    fn bitfields_pack() {
        let src = "struct flags { uint32_t a : 3; uint32_t b : 5; uint32_t c : 30; };\nvoid f(flags x);";
        assert_eq!(size(src), Ok(64));
        assert_eq!(width(src), Ok(96));
    }
}
