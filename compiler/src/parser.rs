// Parser for annotated C++ task sources.
//
// Parses a token stream (from the lexer) into a translation unit. Uses chumsky
// combinators. Only the C++ subset task kernels are written in is accepted;
// the grammar leans on backtracking to settle the usual template/relational
// and declaration/expression ambiguities without a symbol table.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

type Extra<'t> = extra::Err<Rich<'t, Token, SimpleSpan>>;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub unit: Option<TranslationUnit>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Result of parsing a standalone expression (macro bodies, `-D` values).
#[derive(Debug)]
pub struct ExprParseResult {
    pub expr: Option<Expr>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a C++ source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = unit_parser();
    let (unit, parse_errors) = parser.parse(stream).into_output_errors();

    ParseResult {
        unit,
        errors: merge_errors(lex_result.errors, parse_errors),
    }
}

/// Parse a single expression, e.g. the body of `#define N (TILE * 2)`.
pub fn parse_expr(source: &str) -> ExprParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = expr_parser();
    let (expr, parse_errors) = parser.parse(stream).into_output_errors();

    ExprParseResult {
        expr,
        errors: merge_errors(lex_result.errors, parse_errors),
    }
}

fn merge_errors(
    lex_errors: Vec<crate::lexer::LexError>,
    parse_errors: Vec<Rich<'_, Token, SimpleSpan>>,
) -> Vec<Rich<'static, Token, SimpleSpan>> {
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));
    all_errors
}

// ── Fold helpers ──

#[derive(Clone)]
enum Prefix {
    Op(UnaryOp),
    Cast(TypeExpr),
}

#[derive(Clone)]
enum Postfix {
    Call(Vec<Expr>),
    Index(Expr),
    Member {
        arrow: bool,
        segment: NameSegment,
        args: Option<Vec<Expr>>,
    },
    Inc,
    Dec,
}

fn binary_fold(lhs: Expr, (op, rhs): (BinOp, Expr)) -> Expr {
    Expr {
        span: join(lhs.span, rhs.span),
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    }
}

fn apply_prefix((prefix, span): (Prefix, SimpleSpan), operand: Expr) -> Expr {
    let span = join(span, operand.span);
    let kind = match prefix {
        Prefix::Op(op) => ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        Prefix::Cast(ty) => ExprKind::Cast {
            ty,
            expr: Box::new(operand),
        },
    };
    Expr { kind, span }
}

fn apply_postfix(lhs: Expr, (postfix, span): (Postfix, SimpleSpan)) -> Expr {
    let span = join(lhs.span, span);
    let lhs = Box::new(lhs);
    let kind = match postfix {
        Postfix::Call(args) => ExprKind::Call { callee: lhs, args },
        Postfix::Index(index) => ExprKind::Index {
            base: lhs,
            index: Box::new(index),
        },
        Postfix::Member {
            arrow,
            segment,
            args: Some(args),
        } => ExprKind::MethodCall {
            receiver: lhs,
            arrow,
            method: segment,
            args,
        },
        Postfix::Member {
            arrow,
            segment,
            args: None,
        } => ExprKind::Member {
            base: lhs,
            arrow,
            field: Ident {
                name: segment.name,
                span: segment.span,
            },
        },
        Postfix::Inc => ExprKind::Postfix {
            op: PostfixOp::Inc,
            operand: lhs,
        },
        Postfix::Dec => ExprKind::Postfix {
            op: PostfixOp::Dec,
            operand: lhs,
        },
    };
    Expr { kind, span }
}

/// Whether a parenthesized type is evidently a C-style cast target.
///
/// Without a symbol table `(x) - 1` and `(int) - 1` look alike, so only
/// builtin words, `*_t` names, qualified or templated names and pointer
/// types are taken as casts.
fn looks_like_cast(ty: &TypeExpr) -> bool {
    const BUILTIN: &[&str] = &[
        "void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed",
    ];
    let first_word = ty.name.last().name.split(' ').next().unwrap_or_default();
    ty.name.segments.len() > 1
        || ty.name.last().template_args.is_some()
        || !ty.indirection.is_empty()
        || BUILTIN.contains(&first_word)
        || first_word.ends_with("_t")
}

// ── Shared building blocks ──

fn ident<'t, I>() -> impl Parser<'t, I, Ident, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    select! { Token::Ident(name) = e => Ident { name, span: e.span() } }
}

fn name_segment<'t, I, A>(targs: A) -> impl Parser<'t, I, NameSegment, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
    A: Parser<'t, I, Vec<TemplateArg>, Extra<'t>> + Clone,
{
    ident()
        .then(targs.or_not())
        .map_with(|(id, template_args), e| NameSegment {
            name: id.name,
            template_args,
            span: e.span(),
        })
}

fn qual_name<'t, I, A>(targs: A) -> impl Parser<'t, I, QualName, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
    A: Parser<'t, I, Vec<TemplateArg>, Extra<'t>> + Clone,
{
    just(Token::ColonColon)
        .or_not()
        .then(
            name_segment(targs)
                .separated_by(just(Token::ColonColon))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map_with(|(global, segments), e| QualName {
            global: global.is_some(),
            segments,
            span: e.span(),
        })
}

// ── Template argument list: '<' (type | const_expr) (',' ...)* '>' ──
//
// A type argument is only accepted when it is followed by ',' or '>', so
// `TILE/PACK` falls through to the expression alternative.

fn template_args<'t, I, T, C>(ty: T, cexpr: C) -> impl Parser<'t, I, Vec<TemplateArg>, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
    T: Parser<'t, I, TypeExpr, Extra<'t>> + Clone,
    C: Parser<'t, I, Expr, Extra<'t>> + Clone,
{
    let dims = cexpr
        .clone()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .repeated()
        .collect::<Vec<_>>();

    let type_arg = ty
        .then(dims)
        .then_ignore(just(Token::Comma).or(just(Token::Gt)).rewind())
        .map(|(mut ty, dims)| {
            ty.array_dims = dims;
            TemplateArg::Type(ty)
        });

    let expr_arg = cexpr.map(TemplateArg::Expr);

    type_arg
        .or(expr_arg)
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::Lt), just(Token::Gt))
}

// ── Constant expressions (template arguments, bit-field widths) ──
//
// No relational operators and no `>>`: a bare `>` closes the argument list.

fn const_expr<'t, I, T>(ty: T) -> impl Parser<'t, I, Expr, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
    T: Parser<'t, I, TypeExpr, Extra<'t>> + Clone + 't,
{
    recursive(move |cexpr| {
        let targs = template_args(ty.clone(), cexpr.clone());

        let literal = select! {
            Token::Int(v) => ExprKind::Int(v),
            Token::Float(v) => ExprKind::Float(v),
            Token::Char(c) => ExprKind::Char(c),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
        }
        .map_with(|kind, e| Expr {
            kind,
            span: e.span(),
        });

        let call_args = cexpr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let name = qual_name(targs)
            .then(call_args.or_not())
            .map_with(|(name, args), e| {
                let name_expr = Expr {
                    span: name.span,
                    kind: ExprKind::Name(name),
                };
                match args {
                    Some(args) => Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(name_expr),
                            args,
                        },
                        span: e.span(),
                    },
                    None => name_expr,
                }
            });

        let sizeof = just(Token::Sizeof)
            .ignore_then(
                ty.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|ty, e| Expr {
                kind: ExprKind::SizeofType(ty),
                span: e.span(),
            });

        let paren = cexpr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|inner, e| Expr {
                kind: ExprKind::Paren(Box::new(inner)),
                span: e.span(),
            });

        let atom = choice((literal, sizeof, paren, name));

        let unary = choice((
            just(Token::Minus).to(UnaryOp::Neg),
            just(Token::Plus).to(UnaryOp::Plus),
            just(Token::Tilde).to(UnaryOp::BitNot),
            just(Token::Bang).to(UnaryOp::Not),
        ))
        .map_with(|op, e| (Prefix::Op(op), e.span()))
        .repeated()
        .foldr(atom, apply_prefix);

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
                just(Token::Percent).to(BinOp::Rem),
            ))
            .then(unary)
            .repeated(),
            binary_fold,
        );

        let sum = product.clone().foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            binary_fold,
        );

        sum.clone().foldl(
            just(Token::Shl).to(BinOp::Shl).then(sum).repeated(),
            binary_fold,
        )
    })
}

// ── Types ──

fn type_parser<'t, I>() -> impl Parser<'t, I, TypeExpr, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    recursive(|ty| {
        let cexpr = const_expr(ty.clone());
        let targs = template_args(ty, cexpr);

        // `unsigned`, `long long`, `unsigned int`, ...
        let modifier = select! {
            Token::Ident(w) if matches!(w.as_str(), "unsigned" | "signed" | "long" | "short") => w,
        };
        let base_word = select! {
            Token::Ident(w) if matches!(w.as_str(), "int" | "char" | "double" | "long") => w,
        };
        let builtin = modifier
            .repeated()
            .at_least(1)
            .collect::<Vec<String>>()
            .then(base_word.or_not())
            .map_with(|(mut words, base), e| {
                words.extend(base);
                let span: SimpleSpan = e.span();
                QualName {
                    global: false,
                    segments: vec![NameSegment {
                        name: words.join(" "),
                        template_args: None,
                        span,
                    }],
                    span,
                }
            });

        let prefix = choice((
            just(Token::Const),
            just(Token::Volatile),
            just(Token::Typename),
            just(Token::Struct),
            just(Token::Class),
            just(Token::Union),
            just(Token::Enum),
        ))
        .repeated()
        .collect::<Vec<Token>>()
        .map(|tokens| tokens.contains(&Token::Const));

        let indirection = choice((
            just(Token::Star).to(Indirection::Pointer),
            just(Token::Amp).to(Indirection::LRef),
            just(Token::AndAnd).to(Indirection::RRef),
        ))
        .then_ignore(just(Token::Const).or(just(Token::Volatile)).or_not())
        .repeated()
        .collect::<Vec<_>>();

        prefix
            .then(builtin.or(qual_name(targs)))
            .then(just(Token::Const).or_not())
            .then(indirection)
            .map_with(|(((pre_const, name), post_const), indirection), e| TypeExpr {
                name,
                is_const: pre_const || post_const.is_some(),
                indirection,
                array_dims: Vec::new(),
                span: e.span(),
            })
            .boxed()
    })
}

// ── Expressions ──

fn expr_parser<'t, I>() -> impl Parser<'t, I, Expr, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let ty = type_parser();
    let targs = template_args(ty.clone(), const_expr(ty.clone()));

    recursive(move |expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let literal = select! {
            Token::Int(v) => ExprKind::Int(v),
            Token::Float(v) => ExprKind::Float(v),
            Token::Str(s) => ExprKind::Str(s),
            Token::Char(c) => ExprKind::Char(c),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
        }
        .map_with(|kind, e| Expr {
            kind,
            span: e.span(),
        });

        let name = qual_name(targs.clone()).map(|name| Expr {
            span: name.span,
            kind: ExprKind::Name(name),
        });

        let sizeof = just(Token::Sizeof)
            .ignore_then(choice((
                ty.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .map(ExprKind::SizeofType),
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .map(|inner| ExprKind::SizeofExpr(Box::new(inner))),
            )))
            .map_with(|kind, e| Expr {
                kind,
                span: e.span(),
            });

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|inner, e| Expr {
                kind: ExprKind::Paren(Box::new(inner)),
                span: e.span(),
            });

        let init_list = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map_with(|items, e| Expr {
                kind: ExprKind::InitList(items),
                span: e.span(),
            });

        let atom = choice((literal, sizeof, paren, init_list, name)).boxed();

        // ── Postfix: call, index, member / method, ++, -- ──

        let member = just(Token::Dot)
            .to(false)
            .or(just(Token::Arrow).to(true))
            .then(name_segment(targs.clone()))
            .then(args.clone().or_not())
            .map(|((arrow, segment), args)| Postfix::Member {
                arrow,
                segment,
                args,
            });

        let postfix_op = choice((
            args.clone().map(Postfix::Call),
            expr.clone()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map(Postfix::Index),
            member,
            just(Token::PlusPlus).to(Postfix::Inc),
            just(Token::MinusMinus).to(Postfix::Dec),
        ))
        .map_with(|op, e| (op, e.span()));

        let postfix = atom.foldl(postfix_op.repeated(), apply_postfix);

        // ── Prefix: unary operators and C-style casts ──

        let cast = ty
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .try_map(|ty, span| {
                if looks_like_cast(&ty) {
                    Ok(Prefix::Cast(ty))
                } else {
                    Err(Rich::custom(span, "not a cast"))
                }
            });

        let prefix = choice((
            just(Token::Minus).to(Prefix::Op(UnaryOp::Neg)),
            just(Token::Plus).to(Prefix::Op(UnaryOp::Plus)),
            just(Token::Bang).to(Prefix::Op(UnaryOp::Not)),
            just(Token::Tilde).to(Prefix::Op(UnaryOp::BitNot)),
            just(Token::Star).to(Prefix::Op(UnaryOp::Deref)),
            just(Token::Amp).to(Prefix::Op(UnaryOp::AddrOf)),
            just(Token::PlusPlus).to(Prefix::Op(UnaryOp::PreInc)),
            just(Token::MinusMinus).to(Prefix::Op(UnaryOp::PreDec)),
            cast,
        ))
        .map_with(|p, e| (p, e.span()));

        let unary = prefix.repeated().foldr(postfix, apply_prefix).boxed();

        // ── Binary levels, tightest first ──

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
                just(Token::Percent).to(BinOp::Rem),
            ))
            .then(unary)
            .repeated(),
            binary_fold,
        );

        let sum = product
            .clone()
            .foldl(
                choice((
                    just(Token::Plus).to(BinOp::Add),
                    just(Token::Minus).to(BinOp::Sub),
                ))
                .then(product)
                .repeated(),
                binary_fold,
            )
            .boxed();

        // `>>` arrives as two adjacent `>` tokens.
        let gt = just(Token::Gt).map_with(|_, e| -> SimpleSpan { e.span() });
        let shr = gt
            .clone()
            .then(gt)
            .try_map(|(a, b): (SimpleSpan, SimpleSpan), span| {
                if a.end == b.start {
                    Ok(BinOp::Shr)
                } else {
                    Err(Rich::custom(span, "expected '>>'"))
                }
            });

        let shift = sum.clone().foldl(
            just(Token::Shl)
                .to(BinOp::Shl)
                .or(shr)
                .then(sum)
                .repeated(),
            binary_fold,
        );

        let relational = shift
            .clone()
            .foldl(
                choice((
                    just(Token::Le).to(BinOp::Le),
                    just(Token::Ge).to(BinOp::Ge),
                    just(Token::Lt).to(BinOp::Lt),
                    just(Token::Gt).to(BinOp::Gt),
                ))
                .then(shift)
                .repeated(),
                binary_fold,
            )
            .boxed();

        let equality = relational.clone().foldl(
            choice((
                just(Token::EqEq).to(BinOp::Eq),
                just(Token::Ne).to(BinOp::Ne),
            ))
            .then(relational)
            .repeated(),
            binary_fold,
        );

        let bit_and = equality.clone().foldl(
            just(Token::Amp).to(BinOp::BitAnd).then(equality).repeated(),
            binary_fold,
        );

        let bit_xor = bit_and.clone().foldl(
            just(Token::Caret).to(BinOp::BitXor).then(bit_and).repeated(),
            binary_fold,
        );

        let bit_or = bit_xor.clone().foldl(
            just(Token::Pipe).to(BinOp::BitOr).then(bit_xor).repeated(),
            binary_fold,
        );

        let logical_and = bit_or.clone().foldl(
            just(Token::AndAnd).to(BinOp::And).then(bit_or).repeated(),
            binary_fold,
        );

        let logical_or = logical_and
            .clone()
            .foldl(
                just(Token::OrOr).to(BinOp::Or).then(logical_and).repeated(),
                binary_fold,
            )
            .boxed();

        let conditional = logical_or
            .then(
                just(Token::Question)
                    .ignore_then(expr.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expr.clone())
                    .or_not(),
            )
            .map(|(cond, branches)| match branches {
                None => cond,
                Some((then_expr, else_expr)) => Expr {
                    span: join(cond.span, else_expr.span),
                    kind: ExprKind::Conditional {
                        cond: Box::new(cond),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                },
            });

        let gt_then_ge = just(Token::Gt)
            .map_with(|_, e| -> SimpleSpan { e.span() })
            .then(just(Token::Ge).map_with(|_, e| -> SimpleSpan { e.span() }))
            .try_map(|(a, b): (SimpleSpan, SimpleSpan), span| {
                if a.end == b.start {
                    Ok(Some(BinOp::Shr))
                } else {
                    Err(Rich::custom(span, "expected '>>='"))
                }
            });

        let assign_op = select! {
            Token::Assign => None,
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            Token::PercentAssign => Some(BinOp::Rem),
            Token::AmpAssign => Some(BinOp::BitAnd),
            Token::PipeAssign => Some(BinOp::BitOr),
            Token::CaretAssign => Some(BinOp::BitXor),
            Token::ShlAssign => Some(BinOp::Shl),
        }
        .or(gt_then_ge);

        conditional
            .then(assign_op.then(expr).or_not())
            .map(|(lhs, rhs)| match rhs {
                None => lhs,
                Some((op, rhs)) => Expr {
                    span: join(lhs.span, rhs.span),
                    kind: ExprKind::Assign {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                },
            })
            .boxed()
    })
}

// ── Declarations shared by statements and items ──

fn decl_specifiers<'t, I>() -> impl Parser<'t, I, Vec<Token>, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let extern_spec = just(Token::Extern).then_ignore(select! { Token::Str(_) => () }.or_not());
    choice((
        just(Token::Static),
        just(Token::Inline),
        just(Token::Constexpr),
        extern_spec,
    ))
    .repeated()
    .collect::<Vec<_>>()
}

fn var_decl<'t, I, T, E>(ty: T, expr: E) -> impl Parser<'t, I, VarDecl, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
    T: Parser<'t, I, TypeExpr, Extra<'t>> + Clone,
    E: Parser<'t, I, Expr, Extra<'t>> + Clone,
{
    let dims = expr
        .clone()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .repeated()
        .collect::<Vec<_>>();

    let list = expr
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>();

    let init = choice((
        just(Token::Assign).ignore_then(expr.clone()).map(|e| match e.kind {
            ExprKind::InitList(items) => Init::Brace(items),
            _ => Init::Assign(e),
        }),
        list.clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(Init::Ctor),
        list.delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Init::Brace),
    ));

    let indirection = choice((
        just(Token::Star).to(Indirection::Pointer),
        just(Token::Amp).to(Indirection::LRef),
        just(Token::AndAnd).to(Indirection::RRef),
    ))
    .repeated()
    .collect::<Vec<_>>();

    let declarator = indirection
        .then(ident())
        .then(dims)
        .then(init.or_not())
        .map_with(|(((indirection, name), array_dims), init), e| Declarator {
            name,
            indirection,
            array_dims,
            init,
            span: e.span(),
        });

    decl_specifiers()
        .then(ty)
        .then(
            declarator
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|((specs, ty), declarators)| VarDecl {
            is_const: ty.is_const || specs.contains(&Token::Constexpr),
            ty,
            declarators,
        })
}

// ── Statements ──

fn stmt_parser<'t, I>() -> impl Parser<'t, I, Stmt, Extra<'t>> + Clone
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let ty = type_parser();
    let expr = expr_parser();

    recursive(move |stmt| {
        let paren_expr = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let block = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map_with(|stmts, e| Block {
                stmts,
                span: e.span(),
            });

        let directive = select! { Token::Directive(text) => StmtKind::Directive(text) };

        let compound = block.map(StmtKind::Compound);

        let decl = var_decl(ty.clone(), expr.clone());

        let if_stmt = just(Token::If)
            .ignore_then(paren_expr.clone())
            .then(stmt.clone())
            .then(just(Token::Else).ignore_then(stmt.clone()).or_not())
            .map(|((cond, then_branch), else_branch)| StmtKind::If {
                cond,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            });

        let for_init = decl
            .clone()
            .map(StmtKind::Decl)
            .or(expr.clone().map(StmtKind::Expr))
            .map_with(|kind, e| Stmt {
                kind,
                span: e.span(),
            });

        let for_stmt = just(Token::For)
            .ignore_then(
                for_init
                    .or_not()
                    .then_ignore(just(Token::Semi))
                    .then(expr.clone().or_not())
                    .then_ignore(just(Token::Semi))
                    .then(expr.clone().or_not())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(stmt.clone())
            .map(|(((init, cond), step), body)| StmtKind::For {
                init: init.map(Box::new),
                cond,
                step,
                body: Box::new(body),
            });

        let range_for = just(Token::For)
            .ignore_then(
                ty.clone()
                    .then(ident())
                    .then_ignore(just(Token::Colon))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(stmt.clone())
            .map(|(((var_ty, var), range), body)| StmtKind::RangeFor {
                var_ty,
                var,
                range,
                body: Box::new(body),
            });

        let while_stmt = just(Token::While)
            .ignore_then(paren_expr.clone())
            .then(stmt.clone())
            .map(|(cond, body)| StmtKind::While {
                cond,
                body: Box::new(body),
            });

        let do_stmt = just(Token::Do)
            .ignore_then(stmt.clone())
            .then_ignore(just(Token::While))
            .then(paren_expr.clone())
            .then_ignore(just(Token::Semi))
            .map(|(body, cond)| StmtKind::DoWhile {
                body: Box::new(body),
                cond,
            });

        let switch_stmt = just(Token::Switch)
            .ignore_then(paren_expr)
            .then(stmt.clone())
            .map(|(cond, body)| StmtKind::Switch {
                cond,
                body: Box::new(body),
            });

        let case = just(Token::Case)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Colon))
            .map(StmtKind::Case);

        let default = just(Token::Default)
            .then(just(Token::Colon))
            .to(StmtKind::DefaultLabel);

        let label = ident()
            .then_ignore(just(Token::Colon))
            .then(stmt.clone())
            .map(|(name, body)| StmtKind::Label {
                name,
                body: Box::new(body),
            });

        let ret = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Semi))
            .map(StmtKind::Return);

        let jump = choice((
            just(Token::Break).to(StmtKind::Break),
            just(Token::Continue).to(StmtKind::Continue),
        ))
        .then_ignore(just(Token::Semi));

        let decl_stmt = decl.then_ignore(just(Token::Semi)).map(StmtKind::Decl);
        let expr_stmt = expr.clone().then_ignore(just(Token::Semi)).map(StmtKind::Expr);
        let empty = just(Token::Semi).to(StmtKind::Empty);

        choice((
            directive,
            compound,
            if_stmt,
            range_for,
            for_stmt,
            while_stmt,
            do_stmt,
            switch_stmt,
            case,
            default,
            ret,
            jump,
            label,
            decl_stmt,
            expr_stmt,
            empty,
        ))
        .map_with(|kind, e| Stmt {
            kind,
            span: e.span(),
        })
        .boxed()
    })
}

// ── Items ──

#[derive(Clone)]
enum Member {
    Fields(Vec<FieldDecl>),
    Method(FunctionDecl),
    Skip,
}

fn unit_parser<'t, I>() -> impl Parser<'t, I, TranslationUnit, Extra<'t>>
where
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let ty = type_parser();
    let cexpr = const_expr(ty.clone());
    let targs = template_args(ty.clone(), cexpr.clone());
    let expr = expr_parser();
    let stmt = stmt_parser();

    let dims = expr
        .clone()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .repeated()
        .collect::<Vec<_>>();

    // ── template <...> ──

    let template_param = choice((
        just(Token::Typename)
            .or(just(Token::Class))
            .ignore_then(ident())
            .then(just(Token::Assign).ignore_then(ty.clone()).or_not())
            .map(|(name, default)| TemplateParam::Type { name, default }),
        ty.clone()
            .then(ident())
            .then(just(Token::Assign).ignore_then(cexpr.clone()).or_not())
            .map(|((ty, name), default)| TemplateParam::Value { ty, name, default }),
    ));

    let template_params = just(Token::Template).ignore_then(
        template_param
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Lt), just(Token::Gt)),
    );

    // ── Functions ──

    let block = stmt
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map_with(|stmts, e| Block {
            stmts,
            span: e.span(),
        });

    let param = ty
        .clone()
        .then(ident().or_not())
        .then(dims.clone())
        .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
        .map_with(|(((mut ty, name), dims), default), e| {
            ty.array_dims.extend(dims);
            Param {
                ty,
                name,
                default,
                span: e.span(),
            }
        });

    let params = param
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map(|params: Vec<Param>| {
            let is_void = params.len() == 1
                && params[0].name.is_none()
                && params[0].ty.indirection.is_empty()
                && params[0].ty.name.path() == "void";
            if is_void {
                Vec::new()
            } else {
                params
            }
        });

    let function = template_params
        .clone()
        .or_not()
        .then_ignore(decl_specifiers())
        .then(ty.clone())
        .then(qual_name(targs.clone()))
        .then(params)
        .then_ignore(just(Token::Const).or_not())
        .then(block.map(Some).or(just(Token::Semi).to(None)))
        .map_with(
            |((((template_params, ret), name), params), body), e| FunctionDecl {
                name,
                template_params,
                ret,
                params,
                body,
                span: e.span(),
            },
        )
        .boxed();

    // ── Records ──

    // Balanced `{ ... }` used to skip members the subset does not model
    // (constructors with init lists, operators, ...).
    let balanced = recursive(|balanced| {
        just(Token::LBrace)
            .ignore_then(
                none_of([Token::LBrace, Token::RBrace])
                    .ignored()
                    .or(balanced)
                    .repeated(),
            )
            .then_ignore(just(Token::RBrace))
            .ignored()
    });

    let record = recursive(|record| {
        let kind = choice((
            just(Token::Struct).to(RecordKind::Struct),
            just(Token::Class).to(RecordKind::Class),
            just(Token::Union).to(RecordKind::Union),
        ));

        let access = choice((
            just(Token::Public),
            just(Token::Private),
            just(Token::Protected),
        ));

        let base_clause = just(Token::Colon)
            .ignore_then(
                access
                    .clone()
                    .or_not()
                    .ignore_then(qual_name(targs.clone()))
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .or_not();

        let field_declarator = ident()
            .then(dims.clone())
            .then(just(Token::Colon).ignore_then(cexpr.clone()).or_not())
            .then_ignore(just(Token::Assign).ignore_then(expr.clone()).or_not())
            .map_with(|((name, array_dims), bit_width), e| {
                (name, array_dims, bit_width, e.span())
            });

        let nested = record
            .then(
                field_declarator
                    .clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(Token::Semi))
            .map_with(|(inner, declarators): (RecordDecl, Vec<_>), e| {
                if declarators.is_empty() {
                    return Member::Fields(vec![FieldDecl {
                        ty: FieldType::Record(Box::new(inner)),
                        name: None,
                        array_dims: Vec::new(),
                        bit_width: None,
                        span: e.span(),
                    }]);
                }
                Member::Fields(
                    declarators
                        .into_iter()
                        .map(|(name, array_dims, bit_width, span)| FieldDecl {
                            ty: FieldType::Record(Box::new(inner.clone())),
                            name: Some(name),
                            array_dims,
                            bit_width,
                            span,
                        })
                        .collect(),
                )
            });

        let field = decl_specifiers()
            .ignore_then(ty.clone())
            .then(
                field_declarator
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(Token::Semi))
            .map(|(ty, declarators)| {
                Member::Fields(
                    declarators
                        .into_iter()
                        .map(|(name, array_dims, bit_width, span)| FieldDecl {
                            ty: FieldType::Type(ty.clone()),
                            name: Some(name),
                            array_dims,
                            bit_width,
                            span,
                        })
                        .collect(),
                )
            });

        let skipped = none_of([Token::Semi, Token::LBrace, Token::RBrace])
            .repeated()
            .at_least(1)
            .then(
                just(Token::Semi)
                    .ignored()
                    .or(balanced.clone().then_ignore(just(Token::Semi).or_not())),
            )
            .to(Member::Skip);

        let member = choice((
            access.then(just(Token::Colon)).to(Member::Skip),
            select! { Token::Directive(_) => Member::Skip },
            just(Token::Semi).to(Member::Skip),
            nested,
            field,
            function.clone().map(Member::Method),
            skipped,
        ));

        template_params
            .clone()
            .or_not()
            .then(kind)
            .then(ident().or_not())
            .then_ignore(base_clause)
            .then(
                member
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|(((template_params, kind), name), members), e| {
                let mut fields = Vec::new();
                let mut methods = Vec::new();
                for member in members {
                    match member {
                        Member::Fields(f) => fields.extend(f),
                        Member::Method(m) => methods.push(m),
                        Member::Skip => {}
                    }
                }
                RecordDecl {
                    kind,
                    name,
                    template_params,
                    fields,
                    methods,
                    span: e.span(),
                }
            })
            .boxed()
    });

    // ── Aliases ──

    let using_alias = template_params
        .clone()
        .or_not()
        .then_ignore(just(Token::Using))
        .then(ident())
        .then_ignore(just(Token::Assign))
        .then(ty.clone())
        .then(dims.clone())
        .then_ignore(just(Token::Semi))
        .map(|(((template_params, name), target), array_dims)| {
            ItemKind::Alias(AliasDecl {
                name,
                template_params,
                target: AliasTarget::Type(target),
                array_dims,
            })
        });

    let typedef = just(Token::Typedef)
        .ignore_then(
            record
                .clone()
                .map(|r| AliasTarget::Record(Box::new(r)))
                .or(ty.clone().map(AliasTarget::Type)),
        )
        .then(ident())
        .then(dims.clone())
        .then_ignore(just(Token::Semi))
        .map(|((target, name), array_dims)| {
            ItemKind::Alias(AliasDecl {
                name,
                template_params: None,
                target,
                array_dims,
            })
        });

    let using_namespace = just(Token::Using)
        .ignore_then(just(Token::Namespace))
        .ignore_then(qual_name(targs.clone()))
        .then_ignore(just(Token::Semi))
        .map(ItemKind::UsingNamespace);

    let using_decl = just(Token::Using)
        .ignore_then(qual_name(targs))
        .then_ignore(just(Token::Semi))
        .to(ItemKind::Empty);

    // ── Enums ──

    let enum_decl = just(Token::Enum)
        .ignore_then(just(Token::Class).or(just(Token::Struct)).or_not())
        .ignore_then(ident().or_not())
        .then_ignore(just(Token::Colon).ignore_then(ty.clone()).or_not())
        .then(
            ident()
                .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .then_ignore(just(Token::Semi))
        .map(|(name, variants)| ItemKind::Enum(EnumDecl { name, variants }));

    let record_item = record
        .then_ignore(ident().separated_by(just(Token::Comma)).collect::<Vec<_>>())
        .then_ignore(just(Token::Semi))
        .map(ItemKind::Record);

    let var_item = var_decl(ty, expr)
        .then_ignore(just(Token::Semi))
        .map(ItemKind::Var);

    let item = recursive(|item| {
        let items = item
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let namespace = just(Token::Namespace)
            .ignore_then(ident().or_not())
            .then(items.clone())
            .map(|(name, items)| ItemKind::Namespace(NamespaceDecl { name, items }));

        let extern_block = just(Token::Extern)
            .ignore_then(select! { Token::Str(_) => () })
            .ignore_then(items)
            .map(|items| ItemKind::Namespace(NamespaceDecl { name: None, items }));

        choice((
            select! { Token::Directive(text) => ItemKind::Directive(text) },
            namespace,
            extern_block,
            using_namespace.clone(),
            using_alias.clone(),
            using_decl.clone(),
            typedef.clone(),
            enum_decl.clone(),
            record_item.clone(),
            function.clone().map(ItemKind::Function),
            var_item.clone(),
            just(Token::Semi).to(ItemKind::Empty),
        ))
        .map_with(|kind, e| Item {
            kind,
            span: e.span(),
        })
        .boxed()
    });

    item.repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| TranslationUnit {
            items,
            span: e.span(),
        })
}

// ── Tests ──
