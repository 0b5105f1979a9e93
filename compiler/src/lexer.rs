// Lexer for annotated C++ task sources.
//
// Tokenizes the C++ subset that task kernels are written in. Uses the `logos`
// crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// C++ subset token types.
///
/// `>>` is deliberately not a token: two adjacent `>` tokens close nested
/// template argument lists, and the parser rebuilds the shift operator from
/// them. Preprocessor lines are kept whole as `Directive` tokens.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    // ── Keywords ──
    #[token("template")]
    Template,
    #[token("typename")]
    Typename,
    #[token("class")]
    Class,
    #[token("struct")]
    Struct,
    #[token("union")]
    Union,
    #[token("enum")]
    Enum,
    #[token("namespace")]
    Namespace,
    #[token("using")]
    Using,
    #[token("typedef")]
    Typedef,
    #[token("const")]
    Const,
    #[token("constexpr")]
    Constexpr,
    #[token("static")]
    Static,
    #[token("inline")]
    Inline,
    #[token("extern")]
    Extern,
    #[token("volatile")]
    Volatile,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("sizeof")]
    Sizeof,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("public")]
    Public,
    #[token("private")]
    Private,
    #[token("protected")]
    Protected,

    // ── Punctuators ──
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("...")]
    Ellipsis,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<<")]
    Shl,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("?")]
    Question,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,

    // ── Literals ──
    /// Floating literal. Must win over `Int` for `1.0`, `1e3`, `2.5f`.
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fFlL]?", parse_float)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fFlL]?", parse_float)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fFlL]?", parse_float)]
    Float(f64),

    /// Integer literal: decimal, hex, binary or octal, with optional
    /// digit separators and `u`/`l` suffixes.
    #[regex(r"0[xX][0-9a-fA-F']+[uUlL]*", parse_int)]
    #[regex(r"0[bB][01']+[uUlL]*", parse_int)]
    #[regex(r"[0-9][0-9']*[uUlL]*", parse_int)]
    Int(u64),

    /// String literal; the payload is the raw text between the quotes.
    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    Str(String),

    /// Character literal.
    #[regex(r"'([^'\\\n]|\\.)+'", parse_char)]
    Char(char),

    // ── Identifier ──
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // ── Preprocessor / comments ──
    /// A whole preprocessor line (with `\` continuations), e.g. `#pragma HLS pipeline`.
    #[regex(r"#([^\\\n]|\\[^\n]|\\\r?\n)*", |lex| lex.slice().trim_end().to_string())]
    Directive(String),

    #[regex(r"//[^\n]*", logos::skip)]
    #[token("/*", skip_block_comment)]
    Comment,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Template => "template",
            Token::Typename => "typename",
            Token::Class => "class",
            Token::Struct => "struct",
            Token::Union => "union",
            Token::Enum => "enum",
            Token::Namespace => "namespace",
            Token::Using => "using",
            Token::Typedef => "typedef",
            Token::Const => "const",
            Token::Constexpr => "constexpr",
            Token::Static => "static",
            Token::Inline => "inline",
            Token::Extern => "extern",
            Token::Volatile => "volatile",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::For => "for",
            Token::While => "while",
            Token::Do => "do",
            Token::Switch => "switch",
            Token::Case => "case",
            Token::Default => "default",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Sizeof => "sizeof",
            Token::True => "true",
            Token::False => "false",
            Token::Public => "public",
            Token::Private => "private",
            Token::Protected => "protected",
            Token::ColonColon => "::",
            Token::Colon => ":",
            Token::Semi => ";",
            Token::Comma => ",",
            Token::Ellipsis => "...",
            Token::Dot => ".",
            Token::Arrow => "->",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::Ne => "!=",
            Token::Shl => "<<",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Tilde => "~",
            Token::Question => "?",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::AmpAssign => "&=",
            Token::PipeAssign => "|=",
            Token::CaretAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::Float(v) => return write!(f, "{v}"),
            Token::Int(v) => return write!(f, "{v}"),
            Token::Str(s) => return write!(f, "\"{s}\""),
            Token::Char(c) => return write!(f, "'{c}'"),
            Token::Ident(name) => return write!(f, "{name}"),
            Token::Directive(text) => return write!(f, "{text}"),
            Token::Comment => "<comment>",
        };
        f.write_str(text)
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    let digits: String = lex
        .slice()
        .trim_end_matches(['u', 'U', 'l', 'L'])
        .chars()
        .filter(|&c| c != '\'')
        .collect();
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        u64::from_str_radix(bin, 2).ok()
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse().ok()
    }
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice()
        .trim_end_matches(['f', 'F', 'l', 'L'])
        .parse()
        .ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    Some(slice[1..slice.len() - 1].to_string())
}

/// Skip to the closing `*/`; an unterminated comment is a lex error
/// covering the rest of the input.
fn skip_block_comment(lex: &mut logos::Lexer<'_, Token>) -> logos::FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            logos::FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            logos::FilterResult::Error(())
        }
    }
}

fn parse_char(lex: &mut logos::Lexer<'_, Token>) -> Option<char> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut chars = inner.chars();
    match chars.next()? {
        '\\' => match chars.next()? {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            other => Some(other),
        },
        c => Some(c),
    }
}

// ── Public API ──

/// Lex a C++ source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    fn ident(name: &str) -> Token {
        Token::Ident(name.to_string())
    }

    #[test]
    fn keywords_vs_idents() {
        let tokens = lex_ok("template templated struct structure");
        assert_eq!(
            tokens,
            vec![
                Token::Template,
                ident("templated"),
                Token::Struct,
                ident("structure"),
            ]
        );
    }

    #[test]
    fn integer_bases_and_suffixes() {
        let tokens = lex_ok("42 0x1F 0b101 017 64u 1'000ul");
        assert_eq!(
            tokens,
            vec![
                Token::Int(42),
                Token::Int(31),
                Token::Int(5),
                Token::Int(15),
                Token::Int(64),
                Token::Int(1000),
            ]
        );
    }

    #[test]
    fn floats() {
        let tokens = lex_ok("1.0 2.5f .5 1e3");
        assert_eq!(
            tokens,
            vec![
                Token::Float(1.0),
                Token::Float(2.5),
                Token::Float(0.5),
                Token::Float(1000.0),
            ]
        );
    }

    #[test]
    fn nested_template_close_is_two_tokens() {
        let tokens = lex_ok("tapa::stream<ap_uint<32>>");
        assert_eq!(
            tokens,
            vec![
                ident("tapa"),
                Token::ColonColon,
                ident("stream"),
                Token::Lt,
                ident("ap_uint"),
                Token::Lt,
                Token::Int(32),
                Token::Gt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn stream_operators() {
        let tokens = lex_ok("out << in.read();");
        assert_eq!(
            tokens,
            vec![
                ident("out"),
                Token::Shl,
                ident("in"),
                Token::Dot,
                ident("read"),
                Token::LParen,
                Token::RParen,
                Token::Semi,
            ]
        );
    }

    #[test]
    fn directive_is_one_token() {
        let tokens = lex_ok("#pragma HLS pipeline II=1\nx;");
        assert_eq!(
            tokens,
            vec![
                Token::Directive("#pragma HLS pipeline II=1".into()),
                ident("x"),
                Token::Semi,
            ]
        );
    }

    #[test]
    fn directive_with_continuation() {
        let tokens = lex_ok("#define N \\\n  (4)\n");
        assert_eq!(tokens, vec![Token::Directive("#define N \\\n  (4)".into())]);
    }

    #[test]
    fn comments_skipped() {
        let tokens = lex_ok("a // line\n/* block\n * more */ b");
        assert_eq!(tokens, vec![ident("a"), ident("b")]);
    }

    #[test]
    fn doc_style_block_comments() {
        let tokens = lex_ok("/*\n * Vector add\n **/ x /***/ y /* a*b */ z");
        assert_eq!(tokens, vec![ident("x"), ident("y"), ident("z")]);
    }

    #[test]
    fn unterminated_block_comment_is_an_error() {
        let result = lex("a /* never closed");
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span.end, 17);
    }

    #[test]
    fn string_and_char_literals() {
        let tokens = lex_ok(r#""q_ab" 'x' '\n'"#);
        assert_eq!(
            tokens,
            vec![
                Token::Str("q_ab".into()),
                Token::Char('x'),
                Token::Char('\n'),
            ]
        );
    }

    #[test]
    fn spans_correct() {
        let result = lex("int n");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 3 });
        assert_eq!(result.tokens[1].1, Span { start: 4, end: 5 });
    }

    #[test]
    fn error_recovery() {
        let result = lex("a @ b");
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![ident("a"), ident("b")]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 2, end: 3 });
    }
}
