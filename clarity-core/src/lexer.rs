//! Lexer for Clarity source text.

use core::fmt;

use crate::diagnostic::Diagnostic;
use crate::span::{FileId, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,

    // punctuation / operators
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Arrow,    // ->
    FatArrow, // =>
    Bar,      // |
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    Plus,
    PlusPlus,
    Minus,
    Star,
    Slash,
    Percent,
    Equals,
    Bang,

    // literals / identifiers
    Ident(String),
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),

    // keywords
    KwFunction,
    KwExport,
    KwImport,
    KwFrom,
    KwType,
    KwLet,
    KwIf,
    KwElse,
    KwMatch,
    KwEffect,
    KwAnd,
    KwOr,
}

impl TokenKind {
    /// Keywords that may start a top-level declaration. The parser
    /// resynchronizes on these after an error.
    pub fn starts_decl(&self) -> bool {
        matches!(
            self,
            TokenKind::KwFunction
                | TokenKind::KwExport
                | TokenKind::KwImport
                | TokenKind::KwType
                | TokenKind::KwEffect
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Eof => "end of file",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Comma => "`,`",
            TokenKind::Colon => "`:`",
            TokenKind::Semicolon => "`;`",
            TokenKind::Dot => "`.`",
            TokenKind::Arrow => "`->`",
            TokenKind::FatArrow => "`=>`",
            TokenKind::Bar => "`|`",
            TokenKind::Lt => "`<`",
            TokenKind::Gt => "`>`",
            TokenKind::Le => "`<=`",
            TokenKind::Ge => "`>=`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Plus => "`+`",
            TokenKind::PlusPlus => "`++`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Equals => "`=`",
            TokenKind::Bang => "`!`",
            TokenKind::Ident(name) => return write!(f, "identifier `{name}`"),
            TokenKind::IntLiteral(v) => return write!(f, "integer `{v}`"),
            TokenKind::FloatLiteral(v) => return write!(f, "float `{v}`"),
            TokenKind::BoolLiteral(v) => return write!(f, "`{v}`"),
            TokenKind::StringLiteral(_) => "string literal",
            TokenKind::KwFunction => "`function`",
            TokenKind::KwExport => "`export`",
            TokenKind::KwImport => "`import`",
            TokenKind::KwFrom => "`from`",
            TokenKind::KwType => "`type`",
            TokenKind::KwLet => "`let`",
            TokenKind::KwIf => "`if`",
            TokenKind::KwElse => "`else`",
            TokenKind::KwMatch => "`match`",
            TokenKind::KwEffect => "`effect`",
            TokenKind::KwAnd => "`and`",
            TokenKind::KwOr => "`or`",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

struct LexState<'a> {
    file_id: FileId,
    src: &'a str,
    diagnostics: Vec<Diagnostic>,
    tokens: Vec<Token>,
}

/// Tokenize `src`. The token list always ends with [`TokenKind::Eof`];
/// malformed input produces diagnostics and lexing continues.
pub fn lex(file_id: FileId, src: &str) -> LexResult {
    let mut state = LexState {
        file_id,
        src,
        diagnostics: Vec::new(),
        tokens: Vec::new(),
    };
    state.lex_all();
    let end = src.len();
    state.push_token(TokenKind::Eof, end, end);
    LexResult {
        tokens: state.tokens,
        diagnostics: state.diagnostics,
    }
}

impl<'a> LexState<'a> {
    fn lex_all(&mut self) {
        let text = self.src;
        let bytes = text.as_bytes();
        let mut i = 0usize;
        while i < bytes.len() {
            let c = bytes[i];
            if c.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            let next = bytes.get(i + 1).copied();
            match c {
                b'/' if next == Some(b'/') => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                b'(' => i = self.single(TokenKind::LParen, i),
                b')' => i = self.single(TokenKind::RParen, i),
                b'{' => i = self.single(TokenKind::LBrace, i),
                b'}' => i = self.single(TokenKind::RBrace, i),
                b'[' => i = self.single(TokenKind::LBracket, i),
                b']' => i = self.single(TokenKind::RBracket, i),
                b',' => i = self.single(TokenKind::Comma, i),
                b':' => i = self.single(TokenKind::Colon, i),
                b';' => i = self.single(TokenKind::Semicolon, i),
                b'.' => i = self.single(TokenKind::Dot, i),
                b'|' => i = self.single(TokenKind::Bar, i),
                b'*' => i = self.single(TokenKind::Star, i),
                b'/' => i = self.single(TokenKind::Slash, i),
                b'%' => i = self.single(TokenKind::Percent, i),
                b'-' if next == Some(b'>') => i = self.double(TokenKind::Arrow, i),
                b'-' => i = self.single(TokenKind::Minus, i),
                b'+' if next == Some(b'+') => i = self.double(TokenKind::PlusPlus, i),
                b'+' => i = self.single(TokenKind::Plus, i),
                b'=' if next == Some(b'>') => i = self.double(TokenKind::FatArrow, i),
                b'=' if next == Some(b'=') => i = self.double(TokenKind::EqEq, i),
                b'=' => i = self.single(TokenKind::Equals, i),
                b'!' if next == Some(b'=') => i = self.double(TokenKind::NotEq, i),
                b'!' => i = self.single(TokenKind::Bang, i),
                b'<' if next == Some(b'=') => i = self.double(TokenKind::Le, i),
                b'<' => i = self.single(TokenKind::Lt, i),
                b'>' if next == Some(b'=') => i = self.double(TokenKind::Ge, i),
                b'>' => i = self.single(TokenKind::Gt, i),
                b'"' => i = self.lex_string(i),
                b'0'..=b'9' => i = self.lex_number(i),
                _ if is_ident_start(c) => {
                    let start = i;
                    i += 1;
                    while i < bytes.len() && is_ident_continue(bytes[i]) {
                        i += 1;
                    }
                    let kind = match &text[start..i] {
                        "function" => TokenKind::KwFunction,
                        "export" => TokenKind::KwExport,
                        "import" => TokenKind::KwImport,
                        "from" => TokenKind::KwFrom,
                        "type" => TokenKind::KwType,
                        "let" => TokenKind::KwLet,
                        "if" => TokenKind::KwIf,
                        "else" => TokenKind::KwElse,
                        "match" => TokenKind::KwMatch,
                        "effect" => TokenKind::KwEffect,
                        "and" => TokenKind::KwAnd,
                        "or" => TokenKind::KwOr,
                        "true" => TokenKind::BoolLiteral(true),
                        "false" => TokenKind::BoolLiteral(false),
                        other => TokenKind::Ident(other.to_string()),
                    };
                    self.push_token(kind, start, i);
                }
                _ => {
                    let width = text[i..].chars().next().map_or(1, char::len_utf8);
                    self.unknown(i, i + width);
                    i += width;
                }
            }
        }
    }

    fn single(&mut self, kind: TokenKind, i: usize) -> usize {
        self.push_token(kind, i, i + 1);
        i + 1
    }

    fn double(&mut self, kind: TokenKind, i: usize) -> usize {
        self.push_token(kind, i, i + 2);
        i + 2
    }

    fn lex_string(&mut self, start: usize) -> usize {
        let text = self.src;
        let bytes = text.as_bytes();
        let mut i = start + 1;
        let mut buf = String::new();
        let mut closed = false;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    closed = true;
                    i += 1;
                    break;
                }
                b'\n' => break,
                b'\\' if i + 1 < bytes.len() => {
                    let ch = match bytes[i + 1] {
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'"' => '"',
                        b'0' => '\0',
                        other => {
                            self.diagnostics.push(Diagnostic::error(
                                "invalid escape in string literal",
                                Span::new(self.file_id, i as u32, (i + 2) as u32),
                            ));
                            other as char
                        }
                    };
                    buf.push(ch);
                    i += 2;
                }
                _ => {
                    if let Some(ch) = text[i..].chars().next() {
                        buf.push(ch);
                        i += ch.len_utf8();
                    } else {
                        i += 1;
                    }
                }
            }
        }
        if closed {
            self.push_token(TokenKind::StringLiteral(buf), start, i);
        } else {
            self.diagnostics.push(Diagnostic::error(
                "unterminated string literal",
                Span::new(self.file_id, start as u32, i as u32),
            ));
        }
        i
    }

    fn lex_number(&mut self, start: usize) -> usize {
        let text = self.src;
        let bytes = text.as_bytes();
        let mut i = start;
        let mut has_dot = false;
        while i < bytes.len() {
            match bytes[i] {
                b'0'..=b'9' | b'_' => i += 1,
                // `1.` followed by a digit is a float; `xs.0` style access does not exist
                b'.' if !has_dot && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                    has_dot = true;
                    i += 1;
                }
                _ => break,
            }
        }
        let lexeme: String = text[start..i].chars().filter(|c| *c != '_').collect();
        let span = Span::new(self.file_id, start as u32, i as u32);
        if has_dot {
            match lexeme.parse::<f64>() {
                Ok(v) => self.push_token(TokenKind::FloatLiteral(v), start, i),
                Err(_) => self
                    .diagnostics
                    .push(Diagnostic::error("invalid float literal", span)),
            }
        } else {
            match lexeme.parse::<i64>() {
                Ok(v) => self.push_token(TokenKind::IntLiteral(v), start, i),
                Err(_) => self.diagnostics.push(
                    Diagnostic::error("integer literal out of range", span)
                        .with_help("Int64 literals must lie within -2^63..2^63"),
                ),
            }
        }
        i
    }

    fn push_token(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(self.file_id, start as u32, end as u32),
        });
    }

    fn unknown(&mut self, start: usize, end: usize) {
        let span = Span::new(self.file_id, start as u32, end as u32);
        self.diagnostics
            .push(Diagnostic::error("unknown token", span));
    }
}

fn is_ident_start(b: u8) -> bool {
    (b as char).is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    (b as char).is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(FileId(0), src)
            .tokens
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_function_header() {
        let toks = kinds("effect[Log] function f(x: Int64) -> Unit {}");
        assert_eq!(
            toks,
            vec![
                TokenKind::KwEffect,
                TokenKind::LBracket,
                TokenKind::Ident("Log".into()),
                TokenKind::RBracket,
                TokenKind::KwFunction,
                TokenKind::Ident("f".into()),
                TokenKind::LParen,
                TokenKind::Ident("x".into()),
                TokenKind::Colon,
                TokenKind::Ident("Int64".into()),
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Ident("Unit".into()),
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators_win() {
        let toks = kinds("a ++ b => c <= d != e == f >= g");
        assert!(toks.contains(&TokenKind::PlusPlus));
        assert!(toks.contains(&TokenKind::FatArrow));
        assert!(toks.contains(&TokenKind::Le));
        assert!(toks.contains(&TokenKind::NotEq));
        assert!(toks.contains(&TokenKind::EqEq));
        assert!(toks.contains(&TokenKind::Ge));
    }

    #[test]
    fn numbers_and_strings() {
        let toks = kinds("42 3.5 \"a\\nb\" 1_000");
        assert_eq!(toks[0], TokenKind::IntLiteral(42));
        assert_eq!(toks[1], TokenKind::FloatLiteral(3.5));
        assert_eq!(toks[2], TokenKind::StringLiteral("a\nb".into()));
        assert_eq!(toks[3], TokenKind::IntLiteral(1000));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("let // a comment\nx");
        assert_eq!(
            toks,
            vec![TokenKind::KwLet, TokenKind::Ident("x".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn reports_unterminated_string_and_continues() {
        let res = lex(FileId(0), "\"abc\nlet");
        assert_eq!(res.diagnostics.len(), 1);
        assert!(res.diagnostics[0].message.contains("unterminated"));
        assert!(res.tokens.iter().any(|t| t.kind == TokenKind::KwLet));
    }

    #[test]
    fn unknown_character_is_diagnosed() {
        let res = lex(FileId(0), "a @ b");
        assert_eq!(res.diagnostics.len(), 1);
        assert_eq!(res.diagnostics[0].span(), Span::new(FileId(0), 2, 3));
    }
}
