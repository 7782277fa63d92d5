//! Recursive-descent parser for Clarity surface syntax.
//!
//! Every `parse_*` method returns `None` after recording a diagnostic.
//! Top-level declarations are the recovery unit: after a failed
//! declaration the parser skips to the next declaration keyword, so one
//! file can report several independent syntax errors.

use crate::ast::*;
use crate::diagnostic::Diagnostic;
use crate::lexer::{LexResult, Token, TokenKind};
use crate::span::{FileId, Span};

/// Expressions nested deeper than this are rejected instead of risking
/// stack exhaustion in later recursive passes.
const MAX_NESTING: usize = 200;

#[derive(Debug)]
pub struct ParseResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse_tokens(file_id: FileId, lex: LexResult) -> ParseResult {
    let mut parser = Parser {
        file_id,
        tokens: lex.tokens,
        pos: 0,
        diagnostics: lex.diagnostics,
        depth: 0,
    };
    let module = parser.parse_module();
    ParseResult {
        module,
        diagnostics: parser.diagnostics,
    }
}

/// Lex and parse in one step.
pub fn parse_source(file_id: FileId, src: &str) -> ParseResult {
    parse_tokens(file_id, crate::lexer::lex(file_id, src))
}

struct Parser {
    file_id: FileId,
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: usize,
}

impl Parser {
    fn parse_module(&mut self) -> Module {
        let start = self.peek_span();
        let mut decls = Vec::new();
        while !self.is_eof() {
            let before = self.pos;
            match self.parse_decl() {
                Some(decl) => decls.push(decl),
                None => self.synchronize(before),
            }
        }
        let end = self.peek_span();
        Module {
            decls,
            span: start.to(end),
        }
    }

    /// Skip to the next token that can start a declaration, always
    /// making progress.
    fn synchronize(&mut self, failed_at: usize) {
        if self.pos == failed_at {
            self.next();
        }
        while !self.is_eof() && !self.peek().kind.starts_decl() {
            self.next();
        }
    }

    fn parse_decl(&mut self) -> Option<Decl> {
        let start = self.peek_span();
        if self.check(&TokenKind::KwImport) {
            return self.parse_import().map(Decl::Import);
        }
        let mut exported = false;
        let mut effects = None;
        loop {
            if self.consume_if(&TokenKind::KwExport) {
                exported = true;
            } else if self.check(&TokenKind::KwEffect) {
                effects = Some(self.parse_effect_list()?);
            } else {
                break;
            }
        }
        match self.peek().kind {
            TokenKind::KwFunction => self
                .parse_function(start, exported, effects.unwrap_or_default())
                .map(Decl::Function),
            TokenKind::KwType if effects.is_none() => {
                self.parse_type_decl(start, exported).map(Decl::Type)
            }
            _ => {
                let tok = self.peek().clone();
                self.diagnostics.push(Diagnostic::error(
                    format!("expected a declaration, found {}", tok.kind),
                    tok.span,
                ).with_help("top-level items are `import`, `type` and `function` declarations"));
                None
            }
        }
    }

    fn parse_import(&mut self) -> Option<ImportDecl> {
        let start = self.expect(&TokenKind::KwImport)?;
        self.expect(&TokenKind::LBrace)?;
        let mut names = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            names.push(self.expect_ident()?);
            if !self.consume_if(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        self.expect(&TokenKind::KwFrom)?;
        let tok = self.peek().clone();
        let path = match tok.kind {
            TokenKind::StringLiteral(path) => {
                self.next();
                path
            }
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!("expected module path string, found {other}"),
                    tok.span,
                ));
                return None;
            }
        };
        self.consume_if(&TokenKind::Semicolon);
        Some(ImportDecl {
            names,
            path,
            span: start.to(tok.span),
        })
    }

    fn parse_effect_list(&mut self) -> Option<Vec<Ident>> {
        self.expect(&TokenKind::KwEffect)?;
        self.expect(&TokenKind::LBracket)?;
        let mut effects = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            effects.push(self.expect_ident()?);
            if !self.consume_if(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Some(effects)
    }

    fn parse_type_params(&mut self) -> Option<Vec<Ident>> {
        let mut params = Vec::new();
        if self.consume_if(&TokenKind::Lt) {
            while !self.check(&TokenKind::Gt) {
                params.push(self.expect_ident()?);
                if !self.consume_if(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt)?;
        }
        Some(params)
    }

    fn parse_function(
        &mut self,
        start: Span,
        exported: bool,
        effects: Vec<Ident>,
    ) -> Option<FunctionDecl> {
        self.expect(&TokenKind::KwFunction)?;
        let name = self.expect_ident()?;
        let type_params = self.parse_type_params()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let pname = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            params.push(Param { name: pname, ty });
            if !self.consume_if(&TokenKind::Comma) {
                break;
            }
        }
        let close = self.expect(&TokenKind::RParen)?;
        let result = if self.consume_if(&TokenKind::Arrow) {
            self.parse_type_expr()?
        } else {
            TypeExpr {
                kind: TypeExprKind::Named {
                    name: "Unit".to_string(),
                    args: Vec::new(),
                },
                span: close,
            }
        };
        let body = self.parse_block()?;
        let span = start.to(body.span);
        Some(FunctionDecl {
            name,
            type_params,
            params,
            result,
            effects,
            body,
            exported,
            span,
        })
    }

    fn parse_type_decl(&mut self, start: Span, exported: bool) -> Option<TypeDecl> {
        self.expect(&TokenKind::KwType)?;
        let name = self.expect_ident()?;
        let type_params = self.parse_type_params()?;
        self.expect(&TokenKind::Equals)?;
        let kind = if self.consume_if(&TokenKind::LBrace) {
            let fields = self.parse_fields(&TokenKind::RBrace)?;
            self.expect(&TokenKind::RBrace)?;
            TypeDeclKind::Record(fields)
        } else {
            let mut variants = Vec::new();
            self.consume_if(&TokenKind::Bar);
            loop {
                let vname = self.expect_ident()?;
                let mut vspan = vname.span;
                let fields = if self.consume_if(&TokenKind::LParen) {
                    let fields = self.parse_fields(&TokenKind::RParen)?;
                    vspan = vspan.to(self.expect(&TokenKind::RParen)?);
                    fields
                } else {
                    Vec::new()
                };
                variants.push(VariantDecl {
                    name: vname,
                    fields,
                    span: vspan,
                });
                if !self.consume_if(&TokenKind::Bar) {
                    break;
                }
            }
            TypeDeclKind::Union(variants)
        };
        let end = self.prev_span();
        self.consume_if(&TokenKind::Semicolon);
        Some(TypeDecl {
            name,
            type_params,
            kind,
            exported,
            span: start.to(end),
        })
    }

    fn parse_fields(&mut self, close: &TokenKind) -> Option<Vec<FieldDecl>> {
        let mut fields = Vec::new();
        while !self.check(close) {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            fields.push(FieldDecl { name, ty });
            if !self.consume_if(&TokenKind::Comma) {
                break;
            }
        }
        Some(fields)
    }

    fn parse_type_expr(&mut self) -> Option<TypeExpr> {
        let start = self.peek_span();
        if self.consume_if(&TokenKind::LParen) {
            let mut params = Vec::new();
            while !self.check(&TokenKind::RParen) {
                params.push(self.parse_type_expr()?);
                if !self.consume_if(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
            self.expect(&TokenKind::Arrow)?;
            let result = self.parse_type_expr()?;
            let span = start.to(result.span);
            return Some(TypeExpr {
                kind: TypeExprKind::Function {
                    params,
                    result: Box::new(result),
                },
                span,
            });
        }
        let name = self.expect_ident()?;
        let mut span = name.span;
        let mut args = Vec::new();
        if self.consume_if(&TokenKind::Lt) {
            while !self.check(&TokenKind::Gt) {
                args.push(self.parse_type_expr()?);
                if !self.consume_if(&TokenKind::Comma) {
                    break;
                }
            }
            span = span.to(self.expect(&TokenKind::Gt)?);
        }
        Some(TypeExpr {
            kind: TypeExprKind::Named {
                name: name.name,
                args,
            },
            span,
        })
    }

    fn parse_block(&mut self) -> Option<Block> {
        let open = self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        let mut tail = None;
        while !self.check(&TokenKind::RBrace) {
            if self.is_eof() {
                self.diagnostics.push(
                    Diagnostic::error("unclosed block", self.peek_span())
                        .with_secondary_label(open, Some("block opened here".to_string())),
                );
                return None;
            }
            if self.check(&TokenKind::KwLet) {
                stmts.push(self.parse_let()?);
                continue;
            }
            let expr = self.parse_expr()?;
            if self.consume_if(&TokenKind::Semicolon) {
                stmts.push(Stmt::Expr(expr));
            } else if self.check(&TokenKind::RBrace) {
                tail = Some(Box::new(expr));
            } else if expr.kind.is_block_like() {
                stmts.push(Stmt::Expr(expr));
            } else {
                let tok = self.peek().clone();
                self.diagnostics.push(Diagnostic::error(
                    format!("expected `;` or `}}`, found {}", tok.kind),
                    tok.span,
                ));
                return None;
            }
        }
        let close = self.expect(&TokenKind::RBrace)?;
        Some(Block {
            stmts,
            tail,
            span: open.to(close),
        })
    }

    fn parse_let(&mut self) -> Option<Stmt> {
        let start = self.expect(&TokenKind::KwLet)?;
        let name = self.expect_ident()?;
        let ty = if self.consume_if(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Equals)?;
        let value = self.parse_expr()?;
        let end = self.expect(&TokenKind::Semicolon)?;
        Some(Stmt::Let {
            name,
            ty,
            value,
            span: start.to(end),
        })
    }

    fn parse_expr(&mut self) -> Option<Expr> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            self.depth -= 1;
            self.diagnostics.push(Diagnostic::error(
                "expression is nested too deeply",
                self.peek_span(),
            ));
            return None;
        }
        let result = self.parse_binary(0);
        self.depth -= 1;
        result
    }

    /// Precedence climbing over the binary operator table.
    fn parse_binary(&mut self, min_prec: u8) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = binary_op(&self.peek().kind) {
            if prec < min_prec {
                break;
            }
            self.next();
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let start = self.peek_span();
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                self.next();
                let operand = self.parse_unary()?;
                // fold `-<literal>` so that i64::MIN stays representable
                if let (UnaryOp::Neg, ExprKind::Literal(Literal::Float(v))) = (op, &operand.kind) {
                    return Some(Expr {
                        kind: ExprKind::Literal(Literal::Float(-v)),
                        span: start.to(operand.span),
                    });
                }
                if let (UnaryOp::Neg, ExprKind::Literal(Literal::Int(v))) = (op, &operand.kind) {
                    return Some(Expr {
                        kind: ExprKind::Literal(Literal::Int(v.wrapping_neg())),
                        span: start.to(operand.span),
                    });
                }
                let span = start.to(operand.span);
                Some(Expr {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.consume_if(&TokenKind::LParen) {
                let mut args = Vec::new();
                while !self.check(&TokenKind::RParen) {
                    args.push(self.parse_expr()?);
                    if !self.consume_if(&TokenKind::Comma) {
                        break;
                    }
                }
                let close = self.expect(&TokenKind::RParen)?;
                let span = expr.span.to(close);
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                };
            } else if self.consume_if(&TokenKind::Dot) {
                let field = self.expect_ident()?;
                let span = expr.span.to(field.span);
                expr = Expr {
                    kind: ExprKind::Field {
                        base: Box::new(expr),
                        field,
                    },
                    span,
                };
            } else {
                return Some(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let tok = self.peek().clone();
        let lit = |kind| {
            Some(Expr {
                kind: ExprKind::Literal(kind),
                span: tok.span,
            })
        };
        match tok.kind {
            TokenKind::IntLiteral(v) => {
                self.next();
                lit(Literal::Int(v))
            }
            TokenKind::FloatLiteral(v) => {
                self.next();
                lit(Literal::Float(v))
            }
            TokenKind::StringLiteral(ref s) => {
                self.next();
                lit(Literal::Str(s.clone()))
            }
            TokenKind::BoolLiteral(b) => {
                self.next();
                lit(Literal::Bool(b))
            }
            TokenKind::Ident(ref name) => {
                self.next();
                Some(Expr {
                    kind: ExprKind::Ident(name.clone()),
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.next();
                if let Some(close) = self.consume_span(&TokenKind::RParen) {
                    return Some(Expr {
                        kind: ExprKind::Literal(Literal::Unit),
                        span: tok.span.to(close),
                    });
                }
                let inner = self.parse_expr()?;
                let close = self.expect(&TokenKind::RParen)?;
                Some(Expr {
                    kind: inner.kind,
                    span: tok.span.to(close),
                })
            }
            TokenKind::LBracket => {
                self.next();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.consume_if(&TokenKind::Comma) {
                        break;
                    }
                }
                let close = self.expect(&TokenKind::RBracket)?;
                Some(Expr {
                    kind: ExprKind::List(items),
                    span: tok.span.to(close),
                })
            }
            TokenKind::LBrace => {
                let is_record = matches!(self.peek_kind_at(1), Some(TokenKind::Ident(_)))
                    && matches!(self.peek_kind_at(2), Some(TokenKind::Colon));
                if is_record {
                    self.parse_record_literal()
                } else {
                    let block = self.parse_block()?;
                    let span = block.span;
                    Some(Expr {
                        kind: ExprKind::Block(block),
                        span,
                    })
                }
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwMatch => self.parse_match(),
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!("expected expression, found {other}"),
                    tok.span,
                ));
                None
            }
        }
    }

    fn parse_record_literal(&mut self) -> Option<Expr> {
        let open = self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((name, value));
            if !self.consume_if(&TokenKind::Comma) {
                break;
            }
        }
        let close = self.expect(&TokenKind::RBrace)?;
        Some(Expr {
            kind: ExprKind::Record(fields),
            span: open.to(close),
        })
    }

    fn parse_if(&mut self) -> Option<Expr> {
        let start = self.expect(&TokenKind::KwIf)?;
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let mut end = then_branch.span;
        let else_branch = if self.consume_if(&TokenKind::KwElse) {
            let e = if self.check(&TokenKind::KwIf) {
                self.parse_if()?
            } else {
                let block = self.parse_block()?;
                let span = block.span;
                Expr {
                    kind: ExprKind::Block(block),
                    span,
                }
            };
            end = e.span;
            Some(Box::new(e))
        } else {
            None
        };
        Some(Expr {
            kind: ExprKind::If {
                cond: Box::new(cond),
                then_branch,
                else_branch,
            },
            span: start.to(end),
        })
    }

    fn parse_match(&mut self) -> Option<Expr> {
        let start = self.expect(&TokenKind::KwMatch)?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let pattern = self.parse_pattern()?;
            self.expect(&TokenKind::FatArrow)?;
            let body = self.parse_expr()?;
            let span = pattern.span.to(body.span);
            let needs_comma = !body.kind.is_block_like();
            arms.push(MatchArm {
                pattern,
                body,
                span,
            });
            if !self.consume_if(&TokenKind::Comma) && needs_comma {
                break;
            }
        }
        let close = self.expect(&TokenKind::RBrace)?;
        Some(Expr {
            kind: ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            span: start.to(close),
        })
    }

    fn parse_pattern(&mut self) -> Option<Pattern> {
        let tok = self.peek().clone();
        let lit = |l| {
            Some(Pattern {
                kind: PatternKind::Literal(l),
                span: tok.span,
            })
        };
        match tok.kind {
            TokenKind::IntLiteral(v) => {
                self.next();
                lit(Literal::Int(v))
            }
            TokenKind::FloatLiteral(v) => {
                self.next();
                lit(Literal::Float(v))
            }
            TokenKind::StringLiteral(ref s) => {
                self.next();
                lit(Literal::Str(s.clone()))
            }
            TokenKind::BoolLiteral(b) => {
                self.next();
                lit(Literal::Bool(b))
            }
            TokenKind::Minus => {
                self.next();
                let num = self.peek().clone();
                let value = match num.kind {
                    TokenKind::IntLiteral(v) => Literal::Int(v.wrapping_neg()),
                    TokenKind::FloatLiteral(v) => Literal::Float(-v),
                    other => {
                        self.diagnostics.push(Diagnostic::error(
                            format!("expected numeric literal after `-`, found {other}"),
                            num.span,
                        ));
                        return None;
                    }
                };
                self.next();
                Some(Pattern {
                    kind: PatternKind::Literal(value),
                    span: tok.span.to(num.span),
                })
            }
            TokenKind::Ident(ref name) if name == "_" => {
                self.next();
                Some(Pattern {
                    kind: PatternKind::Wildcard,
                    span: tok.span,
                })
            }
            TokenKind::Ident(ref name) => {
                self.next();
                let ident = Ident {
                    name: name.clone(),
                    span: tok.span,
                };
                if !self.consume_if(&TokenKind::LParen) {
                    return Some(Pattern {
                        kind: PatternKind::Binding(ident.name),
                        span: tok.span,
                    });
                }
                let mut fields = Vec::new();
                while !self.check(&TokenKind::RParen) {
                    fields.push(self.parse_pattern()?);
                    if !self.consume_if(&TokenKind::Comma) {
                        break;
                    }
                }
                let close = self.expect(&TokenKind::RParen)?;
                Some(Pattern {
                    kind: PatternKind::Constructor {
                        name: ident,
                        fields,
                    },
                    span: tok.span.to(close),
                })
            }
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!("expected pattern, found {other}"),
                    tok.span,
                ));
                None
            }
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Option<Span> {
        if let Some(span) = self.consume_span(kind) {
            return Some(span);
        }
        let tok = self.peek().clone();
        self.diagnostics.push(Diagnostic::error(
            format!("expected {kind}, found {}", tok.kind),
            tok.span,
        ));
        None
    }

    fn expect_ident(&mut self) -> Option<Ident> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(name) => {
                self.next();
                Some(Ident {
                    name,
                    span: tok.span,
                })
            }
            other => {
                self.diagnostics.push(Diagnostic::error(
                    format!("expected identifier, found {other}"),
                    tok.span,
                ));
                None
            }
        }
    }

    fn consume_span(&mut self, kind: &TokenKind) -> Option<Span> {
        if self.check(kind) {
            self.next().map(|t| t.span)
        } else {
            None
        }
    }

    fn consume_if(&mut self, kind: &TokenKind) -> bool {
        self.consume_span(kind).is_some()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        core::mem::discriminant(&self.peek().kind) == core::mem::discriminant(kind)
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Span {
        self.peek().span
    }

    fn prev_span(&self) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(tok) => tok.span,
            None => Span::point(self.file_id, 0),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() && self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }
}

fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::KwOr => (BinaryOp::Or, 1),
        TokenKind::KwAnd => (BinaryOp::And, 2),
        TokenKind::EqEq => (BinaryOp::Eq, 3),
        TokenKind::NotEq => (BinaryOp::Ne, 3),
        TokenKind::Lt => (BinaryOp::Lt, 4),
        TokenKind::Le => (BinaryOp::Le, 4),
        TokenKind::Gt => (BinaryOp::Gt, 4),
        TokenKind::Ge => (BinaryOp::Ge, 4),
        TokenKind::Plus => (BinaryOp::Add, 5),
        TokenKind::Minus => (BinaryOp::Sub, 5),
        TokenKind::PlusPlus => (BinaryOp::Concat, 5),
        TokenKind::Star => (BinaryOp::Mul, 6),
        TokenKind::Slash => (BinaryOp::Div, 6),
        TokenKind::Percent => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(entry)
}
