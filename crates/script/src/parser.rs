//! Recursive-descent parser.  Parsing stops at the first syntax error.

use std::sync::Arc;

use crate::ast::*;
use crate::diag::{Diagnostic, Span};
use crate::lexer::{self, TemplatePart, Token, TokenKind};

/// Maximum syntactic nesting (blocks, parenthesised expressions, nested
/// types).  Deeper input is rejected with a diagnostic.
pub const MAX_NESTING: usize = 64;

type PResult<T> = Result<T, Diagnostic>;

/// Parse an ordinary program or function source.
pub fn parse_program(src: &str) -> Result<Program, Vec<Diagnostic>> {
    parse(src, false)
}

/// Parse declaration text; `declare` statements are only legal here.
pub(crate) fn parse_ambient(src: &str) -> Result<Program, Vec<Diagnostic>> {
    parse(src, true)
}

/// Parse a standalone type such as `string[] | null`.
pub fn parse_type(src: &str) -> Result<TypeExpr, Diagnostic> {
    let tokens = lexer::tokenize(src)?;
    let mut parser = Parser::new(src, tokens, false);
    let ty = parser.type_expr()?;
    parser.expect_eof()?;
    Ok(ty)
}

fn parse(src: &str, ambient: bool) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::tokenize(src).map_err(|d| vec![d])?;
    let mut parser = Parser::new(src, tokens, ambient);
    parser.program().map_err(|d| vec![d])
}

pub(crate) struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    ambient: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, tokens: Vec<Token>, ambient: bool) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            depth: 0,
            ambient,
        }
    }

    // ── token plumbing ───────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_punct(p)
    }

    fn at_keyword(&self, k: &str) -> bool {
        self.peek().is_keyword(k)
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.at_keyword(k) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Span> {
        if self.at_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.error_here(format!("'{p}' expected.")))
        }
    }

    fn expect_eof(&self) -> PResult<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(self.peek().span, message).with_code("parse")
    }

    fn unexpected(&self) -> Diagnostic {
        let token = self.peek();
        match token.kind {
            TokenKind::Eof => self.error_here("Unexpected end of input."),
            _ => self.error_here(format!("Unexpected token '{}'.", token.describe())),
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.at_punct("}") || self.at_eof() || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.error_here("';' expected."))
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("Program is nested too deeply."));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Run `f`, rewinding to the current token if it fails.
    fn attempt<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<Option<T>>) -> Option<T> {
        let (pos, depth) = (self.pos, self.depth);
        match f(self) {
            Ok(Some(value)) => Some(value),
            _ => {
                self.pos = pos;
                self.depth = depth;
                None
            }
        }
    }

    fn ident_name(&mut self) -> PResult<(String, Span)> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok((name, token.span))
            }
            TokenKind::Keyword(k) if lexer::is_unsupported(k) => {
                Err(self.error_here(format!("'{k}' is not supported.")))
            }
            _ => Err(self.error_here("Identifier expected.")),
        }
    }

    /// Identifier, keyword or literal accepted after `.` or as an object key.
    fn property_name(&mut self) -> PResult<String> {
        let token = self.peek().clone();
        let name = match token.kind {
            TokenKind::Ident(name) => name,
            TokenKind::Keyword(k) => k.to_string(),
            TokenKind::Str(s) => s,
            TokenKind::Number(n) => crate::emit::format_number(n),
            _ => return Err(self.error_here("Identifier expected.")),
        };
        self.pos += 1;
        Ok(name)
    }

    // ── statements ───────────────────────────────────────────────────────

    fn program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(|p| p.statement_inner())
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        let token = self.peek().clone();
        let start = token.span;
        let kind = match &token.kind {
            TokenKind::Punct("{") => StmtKind::Block(self.block()?),
            TokenKind::Punct(";") => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Keyword("let" | "const" | "var") => {
                let decl = self.var_decl()?;
                self.consume_semicolon()?;
                StmtKind::VarDecl(decl)
            }
            TokenKind::Keyword("function") => {
                self.advance();
                StmtKind::Function(Arc::new(self.function_rest(start, false, true)?))
            }
            TokenKind::Ident(word)
                if word == "async"
                    && self.peek_at(1).is_keyword("function")
                    && !self.peek_at(1).newline_before =>
            {
                self.advance();
                self.advance();
                StmtKind::Function(Arc::new(self.function_rest(start, true, true)?))
            }
            TokenKind::Keyword("return") => {
                self.advance();
                let arg = if self.at_punct(";")
                    || self.at_punct("}")
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                StmtKind::Return(arg)
            }
            TokenKind::Keyword("if") => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let consequent = Box::new(self.statement()?);
                let alternate = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                }
            }
            TokenKind::Keyword("while") => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                StmtKind::While { test, body }
            }
            TokenKind::Keyword("do") => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword("while") {
                    return Err(self.error_here("'while' expected."));
                }
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                StmtKind::DoWhile { body, test }
            }
            TokenKind::Keyword("for") => self.for_statement()?,
            TokenKind::Keyword("break") => {
                self.advance();
                self.consume_semicolon()?;
                StmtKind::Break
            }
            TokenKind::Keyword("continue") => {
                self.advance();
                self.consume_semicolon()?;
                StmtKind::Continue
            }
            TokenKind::Keyword("throw") => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error_here("Line break not permitted here."));
                }
                let arg = self.expression()?;
                self.consume_semicolon()?;
                StmtKind::Throw(arg)
            }
            TokenKind::Keyword("class") => {
                self.advance();
                StmtKind::Class(Arc::new(self.class_rest(start)?))
            }
            TokenKind::Keyword("try") => self.try_statement()?,
            TokenKind::Keyword("switch") => self.switch_statement()?,
            TokenKind::Ident(word)
                if word == "interface" && matches!(self.peek_at(1).kind, TokenKind::Ident(_)) =>
            {
                self.advance();
                StmtKind::Interface(self.interface_rest(start)?)
            }
            TokenKind::Ident(word)
                if word == "type"
                    && matches!(self.peek_at(1).kind, TokenKind::Ident(_))
                    && self.peek_at(2).is_punct("=") =>
            {
                self.advance();
                let (name, _) = self.ident_name()?;
                self.expect_punct("=")?;
                let ty = self.type_expr()?;
                self.consume_semicolon()?;
                StmtKind::TypeAlias { name, ty }
            }
            TokenKind::Ident(word)
                if word == "declare"
                    && (self.peek_at(1).is_keyword("const")
                        || self.peek_at(1).is_keyword("let")
                        || self.peek_at(1).is_keyword("function")) =>
            {
                if !self.ambient {
                    return Err(self.error_here("'declare' is not allowed here."));
                }
                self.advance();
                self.declare_rest()?
            }
            TokenKind::Keyword(k) if lexer::is_unsupported(k) => {
                return Err(self.error_here(format!("'{k}' is not supported.")));
            }
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt {
            kind,
            span: start.to(self.prev_span()),
        })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.at_punct("}") {
            if self.at_eof() {
                return Err(self.error_here("'}' expected."));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&mut self) -> PResult<DeclKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword("let") => DeclKind::Let,
            TokenKind::Keyword("const") => DeclKind::Const,
            TokenKind::Keyword("var") => DeclKind::Var,
            _ => return Err(self.error_here("Declaration expected.")),
        };
        self.advance();
        Ok(kind)
    }

    fn var_decl(&mut self) -> PResult<VarDecl> {
        let kind = self.decl_kind()?;
        let first = self.binding_pattern()?;
        self.var_decl_rest(kind, first)
    }

    fn var_decl_rest(&mut self, kind: DeclKind, first: Pattern) -> PResult<VarDecl> {
        let mut declarators = Vec::new();
        let mut pattern = first;
        loop {
            let start = pattern.span();
            let ty = if self.eat_punct(":") {
                Some(self.type_expr()?)
            } else {
                None
            };
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            declarators.push(Declarator {
                pattern,
                ty,
                init,
                span: start.to(self.prev_span()),
            });
            if !self.eat_punct(",") {
                break;
            }
            pattern = self.binding_pattern()?;
        }
        Ok(VarDecl { kind, declarators })
    }

    fn binding_pattern(&mut self) -> PResult<Pattern> {
        self.nested(|p| p.binding_pattern_inner())
    }

    fn binding_pattern_inner(&mut self) -> PResult<Pattern> {
        let start = self.peek().span;
        if self.eat_punct("{") {
            let mut props = Vec::new();
            while !self.at_punct("}") {
                let key_token = self.peek().clone();
                let key = self.property_name()?;
                let value = if self.eat_punct(":") {
                    self.binding_pattern()?
                } else if matches!(key_token.kind, TokenKind::Ident(_)) {
                    Pattern::Ident {
                        name: key.clone(),
                        span: key_token.span,
                    }
                } else {
                    return Err(self.error_here("':' expected."));
                };
                let default = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                props.push(ObjectPatternProp {
                    key,
                    value,
                    default,
                });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("}")?;
            return Ok(Pattern::Object {
                props,
                span: start.to(self.prev_span()),
            });
        }
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.at_punct("]") {
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(self.ident_name()?.0);
                    break;
                }
                let pattern = self.binding_pattern()?;
                let default = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                elements.push(Some(PatternElem { pattern, default }));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            return Ok(Pattern::Array {
                elements,
                rest,
                span: start.to(self.prev_span()),
            });
        }
        let (name, span) = self.ident_name()?;
        Ok(Pattern::Ident { name, span })
    }

    fn for_statement(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.expect_punct("(")?;
        let mut init = None;
        if self.at_keyword("let") || self.at_keyword("const") || self.at_keyword("var") {
            let kind = self.decl_kind()?;
            let pattern = self.binding_pattern()?;
            if self.peek().is_word("of") {
                self.advance();
                let iterable = self.assignment()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(StmtKind::ForOf {
                    binding: ForBinding { kind, pattern },
                    iterable,
                    body,
                });
            }
            if self.eat_keyword("in") {
                let object = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(StmtKind::ForIn {
                    binding: ForBinding { kind, pattern },
                    object,
                    body,
                });
            }
            init = Some(ForInit::VarDecl(self.var_decl_rest(kind, pattern)?));
        } else if !self.at_punct(";") {
            init = Some(ForInit::Expr(self.expression()?));
        }
        self.expect_punct(";")?;
        let test = if self.at_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.at_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<StmtKind> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_pattern()?);
                if self.eat_punct(":") {
                    self.type_expr()?;
                }
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_here("'catch' or 'finally' expected."));
        }
        Ok(StmtKind::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn switch_statement(&mut self) -> PResult<StmtKind> {
        self.advance();
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat_punct("}") {
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if self.at_keyword("default") {
                if seen_default {
                    return Err(self.error_here(
                        "A 'default' clause cannot appear more than once in a 'switch' statement.",
                    ));
                }
                seen_default = true;
                self.advance();
                None
            } else {
                return Err(self.error_here("'case' or 'default' expected."));
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.at_keyword("case") && !self.at_keyword("default") && !self.at_punct("}") {
                if self.at_eof() {
                    return Err(self.error_here("'}' expected."));
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(StmtKind::Switch {
            discriminant,
            cases,
        })
    }

    fn function_rest(
        &mut self,
        start: Span,
        is_async: bool,
        require_name: bool,
    ) -> PResult<Function> {
        let name = match self.peek().kind {
            TokenKind::Ident(_) => Some(self.ident_name()?.0),
            _ if require_name => return Err(self.error_here("Identifier expected.")),
            _ => None,
        };
        let params = self.params()?;
        let return_type = if self.eat_punct(":") {
            Some(self.type_expr()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(Function {
            name,
            params,
            return_type,
            body: FunctionBody::Block(body),
            is_async,
            is_arrow: false,
            span: start.to(self.prev_span()),
        })
    }

    fn class_rest(&mut self, start: Span) -> PResult<ClassDecl> {
        let (name, _) = self.ident_name()?;
        let extends = if self.peek().is_word("extends") {
            self.advance();
            Some(self.nested(|p| p.call_member())?)
        } else {
            None
        };
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error_here("'}' expected."));
            }
            if self.eat_punct(";") {
                continue;
            }
            members.push(self.class_member()?);
        }
        Ok(ClassDecl {
            name,
            extends,
            members,
            span: start.to(self.prev_span()),
        })
    }

    fn class_member(&mut self) -> PResult<ClassMember> {
        let start = self.peek().span;
        // `static`, `async`, `get` and `set` are modifiers only when a
        // member name follows them.
        let modifier = |p: &Self, word: &str| {
            p.peek().is_word(word)
                && !matches!(
                    p.peek_at(1).kind,
                    TokenKind::Punct("(" | "=" | ":" | ";" | "?" | "}")
                )
        };
        let is_static = modifier(self, "static");
        if is_static {
            self.advance();
        }
        let is_async = modifier(self, "async") && !self.peek_at(1).newline_before;
        if is_async {
            self.advance();
        }
        let kind = if !is_async && modifier(self, "get") {
            self.advance();
            MethodKind::Get
        } else if !is_async && modifier(self, "set") {
            self.advance();
            MethodKind::Set
        } else {
            MethodKind::Method
        };
        let name_span = self.peek().span;
        let name = self.property_name()?;
        if self.at_punct("(") {
            let params = self.params()?;
            let return_type = if self.eat_punct(":") {
                Some(self.type_expr()?)
            } else {
                None
            };
            let body = self.block()?;
            let function = Arc::new(Function {
                name: None,
                params,
                return_type,
                body: FunctionBody::Block(body),
                is_async,
                is_arrow: false,
                span: start.to(self.prev_span()),
            });
            if name == "constructor" && !is_static {
                if is_async || kind != MethodKind::Method {
                    return Err(Diagnostic::error(name_span, "A constructor cannot be async or an accessor.")
                        .with_code("parse"));
                }
                return Ok(ClassMember::Constructor(function));
            }
            return Ok(ClassMember::Method {
                name,
                is_static,
                kind,
                function,
            });
        }
        if is_async || kind != MethodKind::Method {
            return Err(self.error_here("'(' expected."));
        }
        let optional = self.eat_punct("?");
        let ty = if self.eat_punct(":") {
            Some(self.type_expr()?)
        } else {
            None
        };
        let init = if self.eat_punct("=") {
            Some(self.assignment()?)
        } else {
            None
        };
        self.consume_semicolon()?;
        Ok(ClassMember::Field {
            name,
            is_static,
            ty,
            optional,
            init,
            span: start.to(self.prev_span()),
        })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let start = self.peek().span;
            let rest = self.eat_punct("...");
            let pattern = self.binding_pattern()?;
            let optional = self.eat_punct("?");
            let ty = if self.eat_punct(":") {
                Some(self.type_expr()?)
            } else {
                None
            };
            let default = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            params.push(Param {
                pattern,
                ty,
                optional,
                default,
                rest,
                span: start.to(self.prev_span()),
            });
            if rest || !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn interface_rest(&mut self, start: Span) -> PResult<InterfaceDecl> {
        let (name, _) = self.ident_name()?;
        let members = self.object_type_members()?;
        Ok(InterfaceDecl {
            name,
            members,
            span: start.to(self.prev_span()),
        })
    }

    fn declare_rest(&mut self) -> PResult<StmtKind> {
        if self.eat_keyword("function") {
            let (name, _) = self.ident_name()?;
            let params = self.type_params()?;
            self.expect_punct(":")?;
            let ret = Box::new(self.type_expr()?);
            self.consume_semicolon()?;
            return Ok(StmtKind::Declare {
                name,
                ty: TypeExpr::Function { params, ret },
            });
        }
        self.advance();
        let (name, _) = self.ident_name()?;
        self.expect_punct(":")?;
        let ty = self.type_expr()?;
        self.consume_semicolon()?;
        Ok(StmtKind::Declare { name, ty })
    }

    // ── expressions ──────────────────────────────────────────────────────

    pub(crate) fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.nested(|p| p.assignment_inner())
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.attempt(|p| p.arrow_function()) {
            return Ok(arrow);
        }
        let target = self.conditional()?;
        let (op, width) = match self.peek().kind {
            TokenKind::Punct(">") => match self.joined_angles() {
                (">>=", n) => (Some(AssignOp::Shr), n),
                (">>>=", n) => (Some(AssignOp::UShr), n),
                _ => (None, 0),
            },
            TokenKind::Punct(p) => (AssignOp::from_punct(p), 1),
            _ => (None, 0),
        };
        let Some(op) = op else {
            return Ok(target);
        };
        let is_literal = matches!(target.kind, ExprKind::Array(_) | ExprKind::Object(_));
        if is_literal && op == AssignOp::Assign {
            let pattern = self.assignment_pattern(&target)?;
            self.advance();
            let value = self.assignment()?;
            let span = target.span.to(value.span);
            return Ok(Expr {
                kind: ExprKind::Destructure {
                    pattern,
                    value: Box::new(value),
                },
                span,
            });
        }
        let assignable = match &target.kind {
            ExprKind::Ident(_) => true,
            ExprKind::Member { optional, .. } | ExprKind::Index { optional, .. } => !optional,
            _ => false,
        };
        if !assignable {
            return Err(self.error_here(
                "The left-hand side of an assignment expression must be a variable or a property access.",
            ));
        }
        self.pos += width;
        let value = self.assignment()?;
        let span = target.span.to(value.span);
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    /// Reinterpret an array or object literal on the left of `=` as the
    /// pattern it spells.
    fn assignment_pattern(&self, expr: &Expr) -> PResult<Pattern> {
        let invalid = |span: Span| {
            Diagnostic::error(span, "Invalid destructuring assignment target.").with_code("parse")
        };
        let with_default = |expr: &Expr| -> PResult<(Pattern, Option<Expr>)> {
            match &expr.kind {
                ExprKind::Assign {
                    op: AssignOp::Assign,
                    target,
                    value,
                } => Ok((self.assignment_pattern(target)?, Some((**value).clone()))),
                _ => Ok((self.assignment_pattern(expr)?, None)),
            }
        };
        match &expr.kind {
            ExprKind::Ident(name) => Ok(Pattern::Ident {
                name: name.clone(),
                span: expr.span,
            }),
            ExprKind::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                let mut rest = None;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        ArrayElem::Expr(e) => {
                            let (pattern, default) = with_default(e)?;
                            elements.push(Some(PatternElem { pattern, default }));
                        }
                        ArrayElem::Spread(e) => match &e.kind {
                            ExprKind::Ident(name) if i + 1 == items.len() => {
                                rest = Some(name.clone());
                            }
                            _ => return Err(invalid(e.span)),
                        },
                    }
                }
                Ok(Pattern::Array {
                    elements,
                    rest,
                    span: expr.span,
                })
            }
            ExprKind::Object(defs) => {
                let mut props = Vec::with_capacity(defs.len());
                for def in defs {
                    match def {
                        PropDef::Shorthand { name, span } => props.push(ObjectPatternProp {
                            key: name.clone(),
                            value: Pattern::Ident {
                                name: name.clone(),
                                span: *span,
                            },
                            default: None,
                        }),
                        PropDef::KeyValue {
                            key: PropKey::Named(key),
                            value,
                        } => {
                            if matches!(value.kind, ExprKind::Function(_)) {
                                return Err(invalid(value.span));
                            }
                            let (value, default) = with_default(value)?;
                            props.push(ObjectPatternProp {
                                key: key.clone(),
                                value,
                                default,
                            });
                        }
                        PropDef::KeyValue { value, .. } | PropDef::Spread(value) => {
                            return Err(invalid(value.span));
                        }
                    }
                }
                Ok(Pattern::Object {
                    props,
                    span: expr.span,
                })
            }
            _ => Err(invalid(expr.span)),
        }
    }

    /// Adjacent `>` tokens read as one shift operator.  The lexer never
    /// joins them so that `Array<Array<T>>` closes one bracket at a time.
    fn joined_angles(&self) -> (&'static str, usize) {
        let adjacent = |n: usize| {
            let (a, b) = (self.peek_at(n - 1), self.peek_at(n));
            a.span.end == b.span.start
        };
        let first = self.peek_at(1);
        if !first.is_punct(">") && !first.is_punct(">=") || !adjacent(1) {
            return (">", 1);
        }
        if first.is_punct(">=") {
            return (">>=", 2);
        }
        let second = self.peek_at(2);
        if adjacent(2) {
            if second.is_punct(">") {
                return (">>>", 3);
            }
            if second.is_punct(">=") {
                return (">>>=", 3);
            }
        }
        (">>", 2)
    }

    /// `x => ..`, `(a, b): T => ..`, `async (..) => ..`.  Returns `Ok(None)`
    /// when the upcoming tokens are not an arrow function.
    fn arrow_function(&mut self) -> PResult<Option<Expr>> {
        let start = self.peek().span;
        let is_async = self.peek().is_word("async")
            && !self.peek_at(1).newline_before
            && (self.peek_at(1).is_punct("(") || matches!(self.peek_at(1).kind, TokenKind::Ident(_)));
        let head = self.pos + usize::from(is_async);
        let plausible = match self.tokens.get(head).map(|t| &t.kind) {
            Some(TokenKind::Ident(_)) => self.peek_at(usize::from(is_async) + 1).is_punct("=>"),
            Some(TokenKind::Punct("(")) => self.paren_followed_by_arrow(head),
            _ => false,
        };
        if !plausible {
            return Ok(None);
        }
        if is_async {
            self.advance();
        }
        let params = match self.peek().kind.clone() {
            TokenKind::Ident(name) if self.peek_at(1).is_punct("=>") => {
                let span = self.advance().span;
                vec![Param {
                    pattern: Pattern::Ident { name, span },
                    ty: None,
                    optional: false,
                    default: None,
                    rest: false,
                    span,
                }]
            }
            TokenKind::Punct("(") => self.params()?,
            _ => return Ok(None),
        };
        let return_type = if self.eat_punct(":") {
            Some(self.type_expr()?)
        } else {
            None
        };
        if !self.at_punct("=>") || self.peek().newline_before {
            return Ok(None);
        }
        self.advance();
        let body = if self.at_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        let span = start.to(self.prev_span());
        Ok(Some(Expr {
            kind: ExprKind::Function(Arc::new(Function {
                name: None,
                params,
                return_type,
                body,
                is_async,
                is_arrow: true,
                span,
            })),
            span,
        }))
    }

    /// Whether the parenthesis at token index `open` is closed by a token
    /// followed by `=>` or a return annotation.
    fn paren_followed_by_arrow(&self, open: usize) -> bool {
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate().skip(open) {
            match token.kind {
                TokenKind::Punct("(" | "[" | "{") => depth += 1,
                TokenKind::Punct(")" | "]" | "}") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .is_some_and(|t| t.is_punct("=>") || t.is_punct(":"));
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
        }
        false
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(3)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        let span = test.span.to(alternate.span);
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        })
    }

    /// The binary operator ahead, its binding power and how many tokens
    /// spell it.
    fn peek_binary(&self) -> Option<(u8, BinaryLike, usize)> {
        let token = self.peek();
        let mut width = 1;
        let op = match &token.kind {
            TokenKind::Punct(">") => match self.joined_angles() {
                (">", _) => BinaryLike::Binary(BinaryOp::Gt),
                (">>", n) => {
                    width = n;
                    BinaryLike::Binary(BinaryOp::Shr)
                }
                (">>>", n) => {
                    width = n;
                    BinaryLike::Binary(BinaryOp::UShr)
                }
                _ => return None,
            },
            TokenKind::Punct(p) => match *p {
                "??" => BinaryLike::Logical(LogicalOp::Nullish),
                "||" => BinaryLike::Logical(LogicalOp::Or),
                "&&" => BinaryLike::Logical(LogicalOp::And),
                "==" => BinaryLike::Binary(BinaryOp::Eq),
                "!=" => BinaryLike::Binary(BinaryOp::NotEq),
                "===" => BinaryLike::Binary(BinaryOp::StrictEq),
                "!==" => BinaryLike::Binary(BinaryOp::StrictNotEq),
                "<" => BinaryLike::Binary(BinaryOp::Lt),
                "<=" => BinaryLike::Binary(BinaryOp::LtEq),
                ">=" => BinaryLike::Binary(BinaryOp::GtEq),
                "+" => BinaryLike::Binary(BinaryOp::Add),
                "-" => BinaryLike::Binary(BinaryOp::Sub),
                "*" => BinaryLike::Binary(BinaryOp::Mul),
                "/" => BinaryLike::Binary(BinaryOp::Div),
                "%" => BinaryLike::Binary(BinaryOp::Rem),
                "**" => BinaryLike::Binary(BinaryOp::Pow),
                "&" => BinaryLike::Binary(BinaryOp::BitAnd),
                "|" => BinaryLike::Binary(BinaryOp::BitOr),
                "^" => BinaryLike::Binary(BinaryOp::BitXor),
                "<<" => BinaryLike::Binary(BinaryOp::Shl),
                _ => return None,
            },
            TokenKind::Keyword("in") => BinaryLike::Binary(BinaryOp::In),
            TokenKind::Keyword("instanceof") => BinaryLike::Binary(BinaryOp::InstanceOf),
            TokenKind::Ident(w) if w == "as" && !token.newline_before => BinaryLike::As,
            _ => return None,
        };
        let prec = match op {
            BinaryLike::Logical(op) => op.precedence(),
            BinaryLike::Binary(op) => op.precedence(),
            BinaryLike::As => BinaryOp::Lt.precedence(),
        };
        Some((prec, op, width))
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((prec, op, width)) = self.peek_binary() {
            if prec < min_prec {
                break;
            }
            self.pos += width;
            let (kind, end) = match op {
                BinaryLike::As => {
                    let ty = self.type_expr()?;
                    let end = self.prev_span();
                    (
                        ExprKind::As {
                            expr: Box::new(left),
                            ty,
                        },
                        end,
                    )
                }
                BinaryLike::Binary(BinaryOp::Pow) => {
                    let right = self.binary(prec)?;
                    let end = right.span;
                    (
                        ExprKind::Binary {
                            op: BinaryOp::Pow,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        end,
                    )
                }
                BinaryLike::Binary(op) => {
                    let right = self.binary(prec + 1)?;
                    let end = right.span;
                    (
                        ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        end,
                    )
                }
                BinaryLike::Logical(op) => {
                    let right = self.binary(prec + 1)?;
                    let end = right.span;
                    (
                        ExprKind::Logical {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        end,
                    )
                }
            };
            let span = self.span_from_expr_start(&kind).to(end);
            left = Expr { kind, span };
        }
        Ok(left)
    }

    fn span_from_expr_start(&self, kind: &ExprKind) -> Span {
        match kind {
            ExprKind::As { expr, .. } => expr.span,
            ExprKind::Binary { left, .. } | ExprKind::Logical { left, .. } => left.span,
            _ => self.prev_span(),
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let op = match &token.kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Keyword("typeof") => Some(UnaryOp::Typeof),
            TokenKind::Keyword("delete") => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.nested(|p| p.unary())?;
            let span = token.span.to(arg.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    arg: Box::new(arg),
                },
                span,
            });
        }
        if token.is_punct("++") || token.is_punct("--") {
            self.advance();
            let target = self.nested(|p| p.unary())?;
            self.check_update_target(&target)?;
            let span = token.span.to(target.span);
            let op = if token.is_punct("++") {
                UpdateOp::Inc
            } else {
                UpdateOp::Dec
            };
            return Ok(Expr {
                kind: ExprKind::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            });
        }
        if token.is_keyword("await") {
            self.advance();
            let arg = self.nested(|p| p.unary())?;
            let span = token.span.to(arg.span);
            return Ok(Expr {
                kind: ExprKind::Await(Box::new(arg)),
                span,
            });
        }
        self.postfix()
    }

    fn check_update_target(&self, target: &Expr) -> PResult<()> {
        match &target.kind {
            ExprKind::Ident(_) | ExprKind::Member { optional: false, .. } => Ok(()),
            ExprKind::Index { optional: false, .. } => Ok(()),
            _ => Err(Diagnostic::error(
                target.span,
                "The operand of an increment or decrement operator must be a variable or a property access.",
            )
            .with_code("parse")),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        let token = self.peek().clone();
        if (token.is_punct("++") || token.is_punct("--")) && !token.newline_before {
            self.check_update_target(&expr)?;
            self.advance();
            let span = expr.span.to(token.span);
            let op = if token.is_punct("++") {
                UpdateOp::Inc
            } else {
                UpdateOp::Dec
            };
            return Ok(Expr {
                kind: ExprKind::Update {
                    op,
                    prefix: false,
                    target: Box::new(expr),
                },
                span,
            });
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.at_keyword("new") {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            let token = self.peek().clone();
            let kind = match &token.kind {
                TokenKind::Punct(".") => {
                    self.advance();
                    let property = self.property_name()?;
                    ExprKind::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    }
                }
                TokenKind::Punct("?.") => {
                    self.advance();
                    if self.at_punct("(") {
                        let args = self.arguments()?;
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            optional: true,
                        }
                    } else if self.eat_punct("[") {
                        let index = self.expression()?;
                        self.expect_punct("]")?;
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            optional: true,
                        }
                    } else {
                        let property = self.property_name()?;
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                            optional: true,
                        }
                    }
                }
                TokenKind::Punct("[") => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    }
                }
                TokenKind::Punct("(") => {
                    let args = self.arguments()?;
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    }
                }
                TokenKind::Punct("!") if !token.newline_before => {
                    self.advance();
                    ExprKind::NonNull(Box::new(expr))
                }
                _ => return Ok(expr),
            };
            let start = match &kind {
                ExprKind::Member { object, .. }
                | ExprKind::Index { object, .. }
                | ExprKind::Call { callee: object, .. }
                | ExprKind::NonNull(object) => object.span,
                _ => token.span,
            };
            expr = Expr {
                kind,
                span: start.to(self.prev_span()),
            };
        }
    }

    fn new_expression(&mut self) -> PResult<Expr> {
        let start = self.advance().span;
        let mut callee = self.nested(|p| p.primary())?;
        while self.at_punct(".") {
            self.advance();
            let property = self.property_name()?;
            let span = callee.span.to(self.prev_span());
            callee = Expr {
                kind: ExprKind::Member {
                    object: Box::new(callee),
                    property,
                    optional: false,
                },
                span,
            };
        }
        let args = if self.at_punct("(") {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr {
            kind: ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            span: start.to(self.prev_span()),
        })
    }

    fn arguments(&mut self) -> PResult<Vec<ArrayElem>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.at_punct(")") {
            if self.eat_punct("...") {
                args.push(ArrayElem::Spread(self.assignment()?));
            } else {
                args.push(ArrayElem::Expr(self.assignment()?));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let start = token.span;
        let kind = match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Template(parts) => {
                self.advance();
                ExprKind::Template(self.template(parts)?)
            }
            TokenKind::Keyword("true") => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword("false") => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword("null") => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Keyword("undefined") => {
                self.advance();
                ExprKind::Undefined
            }
            TokenKind::Keyword("function") => {
                self.advance();
                ExprKind::Function(Arc::new(self.function_rest(start, false, false)?))
            }
            TokenKind::Ident(ref name)
                if name == "async"
                    && self.peek_at(1).is_keyword("function")
                    && !self.peek_at(1).newline_before =>
            {
                self.advance();
                self.advance();
                ExprKind::Function(Arc::new(self.function_rest(start, true, false)?))
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::Keyword("this") => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Keyword("super") => {
                self.advance();
                if !self.at_punct("(") && !self.at_punct(".") {
                    return Err(self.error_here("'super' must be followed by an argument list or member access."));
                }
                ExprKind::Super
            }
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => ExprKind::Array(self.array_literal()?),
            TokenKind::Punct("{") => ExprKind::Object(self.object_literal()?),
            TokenKind::Keyword(k) if lexer::is_unsupported(k) => {
                return Err(self.error_here(format!("'{k}' is not supported.")));
            }
            TokenKind::Eof => return Err(self.error_here("Expression expected.")),
            _ => return Err(self.unexpected()),
        };
        Ok(Expr {
            kind,
            span: start.to(self.prev_span()),
        })
    }

    fn template(&mut self, parts: Vec<TemplatePart>) -> PResult<Vec<TemplateElem>> {
        let mut elems = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                TemplatePart::Text(text) => elems.push(TemplateElem::Text(text)),
                TemplatePart::Expr { start, end } => {
                    let tokens = lexer::tokenize_range(self.src, start, end)?;
                    let mut sub = Parser::new(self.src, tokens, self.ambient);
                    sub.depth = self.depth;
                    let expr = sub.expression()?;
                    sub.expect_eof()?;
                    elems.push(TemplateElem::Expr(expr));
                }
            }
        }
        Ok(elems)
    }

    fn array_literal(&mut self) -> PResult<Vec<ArrayElem>> {
        self.advance();
        let mut elements = Vec::new();
        while !self.at_punct("]") {
            if self.at_punct(",") {
                return Err(self.error_here("Expression expected."));
            }
            if self.eat_punct("...") {
                elements.push(ArrayElem::Spread(self.assignment()?));
            } else {
                elements.push(ArrayElem::Expr(self.assignment()?));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("]")?;
        Ok(elements)
    }

    fn object_literal(&mut self) -> PResult<Vec<PropDef>> {
        self.advance();
        let mut props = Vec::new();
        while !self.at_punct("}") {
            if self.eat_punct("...") {
                props.push(PropDef::Spread(self.assignment()?));
            } else {
                props.push(self.object_property()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(props)
    }

    fn object_property(&mut self) -> PResult<PropDef> {
        let start = self.peek().span;
        let is_async = self.peek().is_word("async")
            && !matches!(
                self.peek_at(1).kind,
                TokenKind::Punct(":" | "(" | "," | "}")
            );
        if is_async {
            self.advance();
        }
        let key_token = self.peek().clone();
        let key = if self.eat_punct("[") {
            let expr = self.assignment()?;
            self.expect_punct("]")?;
            PropKey::Computed(expr)
        } else {
            PropKey::Named(self.property_name()?)
        };
        if self.at_punct("(") {
            let params = self.params()?;
            let return_type = if self.eat_punct(":") {
                Some(self.type_expr()?)
            } else {
                None
            };
            let body = self.block()?;
            let span = start.to(self.prev_span());
            let function = Function {
                name: None,
                params,
                return_type,
                body: FunctionBody::Block(body),
                is_async,
                is_arrow: false,
                span,
            };
            return Ok(PropDef::KeyValue {
                key,
                value: Expr {
                    kind: ExprKind::Function(Arc::new(function)),
                    span,
                },
            });
        }
        if is_async {
            return Err(self.error_here("'(' expected."));
        }
        if self.eat_punct(":") {
            let value = self.assignment()?;
            return Ok(PropDef::KeyValue { key, value });
        }
        match (key, &key_token.kind) {
            (PropKey::Named(name), TokenKind::Ident(_)) => Ok(PropDef::Shorthand {
                name,
                span: key_token.span,
            }),
            _ => Err(self.error_here("':' expected.")),
        }
    }

    // ── types ────────────────────────────────────────────────────────────

    pub(crate) fn type_expr(&mut self) -> PResult<TypeExpr> {
        self.nested(|p| p.union_type())
    }

    fn union_type(&mut self) -> PResult<TypeExpr> {
        self.eat_punct("|");
        let mut members = vec![self.postfix_type()?];
        while self.eat_punct("|") {
            members.push(self.postfix_type()?);
        }
        if members.len() == 1 {
            Ok(members.remove(0))
        } else {
            Ok(TypeExpr::Union(members))
        }
    }

    fn postfix_type(&mut self) -> PResult<TypeExpr> {
        let mut ty = self.primary_type()?;
        while self.at_punct("[") && self.peek_at(1).is_punct("]") && !self.peek().newline_before {
            self.advance();
            self.advance();
            ty = TypeExpr::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn primary_type(&mut self) -> PResult<TypeExpr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                let mut args = Vec::new();
                if self.eat_punct("<") {
                    loop {
                        args.push(self.type_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct(">")?;
                }
                Ok(TypeExpr::Named {
                    name,
                    args,
                    span: token.span.to(self.prev_span()),
                })
            }
            TokenKind::Keyword(k @ ("null" | "undefined")) => {
                self.advance();
                Ok(TypeExpr::Named {
                    name: k.to_string(),
                    args: Vec::new(),
                    span: token.span,
                })
            }
            TokenKind::Keyword("true" | "false") => {
                self.advance();
                Ok(TypeExpr::Named {
                    name: "boolean".to_string(),
                    args: Vec::new(),
                    span: token.span,
                })
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(TypeExpr::StringLit(s))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(TypeExpr::NumberLit(n))
            }
            TokenKind::Punct("{") => Ok(TypeExpr::Object(self.object_type_members()?)),
            TokenKind::Punct("(") => {
                if let Some(function) = self.attempt(|p| p.function_type()) {
                    return Ok(function);
                }
                self.advance();
                let inner = self.type_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            _ => Err(self.error_here("Type expected.")),
        }
    }

    fn function_type(&mut self) -> PResult<Option<TypeExpr>> {
        let params = self.type_params()?;
        if !self.eat_punct("=>") {
            return Ok(None);
        }
        let ret = Box::new(self.type_expr()?);
        Ok(Some(TypeExpr::Function { params, ret }))
    }

    fn type_params(&mut self) -> PResult<Vec<TypeParam>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let rest = self.eat_punct("...");
            let (name, _) = self.ident_name()?;
            let optional = self.eat_punct("?");
            let ty = if self.eat_punct(":") {
                self.type_expr()?
            } else {
                TypeExpr::Named {
                    name: "any".to_string(),
                    args: Vec::new(),
                    span: self.prev_span(),
                }
            };
            params.push(TypeParam {
                name,
                optional,
                rest,
                ty,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn object_type_members(&mut self) -> PResult<Vec<TypeMember>> {
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.at_punct("}") {
            let span = self.peek().span;
            let name = self.property_name()?;
            let optional = self.eat_punct("?");
            let ty = if self.at_punct("(") {
                let params = self.type_params()?;
                self.expect_punct(":")?;
                let ret = Box::new(self.type_expr()?);
                TypeExpr::Function { params, ret }
            } else {
                self.expect_punct(":")?;
                self.type_expr()?
            };
            members.push(TypeMember {
                name,
                optional,
                ty,
                span,
            });
            if !self.eat_punct(";") && !self.eat_punct(",") && !self.at_punct("}") {
                if self.peek().newline_before {
                    continue;
                }
                return Err(self.error_here("';' expected."));
            }
        }
        self.advance();
        Ok(members)
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryLike {
    Binary(BinaryOp),
    Logical(LogicalOp),
    As,
}
