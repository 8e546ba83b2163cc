//! Deterministic printer producing the untyped executable form.
//!
//! Output is a pure function of the syntax tree: two-space indentation,
//! double-quoted strings, one statement per line, every control-flow body
//! braced.  Type annotations, `interface` and `type` declarations are erased.
//! Printing the result of parsing printed text reproduces it exactly.

use crate::ast::*;
use crate::lexer::is_identifier;

const PREC_ASSIGN: u8 = 1;
const PREC_CONDITIONAL: u8 = 2;
const PREC_UNARY: u8 = 14;
const PREC_CALL: u8 = 16;
const PREC_PRIMARY: u8 = 17;

// Statement anchors, `\u{1}line:column\u{2}`.  Strings and templates escape
// control characters, so neither byte occurs in printed code otherwise.
const MARK_OPEN: char = '\u{1}';
const MARK_CLOSE: char = '\u{2}';

pub fn emit_program(program: &Program) -> String {
    print_body(&mut Emitter::default(), program)
}

/// Print a program together with the map from printed lines back to the
/// source positions of the statements on them.
pub fn emit_program_mapped(program: &Program) -> (String, LineMap) {
    let mut emitter = Emitter {
        indent: 0,
        mapped: true,
    };
    strip_anchors(&print_body(&mut emitter, program))
}

fn print_body(emitter: &mut Emitter, program: &Program) -> String {
    let mut out = String::new();
    for stmt in &program.body {
        if let Some(text) = emitter.stmt(stmt) {
            out.push_str(&text);
            out.push('\n');
        }
    }
    out
}

/// Print a function as a declaration (or, when anonymous, an expression).
pub fn emit_function(function: &Function) -> String {
    Emitter::default().function(function)
}

pub fn emit_expr(expr: &Expr) -> String {
    Emitter::default().expr(expr, 0)
}

/// Printed line → source position of the first statement starting on it.
/// Lines that only continue an earlier statement map to that statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineMap {
    lines: Vec<Anchor>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    line: u32,
    column: u32,
    /// Printed column of the statement; `None` on continuation lines.
    printed_column: Option<u32>,
}

impl LineMap {
    /// Source `(line, column)` for a 1-based position in the printed text.
    /// Positions past the end are returned unchanged.
    pub fn resolve(&self, line: u32, column: u32) -> (u32, u32) {
        let Some(anchor) = line
            .checked_sub(1)
            .and_then(|i| self.lines.get(i as usize))
        else {
            return (line, column);
        };
        match anchor.printed_column {
            Some(printed) if column >= printed => (anchor.line, anchor.column + (column - printed)),
            _ => (anchor.line, anchor.column),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

fn strip_anchors(raw: &str) -> (String, LineMap) {
    let mut out = String::with_capacity(raw.len());
    let mut lines = Vec::new();
    let mut current = Anchor {
        line: 1,
        column: 1,
        printed_column: None,
    };
    for line in raw.split_inclusive('\n') {
        let mut first: Option<Anchor> = None;
        let mut column = 1u32;
        let mut rest = line;
        while let Some(open) = rest.find(MARK_OPEN) {
            let before = &rest[..open];
            out.push_str(before);
            column += before.chars().count() as u32;
            let after = &rest[open + MARK_OPEN.len_utf8()..];
            let Some(close) = after.find(MARK_CLOSE) else {
                rest = after;
                break;
            };
            let position = after[..close]
                .split_once(':')
                .and_then(|(l, c)| Some((l.parse().ok()?, c.parse().ok()?)));
            if let (None, Some((line, col))) = (first, position) {
                first = Some(Anchor {
                    line,
                    column: col,
                    printed_column: Some(column),
                });
            }
            rest = &after[close + MARK_CLOSE.len_utf8()..];
        }
        out.push_str(rest);
        match first {
            Some(anchor) => {
                current = anchor;
                lines.push(anchor);
            }
            None => lines.push(Anchor {
                printed_column: None,
                ..current
            }),
        }
    }
    (out, LineMap { lines })
}

#[derive(Default)]
struct Emitter {
    indent: usize,
    mapped: bool,
}

fn pad(level: usize) -> String {
    "  ".repeat(level)
}

fn expr_prec(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Assign { .. } | ExprKind::Destructure { .. } => PREC_ASSIGN,
        ExprKind::Function(f) if f.is_arrow => PREC_ASSIGN,
        ExprKind::Conditional { .. } => PREC_CONDITIONAL,
        ExprKind::Logical { op, .. } => op.precedence(),
        ExprKind::Binary { op, .. } => op.precedence(),
        ExprKind::Unary { .. } | ExprKind::Await(_) => PREC_UNARY,
        ExprKind::Update { prefix: true, .. } => PREC_UNARY,
        ExprKind::Update { prefix: false, .. } => PREC_UNARY + 1,
        ExprKind::Call { .. }
        | ExprKind::Member { .. }
        | ExprKind::Index { .. }
        | ExprKind::New { .. } => PREC_CALL,
        ExprKind::As { expr, .. } | ExprKind::NonNull(expr) => expr_prec(expr),
        _ => PREC_PRIMARY,
    }
}

/// The node an `as` or `!` wrapper stands for once types are erased.
fn erased(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::As { expr, .. } | ExprKind::NonNull(expr) => erased(expr),
        _ => expr,
    }
}

impl Emitter {
    fn stmt(&mut self, stmt: &Stmt) -> Option<String> {
        let text = match &stmt.kind {
            StmtKind::Expr(expr) => {
                let text = self.expr(expr, 0);
                if text.starts_with('{')
                    || text.starts_with("function")
                    || text.starts_with("async function")
                {
                    format!("({text});")
                } else {
                    format!("{text};")
                }
            }
            StmtKind::VarDecl(decl) => format!("{};", self.var_decl(decl)),
            StmtKind::Function(function) => self.function(function),
            StmtKind::Class(class) => self.class(class),
            StmtKind::Return(None) => "return;".to_string(),
            StmtKind::Return(Some(arg)) => format!("return {};", self.expr(arg, 0)),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let mut text = format!("if ({}) {}", self.expr(test, 0), self.body(consequent));
                if let Some(alternate) = alternate {
                    let rest = match &alternate.kind {
                        StmtKind::If { .. } => self.stmt(alternate).unwrap_or_default(),
                        _ => self.body(alternate),
                    };
                    text.push_str(" else ");
                    text.push_str(&rest);
                }
                text
            }
            StmtKind::Block(stmts) => self.block(stmts),
            StmtKind::While { test, body } => {
                format!("while ({}) {}", self.expr(test, 0), self.body(body))
            }
            StmtKind::DoWhile { body, test } => {
                format!("do {} while ({});", self.body(body), self.expr(test, 0))
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let init = match init {
                    Some(ForInit::VarDecl(decl)) => self.var_decl(decl),
                    Some(ForInit::Expr(expr)) => self.expr(expr, 0),
                    None => String::new(),
                };
                let test = test
                    .as_ref()
                    .map(|t| format!(" {}", self.expr(t, 0)))
                    .unwrap_or_default();
                let update = update
                    .as_ref()
                    .map(|u| format!(" {}", self.expr(u, 0)))
                    .unwrap_or_default();
                format!("for ({init};{test};{update}) {}", self.body(body))
            }
            StmtKind::ForOf {
                binding,
                iterable,
                body,
            } => format!(
                "for ({} {} of {}) {}",
                keyword(binding.kind),
                self.pattern(&binding.pattern),
                self.expr(iterable, PREC_ASSIGN),
                self.body(body)
            ),
            StmtKind::ForIn {
                binding,
                object,
                body,
            } => format!(
                "for ({} {} in {}) {}",
                keyword(binding.kind),
                self.pattern(&binding.pattern),
                self.expr(object, 0),
                self.body(body)
            ),
            StmtKind::Break => "break;".to_string(),
            StmtKind::Continue => "continue;".to_string(),
            StmtKind::Throw(arg) => format!("throw {};", self.expr(arg, 0)),
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut text = format!("try {}", self.block(block));
                if let Some(handler) = handler {
                    match param {
                        Some(param) => {
                            let param = self.pattern(param);
                            text.push_str(&format!(" catch ({param}) {}", self.block(handler)));
                        }
                        None => text.push_str(&format!(" catch {}", self.block(handler))),
                    }
                }
                if let Some(finalizer) = finalizer {
                    text.push_str(&format!(" finally {}", self.block(finalizer)));
                }
                text
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                let head = format!("switch ({})", self.expr(discriminant, 0));
                if cases.is_empty() {
                    format!("{head} {{}}")
                } else {
                    let mut text = format!("{head} {{\n");
                    for case in cases {
                        self.indent += 1;
                        let label = match &case.test {
                            Some(test) => format!("case {}:", self.expr(test, 0)),
                            None => "default:".to_string(),
                        };
                        text.push_str(&pad(self.indent));
                        text.push_str(&label);
                        text.push('\n');
                        self.indent += 1;
                        for stmt in &case.body {
                            if let Some(line) = self.stmt(stmt) {
                                text.push_str(&pad(self.indent));
                                text.push_str(&line);
                                text.push('\n');
                            }
                        }
                        self.indent -= 2;
                    }
                    text.push_str(&pad(self.indent));
                    text.push('}');
                    text
                }
            }
            StmtKind::Interface(_)
            | StmtKind::TypeAlias { .. }
            | StmtKind::Declare { .. }
            | StmtKind::Empty => return None,
        };
        if self.mapped {
            let (line, column) = (stmt.span.line, stmt.span.column);
            return Some(format!("{MARK_OPEN}{line}:{column}{MARK_CLOSE}{text}"));
        }
        Some(text)
    }

    fn block(&mut self, stmts: &[Stmt]) -> String {
        self.indent += 1;
        let lines: Vec<String> = stmts.iter().filter_map(|s| self.stmt(s)).collect();
        self.indent -= 1;
        if lines.is_empty() {
            return "{}".to_string();
        }
        let mut out = String::from("{\n");
        for line in lines {
            out.push_str(&pad(self.indent + 1));
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&pad(self.indent));
        out.push('}');
        out
    }

    /// Control-flow bodies are always braced.
    fn body(&mut self, stmt: &Stmt) -> String {
        match &stmt.kind {
            StmtKind::Block(stmts) => self.block(stmts),
            _ => self.block(std::slice::from_ref(stmt)),
        }
    }

    fn var_decl(&mut self, decl: &VarDecl) -> String {
        let declarators: Vec<String> = decl
            .declarators
            .iter()
            .map(|d| {
                let pattern = self.pattern(&d.pattern);
                match &d.init {
                    Some(init) => format!("{pattern} = {}", self.expr(init, PREC_ASSIGN)),
                    None => pattern,
                }
            })
            .collect();
        format!("{} {}", keyword(decl.kind), declarators.join(", "))
    }

    fn pattern(&mut self, pattern: &Pattern) -> String {
        match pattern {
            Pattern::Ident { name, .. } => name.clone(),
            Pattern::Object { props, .. } => {
                if props.is_empty() {
                    return "{}".to_string();
                }
                let parts: Vec<String> = props
                    .iter()
                    .map(|prop| {
                        let mut text = match &prop.value {
                            Pattern::Ident { name, .. } if *name == prop.key => name.clone(),
                            value => format!("{}: {}", key_text(&prop.key), self.pattern(value)),
                        };
                        if let Some(default) = &prop.default {
                            text.push_str(&format!(" = {}", self.expr(default, PREC_ASSIGN)));
                        }
                        text
                    })
                    .collect();
                format!("{{ {} }}", parts.join(", "))
            }
            Pattern::Array { elements, rest, .. } => {
                let mut parts: Vec<String> = elements
                    .iter()
                    .map(|elem| match elem {
                        None => String::new(),
                        Some(elem) => {
                            let mut text = self.pattern(&elem.pattern);
                            if let Some(default) = &elem.default {
                                text.push_str(&format!(" = {}", self.expr(default, PREC_ASSIGN)));
                            }
                            text
                        }
                    })
                    .collect();
                if let Some(rest) = rest {
                    parts.push(format!("...{rest}"));
                } else if matches!(elements.last(), Some(None)) {
                    parts.push(String::new());
                }
                format!("[{}]", parts.join(", ").trim_end())
            }
        }
    }

    fn params(&mut self, params: &[Param]) -> String {
        let parts: Vec<String> = params
            .iter()
            .map(|param| {
                let mut text = String::new();
                if param.rest {
                    text.push_str("...");
                }
                text.push_str(&self.pattern(&param.pattern));
                if let Some(default) = &param.default {
                    text.push_str(&format!(" = {}", self.expr(default, PREC_ASSIGN)));
                }
                text
            })
            .collect();
        parts.join(", ")
    }

    fn function(&mut self, function: &Function) -> String {
        let prefix = if function.is_async { "async " } else { "" };
        let params = self.params(&function.params);
        if function.is_arrow {
            let body = match &function.body {
                FunctionBody::Block(stmts) => self.block(stmts),
                FunctionBody::Expr(expr) => {
                    let text = self.expr(expr, PREC_ASSIGN);
                    if text.starts_with('{') {
                        format!("({text})")
                    } else {
                        text
                    }
                }
            };
            return format!("{prefix}({params}) => {body}");
        }
        let body = self.function_body(function);
        match &function.name {
            Some(name) => format!("{prefix}function {name}({params}) {body}"),
            None => format!("{prefix}function ({params}) {body}"),
        }
    }

    fn function_body(&mut self, function: &Function) -> String {
        match &function.body {
            FunctionBody::Block(stmts) => self.block(stmts),
            FunctionBody::Expr(expr) => {
                let ret = Stmt {
                    span: expr.span,
                    kind: StmtKind::Return(Some((**expr).clone())),
                };
                self.block(std::slice::from_ref(&ret))
            }
        }
    }

    fn class(&mut self, class: &ClassDecl) -> String {
        let mut head = format!("class {}", class.name);
        if let Some(base) = &class.extends {
            head.push_str(&format!(" extends {}", self.expr(base, PREC_CALL)));
        }
        if class.members.is_empty() {
            return format!("{head} {{}}");
        }
        self.indent += 1;
        let members: Vec<String> = class.members.iter().map(|m| self.class_member(m)).collect();
        self.indent -= 1;
        let mut out = format!("{head} {{\n");
        for member in members {
            out.push_str(&pad(self.indent + 1));
            out.push_str(&member);
            out.push('\n');
        }
        out.push_str(&pad(self.indent));
        out.push('}');
        out
    }

    fn class_member(&mut self, member: &ClassMember) -> String {
        match member {
            ClassMember::Field {
                name,
                is_static,
                init,
                ..
            } => {
                let prefix = if *is_static { "static " } else { "" };
                match init {
                    Some(init) => format!(
                        "{prefix}{} = {};",
                        key_text(name),
                        self.expr(init, PREC_ASSIGN)
                    ),
                    None => format!("{prefix}{};", key_text(name)),
                }
            }
            ClassMember::Constructor(function) => {
                let params = self.params(&function.params);
                format!("constructor({params}) {}", self.function_body(function))
            }
            ClassMember::Method {
                name,
                is_static,
                kind,
                function,
            } => {
                let mut head = String::new();
                if *is_static {
                    head.push_str("static ");
                }
                if function.is_async {
                    head.push_str("async ");
                }
                match kind {
                    MethodKind::Get => head.push_str("get "),
                    MethodKind::Set => head.push_str("set "),
                    MethodKind::Method => {}
                }
                let params = self.params(&function.params);
                format!(
                    "{head}{}({params}) {}",
                    key_text(name),
                    self.function_body(function)
                )
            }
        }
    }

    fn expr(&mut self, expr: &Expr, min_prec: u8) -> String {
        let text = self.expr_inner(expr);
        if expr_prec(expr) < min_prec {
            format!("({text})")
        } else {
            text
        }
    }

    fn args(&mut self, args: &[ArrayElem]) -> String {
        let parts: Vec<String> = args.iter().map(|a| self.array_elem(a)).collect();
        parts.join(", ")
    }

    fn array_elem(&mut self, elem: &ArrayElem) -> String {
        match elem {
            ArrayElem::Expr(e) => self.expr(e, PREC_ASSIGN),
            ArrayElem::Spread(e) => format!("...{}", self.expr(e, PREC_ASSIGN)),
        }
    }

    fn logical_operand(&mut self, parent: LogicalOp, child: &Expr, min_prec: u8) -> String {
        let mixes = match &erased(child).kind {
            ExprKind::Logical { op, .. } => {
                (parent == LogicalOp::Nullish) != (*op == LogicalOp::Nullish)
            }
            _ => false,
        };
        if mixes {
            format!("({})", self.expr(child, 0))
        } else {
            self.expr(child, min_prec)
        }
    }

    fn expr_inner(&mut self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Number(n) => format_number(*n),
            ExprKind::Str(s) => quote_string(s),
            ExprKind::Template(elems) => {
                let mut out = String::from("`");
                for elem in elems {
                    match elem {
                        TemplateElem::Text(text) => out.push_str(&escape_template(text)),
                        TemplateElem::Expr(e) => {
                            out.push_str("${");
                            out.push_str(&self.expr(e, 0));
                            out.push('}');
                        }
                    }
                }
                out.push('`');
                out
            }
            ExprKind::Bool(b) => b.to_string(),
            ExprKind::Null => "null".to_string(),
            ExprKind::Undefined => "undefined".to_string(),
            ExprKind::Ident(name) => name.clone(),
            ExprKind::This => "this".to_string(),
            ExprKind::Super => "super".to_string(),
            ExprKind::Array(elems) => format!("[{}]", self.args(elems)),
            ExprKind::Object(props) => self.object(props),
            ExprKind::Function(function) => self.function(function),
            ExprKind::Unary { op, arg } => {
                let (sym, guard) = match op {
                    UnaryOp::Neg => ("-", Some('-')),
                    UnaryOp::Plus => ("+", Some('+')),
                    UnaryOp::Not => ("!", None),
                    UnaryOp::BitNot => ("~", None),
                    UnaryOp::Typeof => ("typeof ", None),
                    UnaryOp::Delete => ("delete ", None),
                };
                let text = self.expr(arg, PREC_UNARY);
                if guard.is_some_and(|g| text.starts_with(g)) {
                    format!("{sym}({text})")
                } else {
                    format!("{sym}{text}")
                }
            }
            ExprKind::Update { op, prefix, target } => {
                let sym = match op {
                    UpdateOp::Inc => "++",
                    UpdateOp::Dec => "--",
                };
                if *prefix {
                    format!("{sym}{}", self.expr(target, PREC_UNARY))
                } else {
                    format!("{}{sym}", self.expr(target, PREC_CALL))
                }
            }
            ExprKind::Binary { op, left, right } => {
                let prec = op.precedence();
                // A unary operand on the left of `**` must be parenthesised.
                let (lmin, rmin) = if *op == BinaryOp::Pow {
                    (PREC_UNARY + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                format!(
                    "{} {} {}",
                    self.expr(left, lmin),
                    op.as_str(),
                    self.expr(right, rmin)
                )
            }
            ExprKind::Logical { op, left, right } => {
                let prec = op.precedence();
                let left = self.logical_operand(*op, left, prec);
                let right = self.logical_operand(*op, right, prec + 1);
                format!("{left} {} {right}", op.as_str())
            }
            ExprKind::Assign { op, target, value } => format!(
                "{} {} {}",
                self.expr(target, PREC_CALL),
                op.as_str(),
                self.expr(value, PREC_ASSIGN)
            ),
            ExprKind::Destructure { pattern, value } => format!(
                "{} = {}",
                self.pattern(pattern),
                self.expr(value, PREC_ASSIGN)
            ),
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => format!(
                "{} ? {} : {}",
                self.expr(test, PREC_CONDITIONAL + 1),
                self.expr(consequent, PREC_ASSIGN),
                self.expr(alternate, PREC_ASSIGN)
            ),
            ExprKind::Call {
                callee,
                args,
                optional,
            } => {
                let callee = self.callee(callee);
                let args = self.args(args);
                if *optional {
                    format!("{callee}?.({args})")
                } else {
                    format!("{callee}({args})")
                }
            }
            ExprKind::New { callee, args } => {
                let callee = match &erased(callee).kind {
                    ExprKind::Call { .. } => format!("({})", self.expr(callee, 0)),
                    _ => self.expr(callee, PREC_CALL),
                };
                format!("new {callee}({})", self.args(args))
            }
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                let object = self.callee(object);
                if is_identifier(property) {
                    let dot = if *optional { "?." } else { "." };
                    format!("{object}{dot}{property}")
                } else {
                    let open = if *optional { "?.[" } else { "[" };
                    format!("{object}{open}{}]", quote_string(property))
                }
            }
            ExprKind::Index {
                object,
                index,
                optional,
            } => {
                let object = self.callee(object);
                let open = if *optional { "?.[" } else { "[" };
                format!("{object}{open}{}]", self.expr(index, 0))
            }
            ExprKind::Await(arg) => format!("await {}", self.expr(arg, PREC_UNARY)),
            ExprKind::As { expr, .. } | ExprKind::NonNull(expr) => self.expr_inner(expr),
        }
    }

    /// Object position of a member access or call.
    fn callee(&mut self, object: &Expr) -> String {
        match &erased(object).kind {
            ExprKind::Number(_) => format!("({})", self.expr(object, 0)),
            _ => self.expr(object, PREC_CALL),
        }
    }

    fn object(&mut self, props: &[PropDef]) -> String {
        if props.is_empty() {
            return "{}".to_string();
        }
        let multiline = props.iter().any(|p| {
            matches!(
                p,
                PropDef::KeyValue { value: Expr { kind: ExprKind::Function(_), .. }, .. }
            )
        });
        if multiline {
            self.indent += 1;
        }
        let parts: Vec<String> = props
            .iter()
            .map(|prop| match prop {
                PropDef::KeyValue { key, value } => {
                    let key = match key {
                        PropKey::Named(name) => key_text(name),
                        PropKey::Computed(e) => format!("[{}]", self.expr(e, PREC_ASSIGN)),
                    };
                    format!("{key}: {}", self.expr(value, PREC_ASSIGN))
                }
                PropDef::Shorthand { name, .. } => name.clone(),
                PropDef::Spread(e) => format!("...{}", self.expr(e, PREC_ASSIGN)),
            })
            .collect();
        if !multiline {
            return format!("{{ {} }}", parts.join(", "));
        }
        self.indent -= 1;
        let mut out = String::from("{\n");
        for part in parts {
            out.push_str(&pad(self.indent + 1));
            out.push_str(&part);
            out.push_str(",\n");
        }
        out.push_str(&pad(self.indent));
        out.push('}');
        out
    }
}

/// `var` is checked as a block-scoped binding and printed as one.
fn keyword(kind: DeclKind) -> &'static str {
    match kind {
        DeclKind::Var => DeclKind::Let.as_str(),
        kind => kind.as_str(),
    }
}

fn key_text(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote_string(key)
    }
}

/// Render a string as a double-quoted literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_template(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Format a number the way the runtime's `String(n)` does: shortest
/// round-trip digits, exponent notation outside `[1e-7, 1e21)`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let sign = if n < 0.0 { "-" } else { "" };
    let sci = format!("{:e}", n.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else {
        let exp = point - 1;
        let exp_sign = if exp >= 0 { "+" } else { "-" };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{exp_sign}{}", exp.abs())
        } else {
            format!("{first}.{rest}e{exp_sign}{}", exp.abs())
        }
    };
    format!("{sign}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn roundtrip(src: &str) -> String {
        let program = parse_program(src).unwrap();
        emit_program(&program)
    }

    #[test]
    fn erases_types_and_normalises_layout() {
        let out = roundtrip(
            "interface P { x: number }\nfunction f(a: string, b?: number): string { if (b) return a; return a + 'x' }",
        );
        assert_eq!(
            out,
            "function f(a, b) {\n  if (b) {\n    return a;\n  }\n  return a + \"x\";\n}\n"
        );
    }

    #[test]
    fn printing_is_idempotent() {
        let src = r#"
const r = await notes.search(`q ${x ?? "none"}`, { limit: 5 });
let o = { a: 1, "b-c": [1, 2, ...rest], f(x) { return x * 2; }, g: async (y) => ({ y }) };
for (let i = 0; i < 3; i++) o.a += i;
for (const { id, title: t = "?" } of r) console.log(id, t);
switch (o.a) { case 1: case 2: break; default: o.a = -(-o.a); }
try { JSON.parse("x") } catch { } finally { o = null }
const v = (a ?? b) || c;
const w = (1).toString() + -x ** 2;
do { x--; } while (x > 0)
(function () { return 1; })();
return typeof o === "object" ? o?.f?.(2) : new Error("no");
"#;
        let once = roundtrip(src);
        let twice = roundtrip(&once);
        assert_eq!(once, twice);
        assert!(once.contains("(a ?? b) || c"));
        assert!(once.contains("(1).toString()"));
        assert!(once.contains("-(-o.a)"));
    }

    #[test]
    fn object_literals_with_functions_go_multiline() {
        let out = roundtrip("const ns = { a: function (x) { return x; }, b: 2 };");
        assert_eq!(
            out,
            "const ns = {\n  a: function (x) {\n    return x;\n  },\n  b: 2,\n};\n"
        );
    }

    #[test]
    fn var_prints_as_let() {
        let out = roundtrip("var n = 1;\nfor (var k in o) n++;");
        assert_eq!(out, "let n = 1;\nfor (let k in o) {\n  n++;\n}\n");
    }

    #[test]
    fn arrow_returning_object_is_parenthesised() {
        let out = roundtrip("const f = (x: number) => ({ x });");
        assert_eq!(out, "const f = (x) => ({ x });\n");
    }

    #[test]
    fn strings_are_requoted() {
        assert_eq!(quote_string("it's \"q\"\n"), r#""it's \"q\"\n""#);
        let out = roundtrip("const t = `a\\`b ${1} \\${x}`;");
        assert_eq!(out, "const t = `a\\`b ${1} \\${x}`;\n");
    }

    #[test]
    fn classes_print_without_types() {
        let src = r#"class Shape {
  static count: number = 0;
  label?: string;
  constructor(public_name: string) { Shape.count += 1; }
  get kind(): string { return "shape"; }
  static async of(n: number) { return new Shape(String(n)); }
}
class Square extends Shape { side = 2; area() { return this.side ** 2; } }"#;
        let out = roundtrip(src);
        assert_eq!(
            out,
            "class Shape {\n  static count = 0;\n  label;\n  constructor(public_name) {\n    Shape.count += 1;\n  }\n  get kind() {\n    return \"shape\";\n  }\n  static async of(n) {\n    return new Shape(String(n));\n  }\n}\nclass Square extends Shape {\n  side = 2;\n  area() {\n    return this.side ** 2;\n  }\n}\n"
        );
        assert_eq!(roundtrip(&out), out);
    }

    #[test]
    fn operators_keep_their_grouping() {
        let out = roundtrip("x = (a | b) & ~c << 2;\n[a, b] = [b, a];\n({ a, b: c = 1 } = o);\ny = -x ** 2;\nz >>>= 1;");
        assert_eq!(
            out,
            "x = (a | b) & ~c << 2;\n[a, b] = [b, a];\n({ a, b: c = 1 } = o);\ny = (-x) ** 2;\nz >>>= 1;\n"
        );
        assert_eq!(roundtrip(&out), out);
    }

    #[test]
    fn line_map_points_back_at_statements() {
        let program = parse_program("const a = 1;\n\n\nif (a) { throw new Error('x') }").unwrap();
        let (text, map) = emit_program_mapped(&program);
        assert_eq!(text, emit_program(&program));
        assert_eq!(text, "const a = 1;\nif (a) {\n  throw new Error(\"x\");\n}\n");
        assert_eq!(map.line_count(), 4);
        assert_eq!(map.resolve(1, 7), (1, 7));
        assert_eq!(map.resolve(2, 1), (4, 1));
        assert_eq!(map.resolve(3, 3), (4, 10));
        assert_eq!(map.resolve(3, 9), (4, 16));
        // The closing brace belongs to the `throw` line's statement.
        assert_eq!(map.resolve(4, 1), (4, 10));
        assert_eq!(map.resolve(9, 2), (9, 2));
    }

    #[test]
    fn numbers_format_like_the_runtime() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(123456789012345680000.0), "123456789012345680000");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(0.000001), "0.000001");
        assert_eq!(format_number(1.5e300), "1.5e+300");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(-0.0), "0");
    }
}
