//! Static type checker.
//!
//! Runs in non-strict-null mode: `null`/`undefined` are assignable to every
//! type and unannotated parameters are `any`.  Functions with no annotations
//! at all (the shape of compiled text) accept any number of arguments.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ambient::Ambient;
use crate::ast::*;
use crate::diag::{Diagnostic, Span};
use crate::types::{ClassType, Field, FunctionType, ObjectType, ParamType, Type, TypeTable};

const MAX_DIAGNOSTICS: usize = 50;

const ARITHMETIC_OPERAND: &str =
    "An arithmetic operand must be of type 'any', 'number', 'bigint' or an enum type.";

#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Extra values visible to the program, e.g. the typed
    /// `customFunctions` object while registering a function.
    pub extra_globals: Vec<(String, Type)>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckOutput {
    pub diagnostics: Vec<Diagnostic>,
    /// Inferred types of top-level function declarations, by name.
    pub function_types: HashMap<String, Type>,
}

impl CheckOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

pub fn check_program(program: &Program, options: &CheckOptions) -> Result<CheckOutput, Diagnostic> {
    let ambient = Ambient::get()?;
    let mut checker = Checker {
        ambient,
        types: ambient.types.clone(),
        scopes: Vec::new(),
        frames: Vec::new(),
        output: CheckOutput::default(),
    };
    let mut globals = HashMap::new();
    for (name, ty) in &options.extra_globals {
        globals.insert(
            name.clone(),
            Binding {
                ty: ty.clone(),
                mutable: false,
                declared: true,
            },
        );
    }
    checker.scopes.push(globals);
    checker.scopes.push(HashMap::new());
    checker.frames.push(Frame::program());
    checker.hoist(&program.body);
    for stmt in &program.body {
        checker.check_stmt(stmt);
    }
    Ok(checker.output)
}

#[derive(Debug, Clone)]
struct Binding {
    ty: Type,
    mutable: bool,
    /// `false` for a hoisted placeholder not yet reached.
    declared: bool,
}

#[derive(Debug, Default)]
struct Frame {
    is_async: bool,
    is_program: bool,
    /// Declared return type (the `T` of `Promise<T>` for async functions).
    ret: Option<Type>,
    returns: Vec<Type>,
    returns_value: bool,
    loops: usize,
    switches: usize,
    this: ThisContext,
    super_called: bool,
}

/// What `this` and `super` mean inside a function body.
#[derive(Debug, Clone, Default)]
struct ThisContext {
    /// `None` where `this` may not be referenced.
    this_ty: Option<Type>,
    /// Members reachable as `super.name`.
    super_members: Option<Type>,
    /// Callable as `super(..)` inside a derived constructor.
    super_ctor: Option<Type>,
}

impl ThisContext {
    fn plain() -> Self {
        ThisContext {
            this_ty: Some(Type::Any),
            ..ThisContext::default()
        }
    }
}

/// What a class inherits from its `extends` clause.
#[derive(Debug, Default)]
struct ClassBase {
    fields: Vec<Field>,
    statics: Vec<Field>,
    ctor: Option<Arc<FunctionType>>,
    /// The base is not statically known; its members are `any`.
    open: bool,
}

impl Frame {
    fn program() -> Self {
        Frame {
            is_async: true,
            is_program: true,
            ..Frame::default()
        }
    }
}

struct Checker<'a> {
    ambient: &'a Ambient,
    types: TypeTable,
    scopes: Vec<HashMap<String, Binding>>,
    frames: Vec<Frame>,
    output: CheckOutput,
}

fn method(params: &[(&str, Type, bool)], ret: Type) -> Type {
    Type::Function(Arc::new(FunctionType {
        params: params
            .iter()
            .map(|(name, ty, optional)| ParamType {
                name: (*name).to_string(),
                ty: ty.clone(),
                optional: *optional,
            })
            .collect(),
        rest: None,
        ret,
    }))
}

fn variadic(params: &[(&str, Type, bool)], rest: Type, ret: Type) -> Type {
    match method(params, ret) {
        Type::Function(f) => {
            let mut f = (*f).clone();
            f.rest = Some(rest);
            Type::Function(Arc::new(f))
        }
        other => other,
    }
}

/// Literal `null`/`undefined` initialisers widen to `any`.
fn widen(ty: Type) -> Type {
    match ty {
        Type::Null | Type::Undefined | Type::Void => Type::Any,
        other => other,
    }
}

fn put_field(fields: &mut Vec<Field>, field: Field) {
    match fields.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => *existing = field,
        None => fields.push(field),
    }
}

/// Type of a field initialiser that is a plain literal.
fn literal_type(expr: &Expr) -> Type {
    match &expr.kind {
        ExprKind::Number(_) => Type::Number,
        ExprKind::Str(_) | ExprKind::Template(_) => Type::String,
        ExprKind::Bool(_) => Type::Boolean,
        ExprKind::Array(items) if items.is_empty() => Type::array(Type::Any),
        _ => Type::Any,
    }
}

fn is_literal_true(expr: Option<&Expr>) -> bool {
    match expr {
        None => true,
        Some(e) => matches!(e.kind, ExprKind::Bool(true)),
    }
}

/// Whether control can run off the end of `stmts`.
fn can_complete(stmts: &[Stmt]) -> bool {
    stmts.iter().all(stmt_can_complete)
}

fn stmt_can_complete(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => false,
        StmtKind::Block(stmts) => can_complete(stmts),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => match alternate {
            Some(alternate) => stmt_can_complete(consequent) || stmt_can_complete(alternate),
            None => true,
        },
        StmtKind::While { test, body } => !is_literal_true(Some(test)) || breaks_out(body),
        StmtKind::For { test, body, .. } => !is_literal_true(test.as_ref()) || breaks_out(body),
        StmtKind::DoWhile { body, test } => {
            if is_literal_true(Some(test)) {
                breaks_out(body)
            } else {
                stmt_can_complete(body) || breaks_out(body) || continues(body)
            }
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            if finalizer.as_deref().is_some_and(|f| !can_complete(f)) {
                return false;
            }
            can_complete(block) || handler.as_deref().is_some_and(can_complete)
        }
        StmtKind::Switch { cases, .. } => {
            let has_default = cases.iter().any(|c| c.test.is_none());
            let last_completes = cases.last().is_none_or(|c| can_complete(&c.body));
            !has_default || last_completes || cases.iter().any(|c| c.body.iter().any(breaks_out))
        }
        _ => true,
    }
}

/// A `break` in `stmt` that leaves the enclosing loop or switch.
fn breaks_out(stmt: &Stmt) -> bool {
    jumps(stmt, &|k| matches!(k, StmtKind::Break))
}

fn continues(stmt: &Stmt) -> bool {
    jumps(stmt, &|k| matches!(k, StmtKind::Continue))
}

fn jumps(stmt: &Stmt, is_jump: &dyn Fn(&StmtKind) -> bool) -> bool {
    let any = |stmts: &[Stmt]| stmts.iter().any(|s| jumps(s, is_jump));
    match &stmt.kind {
        kind if is_jump(kind) => true,
        StmtKind::Block(stmts) => any(stmts),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => jumps(consequent, is_jump) || alternate.as_deref().is_some_and(|a| jumps(a, is_jump)),
        StmtKind::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            any(block)
                || handler.as_deref().is_some_and(|h| any(h))
                || finalizer.as_deref().is_some_and(|f| any(f))
        }
        // Jumps inside a nested loop or switch target that statement.
        _ => false,
    }
}

impl<'a> Checker<'a> {
    // ── diagnostics ──────────────────────────────────────────────────────

    fn error(&mut self, span: Span, message: impl Into<String>) {
        if self.output.diagnostics.len() < MAX_DIAGNOSTICS {
            self.output
                .diagnostics
                .push(Diagnostic::error(span, message).with_code("type"));
        }
    }

    fn warning(&mut self, span: Span, message: impl Into<String>) {
        if self.output.diagnostics.len() < MAX_DIAGNOSTICS {
            self.output
                .diagnostics
                .push(Diagnostic::warning(span, message).with_code("type"));
        }
    }

    fn validate_type(&mut self, ty: &TypeExpr) -> Type {
        for (name, span) in self.types.unknown_names(ty) {
            self.error(span, format!("Cannot find name '{name}'."));
        }
        Type::from_expr(ty)
    }

    fn expect_assignable(&mut self, source: &Type, target: &Type, span: Span) {
        if !self.types.assignable(source, target) {
            self.error(
                span,
                format!("Type '{source}' is not assignable to type '{target}'."),
            );
        }
    }

    // ── scopes ───────────────────────────────────────────────────────────

    fn frame(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn value_type(&self, name: &str) -> Option<(Type, bool)> {
        if let Some(binding) = self.lookup(name) {
            return Some((binding.ty.clone(), binding.mutable));
        }
        self.ambient.values.get(name).map(|ty| (ty.clone(), false))
    }

    fn declare(&mut self, name: &str, ty: Type, mutable: bool, span: Span) {
        let redeclared = self
            .scopes
            .last()
            .and_then(|scope| scope.get(name))
            .is_some_and(|b| b.declared);
        if redeclared {
            self.error(span, format!("Cannot redeclare block-scoped variable '{name}'."));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.to_string(),
                Binding {
                    ty,
                    mutable,
                    declared: true,
                },
            );
        }
    }

    /// Register the types and names a block declares before checking it.
    fn hoist(&mut self, stmts: &[Stmt]) {
        let mut declared_types = Vec::new();
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Interface(decl) => {
                    let fields = decl
                        .members
                        .iter()
                        .map(|m| Field {
                            name: m.name.clone(),
                            ty: Type::from_expr(&m.ty),
                            optional: m.optional,
                        })
                        .collect();
                    self.types.insert(
                        decl.name.clone(),
                        Type::Object(Arc::new(ObjectType {
                            name: Some(decl.name.clone()),
                            fields,
                        })),
                    );
                    declared_types.extend(decl.members.iter().map(|m| m.ty.clone()));
                }
                StmtKind::TypeAlias { name, ty } => {
                    self.types.insert(name.clone(), Type::from_expr(ty));
                    declared_types.push(ty.clone());
                }
                _ => {}
            }
        }
        for ty in &declared_types {
            self.validate_type(ty);
        }

        for stmt in stmts {
            match &stmt.kind {
                StmtKind::VarDecl(decl) => {
                    for d in &decl.declarators {
                        for name in d.pattern.bound_names() {
                            if let Some(scope) = self.scopes.last_mut() {
                                scope.entry(name).or_insert(Binding {
                                    ty: Type::Any,
                                    mutable: decl.kind != DeclKind::Const,
                                    declared: false,
                                });
                            }
                        }
                    }
                }
                StmtKind::Class(class) => {
                    let ty = self.declare_class(class);
                    self.declare(&class.name, ty, false, class.span);
                }
                StmtKind::Function(f) => {
                    if let Some(name) = &f.name {
                        let ty = self.signature_type(f);
                        let duplicate = self
                            .scopes
                            .last()
                            .and_then(|scope| scope.get(name))
                            .is_some_and(|b| b.declared);
                        if duplicate {
                            self.error(f.span, "Duplicate function implementation.");
                        }
                        self.declare(name, ty, true, f.span);
                    }
                }
                _ => {}
            }
        }
    }

    /// A function's type from its annotations alone.
    fn signature_type(&mut self, f: &Function) -> Type {
        let untyped = f.is_untyped();
        let mut params = Vec::new();
        let mut rest = None;
        for (i, p) in f.params.iter().enumerate() {
            let ty = p.ty.as_ref().map(Type::from_expr).unwrap_or(Type::Any);
            if p.rest {
                rest = Some(match ty {
                    Type::Array(elem) => *elem,
                    other => other,
                });
            } else {
                params.push(ParamType {
                    name: p.name().map(str::to_string).unwrap_or_else(|| format!("arg{i}")),
                    ty,
                    optional: p.is_optional() || untyped,
                });
            }
        }
        let ret = match (&f.return_type, f.is_async) {
            (Some(t), _) => Type::from_expr(t),
            (None, true) => Type::promise(Type::Any),
            (None, false) => Type::Any,
        };
        Type::Function(Arc::new(FunctionType { params, rest, ret }))
    }

    fn class_base(&self, extends: Option<&Expr>) -> ClassBase {
        let Some(extends) = extends else {
            return ClassBase::default();
        };
        let open = ClassBase {
            open: true,
            ..ClassBase::default()
        };
        let ExprKind::Ident(name) = &extends.kind else {
            return open;
        };
        let Some((ty, _)) = self.value_type(name) else {
            return open;
        };
        let (instance, ctor, statics) = match self.types.resolve(&ty) {
            Type::Class(class) => (
                Type::Named(class.name.clone()),
                class.ctor.clone(),
                class.statics.clone(),
            ),
            Type::Function(ctor) => (ctor.ret.clone(), ctor, Vec::new()),
            _ => return open,
        };
        match self.types.resolve(&instance) {
            Type::Object(obj) => ClassBase {
                fields: obj.fields.clone(),
                statics,
                ctor: Some(ctor),
                open: false,
            },
            _ => ClassBase {
                statics,
                ctor: Some(ctor),
                ..open
            },
        }
    }

    /// A class's constructor and statics from its annotations.  The
    /// instance type is registered under the class name.
    fn declare_class(&mut self, class: &ClassDecl) -> Type {
        let base = self.class_base(class.extends.as_ref());
        let mut fields = base.fields;
        let mut statics = base.statics;
        for member in &class.members {
            match member {
                ClassMember::Field {
                    name,
                    is_static,
                    ty,
                    optional,
                    init,
                    ..
                } => {
                    let ty = match (ty, init) {
                        (Some(t), _) => Type::from_expr(t),
                        (None, Some(init)) => literal_type(init),
                        (None, None) => Type::Any,
                    };
                    let list = if *is_static { &mut statics } else { &mut fields };
                    put_field(
                        list,
                        Field {
                            name: name.clone(),
                            ty,
                            optional: *optional,
                        },
                    );
                }
                ClassMember::Method {
                    name,
                    is_static,
                    kind,
                    function,
                } => {
                    let list = if *is_static { &mut statics } else { &mut fields };
                    let ty = match kind {
                        MethodKind::Method => self.signature_type(function),
                        MethodKind::Get => {
                            function.return_type.as_ref().map(Type::from_expr).unwrap_or(Type::Any)
                        }
                        MethodKind::Set => {
                            if list.iter().any(|f| &f.name == name) {
                                continue;
                            }
                            function
                                .params
                                .first()
                                .and_then(|p| p.ty.as_ref())
                                .map(Type::from_expr)
                                .unwrap_or(Type::Any)
                        }
                    };
                    put_field(
                        list,
                        Field {
                            name: name.clone(),
                            ty,
                            optional: false,
                        },
                    );
                }
                ClassMember::Constructor(_) => {}
            }
        }
        let (params, rest) = match (class.constructor(), &base.ctor) {
            (Some(ctor), _) => match self.signature_type(ctor) {
                Type::Function(f) => (f.params.clone(), f.rest.clone()),
                _ => (Vec::new(), None),
            },
            (None, Some(inherited)) => (inherited.params.clone(), inherited.rest.clone()),
            (None, None) if base.open => (Vec::new(), Some(Type::Any)),
            (None, None) => (Vec::new(), None),
        };
        let instance = if base.open {
            Type::Any
        } else {
            Type::Object(Arc::new(ObjectType {
                name: Some(class.name.clone()),
                fields,
            }))
        };
        self.types.insert(class.name.clone(), instance);
        Type::Class(Arc::new(ClassType {
            name: class.name.clone(),
            ctor: Arc::new(FunctionType {
                params,
                rest,
                ret: Type::Named(class.name.clone()),
            }),
            statics,
        }))
    }

    fn check_class(&mut self, class: &ClassDecl) {
        if let Some(extends) = &class.extends {
            let ty = self.check_expr(extends, None);
            if !matches!(self.types.resolve(&ty), Type::Class(_) | Type::Function(_) | Type::Any) {
                self.error(extends.span, format!("Type '{ty}' is not a constructor function type."));
            }
        }
        let class_ty = self
            .value_type(&class.name)
            .map(|(ty, _)| ty)
            .unwrap_or(Type::Any);
        let instance = Type::Named(class.name.clone());
        let base = self.class_base(class.extends.as_ref());
        let derived = class.extends.is_some();
        let inherited = |fields: &[Field]| {
            if !derived {
                None
            } else if base.open {
                Some(Type::Any)
            } else {
                Some(Type::Object(Arc::new(ObjectType {
                    name: None,
                    fields: fields.to_vec(),
                })))
            }
        };
        let base_instance = inherited(&base.fields);
        let base_statics = inherited(&base.statics);
        let context = |is_static: bool| ThisContext {
            this_ty: Some(if is_static { class_ty.clone() } else { instance.clone() }),
            super_members: if is_static { base_statics.clone() } else { base_instance.clone() },
            super_ctor: None,
        };
        for member in &class.members {
            match member {
                ClassMember::Field {
                    is_static, ty, init, ..
                } => {
                    let declared = ty.as_ref().map(|t| self.validate_type(t));
                    if let Some(init) = init {
                        self.frames.push(Frame {
                            this: context(*is_static),
                            ..Frame::default()
                        });
                        let init_ty = self.check_expr(init, declared.as_ref());
                        self.frames.pop();
                        if let Some(declared) = &declared {
                            self.expect_assignable(&init_ty, declared, init.span);
                        }
                    }
                }
                ClassMember::Constructor(ctor) => {
                    let this = ThisContext {
                        super_ctor: derived.then(|| {
                            base.ctor.clone().map(Type::Function).unwrap_or(Type::Any)
                        }),
                        ..context(false)
                    };
                    let (_, frame) = self.check_function_in(ctor, None, this);
                    if derived && !frame.super_called {
                        self.error(ctor.span, "Constructors for derived classes must contain a 'super' call.");
                    }
                }
                ClassMember::Method {
                    is_static,
                    function,
                    ..
                } => {
                    self.check_function_in(function, None, context(*is_static));
                }
            }
        }
    }

    // ── statements ───────────────────────────────────────────────────────

    fn check_block(&mut self, stmts: &[Stmt]) {
        self.push_scope();
        self.hoist(stmts);
        for stmt in stmts {
            self.check_stmt(stmt);
        }
        self.pop_scope();
    }

    fn check_body(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Block(stmts) => self.check_block(stmts),
            _ => self.check_block(std::slice::from_ref(stmt)),
        }
    }

    fn check_loop_body(&mut self, stmt: &Stmt) {
        self.frame().loops += 1;
        self.check_body(stmt);
        self.frame().loops -= 1;
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.check_expr(expr, None);
            }
            StmtKind::VarDecl(decl) => self.check_var_decl(decl),
            StmtKind::Function(f) => {
                let ty = Type::Function(self.check_function(f, None));
                if self.frames.len() == 1 {
                    if let Some(name) = &f.name {
                        self.output.function_types.insert(name.clone(), ty);
                    }
                }
            }
            StmtKind::Class(class) => self.check_class(class),
            StmtKind::Return(arg) => {
                let expected = self.frame().ret.clone();
                let ty = match arg {
                    Some(expr) => {
                        let ty = self.check_expr(expr, expected.as_ref());
                        if let Some(expected) = &expected {
                            self.expect_assignable(&ty, expected, expr.span);
                        }
                        ty
                    }
                    None => Type::Void,
                };
                let frame = self.frame();
                frame.returns.push(ty);
                frame.returns_value |= arg.is_some();
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.check_expr(test, None);
                self.check_body(consequent);
                if let Some(alternate) = alternate {
                    self.check_body(alternate);
                }
            }
            StmtKind::Block(stmts) => self.check_block(stmts),
            StmtKind::While { test, body } => {
                self.check_expr(test, None);
                self.check_loop_body(body);
            }
            StmtKind::DoWhile { body, test } => {
                self.check_loop_body(body);
                self.check_expr(test, None);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                self.push_scope();
                match init {
                    Some(ForInit::VarDecl(decl)) => self.check_var_decl(decl),
                    Some(ForInit::Expr(expr)) => {
                        self.check_expr(expr, None);
                    }
                    None => {}
                }
                if let Some(test) = test {
                    self.check_expr(test, None);
                }
                if let Some(update) = update {
                    self.check_expr(update, None);
                }
                self.check_loop_body(body);
                self.pop_scope();
            }
            StmtKind::ForOf {
                binding,
                iterable,
                body,
            } => {
                let iter_ty = self.check_expr(iterable, None);
                let elem = match self.types.resolve(&iter_ty) {
                    Type::Array(elem) => *elem,
                    Type::String => Type::String,
                    Type::Any | Type::Never => Type::Any,
                    _ => {
                        self.error(
                            iterable.span,
                            format!("Type '{iter_ty}' is not an array type or a string type."),
                        );
                        Type::Any
                    }
                };
                self.push_scope();
                self.bind_pattern(&binding.pattern, &elem, binding.kind != DeclKind::Const);
                self.check_loop_body(body);
                self.pop_scope();
            }
            StmtKind::ForIn {
                binding,
                object,
                body,
            } => {
                self.check_expr(object, None);
                self.push_scope();
                self.bind_pattern(&binding.pattern, &Type::String, binding.kind != DeclKind::Const);
                self.check_loop_body(body);
                self.pop_scope();
            }
            StmtKind::Break => {
                let frame = self.frame();
                if frame.loops == 0 && frame.switches == 0 {
                    self.error(
                        stmt.span,
                        "A 'break' statement can only be used within an enclosing iteration or switch statement.",
                    );
                }
            }
            StmtKind::Continue => {
                if self.frame().loops == 0 {
                    self.error(
                        stmt.span,
                        "A 'continue' statement can only be used within an enclosing iteration statement.",
                    );
                }
            }
            StmtKind::Throw(expr) => {
                self.check_expr(expr, None);
            }
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                self.check_block(block);
                if let Some(handler) = handler {
                    self.push_scope();
                    if let Some(param) = param {
                        self.bind_pattern(param, &Type::Any, true);
                    }
                    self.hoist(handler);
                    for stmt in handler {
                        self.check_stmt(stmt);
                    }
                    self.pop_scope();
                }
                if let Some(finalizer) = finalizer {
                    self.check_block(finalizer);
                }
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.check_expr(discriminant, None);
                self.push_scope();
                let all: Vec<Stmt> = cases.iter().flat_map(|c| c.body.iter().cloned()).collect();
                self.hoist(&all);
                self.frame().switches += 1;
                for case in cases {
                    if let Some(test) = &case.test {
                        self.check_expr(test, None);
                    }
                    for stmt in &case.body {
                        self.check_stmt(stmt);
                    }
                }
                self.frame().switches -= 1;
                self.pop_scope();
            }
            StmtKind::Interface(_)
            | StmtKind::TypeAlias { .. }
            | StmtKind::Declare { .. }
            | StmtKind::Empty => {}
        }
    }

    fn check_var_decl(&mut self, decl: &VarDecl) {
        for d in &decl.declarators {
            if decl.kind == DeclKind::Var {
                self.warning(d.span, "'var' declarations are block-scoped like 'let'.");
            }
            let declared = d.ty.as_ref().map(|t| self.validate_type(t));
            if decl.kind == DeclKind::Const && d.init.is_none() {
                self.error(d.span, "'const' declarations must be initialized.");
            }
            let init = d
                .init
                .as_ref()
                .map(|e| (self.check_expr(e, declared.as_ref()), e.span));
            if let (Some(declared), Some((init_ty, span))) = (&declared, &init) {
                self.expect_assignable(init_ty, declared, *span);
            }
            let ty = declared
                .or_else(|| init.map(|(t, _)| widen(t)))
                .unwrap_or(Type::Any);
            self.bind_pattern(&d.pattern, &ty, decl.kind != DeclKind::Const);
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, ty: &Type, mutable: bool) {
        self.walk_pattern(pattern, ty, Some(mutable));
    }

    /// `[a, b] = value`: every name must be an existing mutable binding.
    fn assign_pattern(&mut self, pattern: &Pattern, ty: &Type) {
        self.walk_pattern(pattern, ty, None);
    }

    fn assign_name(&mut self, name: &str, ty: &Type, span: Span) {
        let target = Expr {
            kind: ExprKind::Ident(name.to_string()),
            span,
        };
        let target_ty = self.check_assign_target(&target);
        self.expect_assignable(ty, &target_ty, span);
    }

    /// Declare (`Some(mutable)`) or assign (`None`) the names in `pattern`.
    fn walk_pattern(&mut self, pattern: &Pattern, ty: &Type, declare: Option<bool>) {
        match pattern {
            Pattern::Ident { name, span } => match declare {
                Some(mutable) => self.declare(name, ty.clone(), mutable, *span),
                None => self.assign_name(name, ty, *span),
            },
            Pattern::Object { props, span } => {
                for prop in props {
                    let field_ty = match self.lookup_member(ty, &prop.key) {
                        Some(t) => t,
                        None => {
                            self.error(
                                *span,
                                format!("Property '{}' does not exist on type '{ty}'.", prop.key),
                            );
                            Type::Any
                        }
                    };
                    if let Some(default) = &prop.default {
                        let dt = self.check_expr(default, Some(&field_ty));
                        self.expect_assignable(&dt, &field_ty, default.span);
                    }
                    self.walk_pattern(&prop.value, &field_ty, declare);
                }
            }
            Pattern::Array {
                elements,
                rest,
                span,
            } => {
                let elem = match self.types.resolve(ty) {
                    Type::Array(elem) => *elem,
                    Type::String => Type::String,
                    Type::Any | Type::Never => Type::Any,
                    _ => {
                        self.error(*span, format!("Type '{ty}' is not an array type."));
                        Type::Any
                    }
                };
                for elem_pattern in elements.iter().flatten() {
                    if let Some(default) = &elem_pattern.default {
                        let dt = self.check_expr(default, Some(&elem));
                        self.expect_assignable(&dt, &elem, default.span);
                    }
                    self.walk_pattern(&elem_pattern.pattern, &elem, declare);
                }
                if let Some(rest) = rest {
                    let rest_ty = Type::array(elem.clone());
                    match declare {
                        Some(mutable) => self.declare(rest, rest_ty, mutable, *span),
                        None => self.assign_name(rest, &rest_ty, *span),
                    }
                }
            }
        }
    }

    fn check_function(&mut self, f: &Function, expected: Option<&FunctionType>) -> Arc<FunctionType> {
        let this = if f.is_arrow {
            self.frames.last().map(|fr| fr.this.clone()).unwrap_or_default()
        } else {
            ThisContext::plain()
        };
        self.check_function_in(f, expected, this).0
    }

    fn check_function_in(
        &mut self,
        f: &Function,
        expected: Option<&FunctionType>,
        this: ThisContext,
    ) -> (Arc<FunctionType>, Frame) {
        let declared_ret = f.return_type.as_ref().map(|t| self.validate_type(t));
        let inner_ret = match (&declared_ret, f.is_async) {
            (Some(t), true) => match self.types.resolve(t) {
                Type::Promise(inner) => Some(*inner),
                Type::Any => Some(Type::Any),
                _ => {
                    self.error(
                        f.span,
                        "The return type of an async function or method must be the global Promise<T> type.",
                    );
                    Some(Type::Any)
                }
            },
            (Some(t), false) => Some(t.clone()),
            (None, _) => None,
        };

        self.push_scope();
        if let (Some(name), false) = (&f.name, f.is_arrow) {
            let self_ty = self.signature_type(f);
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(
                    name.clone(),
                    Binding {
                        ty: self_ty,
                        mutable: true,
                        declared: false,
                    },
                );
            }
        }
        self.frames.push(Frame {
            is_async: f.is_async,
            ret: inner_ret.clone(),
            this,
            ..Frame::default()
        });

        let untyped = f.is_untyped();
        let mut params = Vec::new();
        let mut rest = None;
        for (i, p) in f.params.iter().enumerate() {
            let contextual = expected.and_then(|e| e.param_type(i)).cloned();
            let ty = match &p.ty {
                Some(te) => self.validate_type(te),
                None if p.rest => Type::array(contextual.unwrap_or(Type::Any)),
                None => contextual.unwrap_or(Type::Any),
            };
            if let Some(default) = &p.default {
                let dt = self.check_expr(default, Some(&ty));
                self.expect_assignable(&dt, &ty, default.span);
            }
            self.bind_pattern(&p.pattern, &ty, true);
            if p.rest {
                rest = Some(match ty {
                    Type::Array(elem) => *elem,
                    other => other,
                });
            } else {
                params.push(ParamType {
                    name: p.name().map(str::to_string).unwrap_or_else(|| format!("arg{i}")),
                    ty,
                    optional: p.is_optional() || untyped,
                });
            }
        }

        let expr_ty = match &f.body {
            FunctionBody::Block(stmts) => {
                self.hoist(stmts);
                for stmt in stmts {
                    self.check_stmt(stmt);
                }
                None
            }
            FunctionBody::Expr(expr) => {
                let ty = self.check_expr(expr, inner_ret.as_ref());
                if let Some(expected) = &inner_ret {
                    self.expect_assignable(&ty, expected, expr.span);
                }
                Some(ty)
            }
        };

        let mut frame = self.frames.pop().unwrap_or_default();
        self.pop_scope();

        if let (Some(declared), FunctionBody::Block(stmts)) = (&inner_ret, &f.body) {
            let permits_no_value = match self.types.resolve(declared) {
                Type::Void | Type::Any | Type::Undefined => true,
                Type::Union(members) => members
                    .iter()
                    .any(|m| matches!(m, Type::Void | Type::Any | Type::Undefined)),
                _ => false,
            };
            if !permits_no_value && can_complete(stmts) {
                let message = if frame.returns_value {
                    "Function lacks ending return statement and return type does not include 'undefined'."
                } else {
                    "A function whose declared type is neither 'void' nor 'any' must return a value."
                };
                self.error(f.span, message);
            }
        }

        let returns = std::mem::take(&mut frame.returns);
        let inferred = match (inner_ret, expr_ty) {
            (Some(declared), _) => declared,
            (None, Some(ty)) => ty,
            (None, None) if returns.is_empty() => Type::Void,
            (None, None) => Type::union(returns),
        };
        let ret = if f.is_async {
            match inferred {
                Type::Promise(_) => inferred,
                other => Type::promise(other),
            }
        } else {
            inferred
        };
        (Arc::new(FunctionType { params, rest, ret }), frame)
    }

    // ── expressions ──────────────────────────────────────────────────────

    fn is_numeric(&self, ty: &Type) -> bool {
        match self.types.resolve(ty) {
            Type::Number | Type::Any | Type::Never | Type::Null | Type::Undefined => true,
            Type::Union(members) => members.iter().all(|m| self.is_numeric(m)),
            _ => false,
        }
    }

    fn is_stringy(&self, ty: &Type) -> bool {
        match self.types.resolve(ty) {
            Type::String => true,
            Type::Union(members) => members.iter().any(|m| self.is_stringy(m)),
            _ => false,
        }
    }

    fn check_expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        match &expr.kind {
            ExprKind::Number(_) => Type::Number,
            ExprKind::Str(_) => Type::String,
            ExprKind::Template(elems) => {
                for elem in elems {
                    if let TemplateElem::Expr(e) = elem {
                        self.check_expr(e, None);
                    }
                }
                Type::String
            }
            ExprKind::Bool(_) => Type::Boolean,
            ExprKind::Null => Type::Null,
            ExprKind::Undefined => Type::Undefined,
            ExprKind::This => match self.frames.last().and_then(|f| f.this.this_ty.clone()) {
                Some(ty) => ty,
                None => {
                    self.error(expr.span, "'this' cannot be referenced in this context.");
                    Type::Any
                }
            },
            ExprKind::Super => {
                self.error(expr.span, "'super' can only be referenced in members of derived classes.");
                Type::Any
            }
            ExprKind::Ident(name) => match self.value_type(name) {
                Some((ty, _)) => ty,
                None => {
                    self.error(expr.span, format!("Cannot find name '{name}'."));
                    Type::Any
                }
            },
            ExprKind::Array(elems) => {
                let expected_elem = expected.and_then(|t| match self.types.resolve(t) {
                    Type::Array(elem) => Some(*elem),
                    _ => None,
                });
                let mut types = Vec::new();
                for elem in elems {
                    match elem {
                        ArrayElem::Expr(e) => types.push(self.check_expr(e, expected_elem.as_ref())),
                        ArrayElem::Spread(e) => {
                            let ty = self.check_expr(e, None);
                            match self.types.resolve(&ty) {
                                Type::Array(inner) => types.push(*inner),
                                Type::String => types.push(Type::String),
                                Type::Any => types.push(Type::Any),
                                _ => {
                                    self.error(e.span, format!("Type '{ty}' is not an array type."));
                                    types.push(Type::Any);
                                }
                            }
                        }
                    }
                }
                if types.is_empty() {
                    Type::array(expected_elem.unwrap_or(Type::Any))
                } else {
                    Type::array(widen(Type::union(types)))
                }
            }
            ExprKind::Object(props) => self.check_object(props, expected),
            ExprKind::Function(f) => {
                let expected_fn = expected.and_then(|t| match self.types.resolve(t) {
                    Type::Function(ft) => Some(ft),
                    _ => None,
                });
                Type::Function(self.check_function(f, expected_fn.as_deref()))
            }
            ExprKind::Unary { op, arg } => {
                let ty = self.check_expr(arg, None);
                match op {
                    UnaryOp::Not => Type::Boolean,
                    UnaryOp::Neg => {
                        if !self.is_numeric(&ty) {
                            self.error(arg.span, ARITHMETIC_OPERAND);
                        }
                        Type::Number
                    }
                    UnaryOp::Plus => Type::Number,
                    UnaryOp::BitNot => {
                        if !self.is_numeric(&ty) {
                            self.error(arg.span, ARITHMETIC_OPERAND);
                        }
                        Type::Number
                    }
                    UnaryOp::Typeof => Type::String,
                    UnaryOp::Delete => Type::Boolean,
                }
            }
            ExprKind::Update { target, .. } => {
                let ty = self.check_assign_target(target);
                if !self.is_numeric(&ty) {
                    self.error(target.span, ARITHMETIC_OPERAND);
                }
                Type::Number
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.check_expr(left, None);
                let r = self.check_expr(right, None);
                match op {
                    BinaryOp::Add => self.add_type(&l, &r, expr.span, "+"),
                    BinaryOp::Sub
                    | BinaryOp::Mul
                    | BinaryOp::Div
                    | BinaryOp::Rem
                    | BinaryOp::Pow => {
                        self.arithmetic_operands(&l, left.span, &r, right.span);
                        Type::Number
                    }
                    op if op.is_bitwise() => {
                        self.arithmetic_operands(&l, left.span, &r, right.span);
                        Type::Number
                    }
                    _ => Type::Boolean,
                }
            }
            ExprKind::Logical { op, left, right } => match op {
                LogicalOp::And => {
                    self.check_expr(left, None);
                    self.check_expr(right, expected)
                }
                LogicalOp::Or | LogicalOp::Nullish => {
                    let l = self.check_expr(left, expected);
                    let r = self.check_expr(right, expected);
                    Type::union([l.non_nullable(), r])
                }
            },
            ExprKind::Assign { op, target, value } => {
                let target_ty = self.check_assign_target(target);
                let value_ty = self.check_expr(value, Some(&target_ty));
                match op {
                    AssignOp::Assign | AssignOp::Nullish | AssignOp::And | AssignOp::Or => {
                        self.expect_assignable(&value_ty, &target_ty, value.span);
                    }
                    AssignOp::Add => {
                        self.add_type(&target_ty, &value_ty, expr.span, "+=");
                    }
                    _ => self.arithmetic_operands(&target_ty, target.span, &value_ty, value.span),
                }
                value_ty
            }
            ExprKind::Destructure { pattern, value } => {
                let value_ty = self.check_expr(value, None);
                self.assign_pattern(pattern, &value_ty);
                value_ty
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.check_expr(test, None);
                let a = self.check_expr(consequent, expected);
                let b = self.check_expr(alternate, expected);
                Type::union([a, b])
            }
            ExprKind::Call { callee, args, .. } => self.check_call(callee, args, expr.span),
            ExprKind::New { callee, args } => {
                let callee_ty = self.check_expr(callee, None);
                match self.types.resolve(&callee_ty) {
                    Type::Class(class) => {
                        self.call_with(&Type::Function(class.ctor.clone()), args, expr.span)
                    }
                    Type::Function(_) | Type::Any => self.call_with(&callee_ty, args, expr.span),
                    _ => {
                        self.error(callee.span, "This expression is not constructable.");
                        self.check_args_untyped(args);
                        Type::Any
                    }
                }
            }
            ExprKind::Member {
                object, property, ..
            } => {
                if let Some(statics) = self.statics_of(object) {
                    return self.member_type(&statics, property, expr.span);
                }
                if matches!(object.kind, ExprKind::Super) {
                    return match self.frames.last().and_then(|f| f.this.super_members.clone()) {
                        Some(base) => self.member_type(&base, property, expr.span),
                        None => self.check_expr(object, None),
                    };
                }
                let object_ty = self.check_expr(object, None);
                self.member_type(&object_ty, property, expr.span)
            }
            ExprKind::Index { object, index, .. } => {
                let object_ty = self.check_expr(object, None);
                self.check_expr(index, None);
                match self.types.resolve(&object_ty) {
                    Type::Array(elem) => *elem,
                    Type::String => Type::String,
                    Type::Record(value) => *value,
                    Type::Object(obj) => match &index.kind {
                        ExprKind::Str(key) => obj.field(key).map(|f| f.ty.clone()).unwrap_or(Type::Any),
                        _ => Type::Any,
                    },
                    _ => Type::Any,
                }
            }
            ExprKind::Await(arg) => {
                let in_async = self.frames.last().is_some_and(|f| f.is_async || f.is_program);
                if !in_async {
                    self.error(
                        expr.span,
                        "'await' expressions are only allowed within async functions and at the top levels of modules.",
                    );
                }
                let ty = self.check_expr(arg, None);
                match self.types.resolve(&ty) {
                    Type::Promise(inner) => *inner,
                    _ => ty,
                }
            }
            ExprKind::As { expr, ty } => {
                self.check_expr(expr, None);
                self.validate_type(ty)
            }
            ExprKind::NonNull(inner) => self.check_expr(inner, expected).non_nullable(),
        }
    }

    fn add_type(&mut self, l: &Type, r: &Type, span: Span, op: &str) -> Type {
        if self.is_stringy(l) || self.is_stringy(r) {
            Type::String
        } else if self.types.resolve(l).is_any() || self.types.resolve(r).is_any() {
            Type::Any
        } else if self.is_numeric(l) && self.is_numeric(r) {
            Type::Number
        } else {
            self.error(
                span,
                format!("Operator '{op}' cannot be applied to types '{l}' and '{r}'."),
            );
            Type::Any
        }
    }

    fn arithmetic_operands(&mut self, l: &Type, l_span: Span, r: &Type, r_span: Span) {
        if !self.is_numeric(l) {
            self.error(
                l_span,
                "The left-hand side of an arithmetic operation must be of type 'any', 'number', 'bigint' or an enum type.",
            );
        }
        if !self.is_numeric(r) {
            self.error(
                r_span,
                "The right-hand side of an arithmetic operation must be of type 'any', 'number', 'bigint' or an enum type.",
            );
        }
    }

    fn check_assign_target(&mut self, target: &Expr) -> Type {
        match &target.kind {
            ExprKind::Ident(name) => match self.value_type(name) {
                Some((ty, mutable)) => {
                    if !mutable {
                        self.error(
                            target.span,
                            format!("Cannot assign to '{name}' because it is a constant."),
                        );
                    }
                    ty
                }
                None => {
                    self.error(target.span, format!("Cannot find name '{name}'."));
                    Type::Any
                }
            },
            _ => self.check_expr(target, None),
        }
    }

    fn check_object(&mut self, props: &[PropDef], expected: Option<&Type>) -> Type {
        let expected_obj = expected.and_then(|t| match self.types.resolve(t) {
            Type::Object(obj) => Some(obj),
            _ => None,
        });
        let mut fields: Vec<Field> = Vec::new();
        let mut dynamic = false;
        let put = |fields: &mut Vec<Field>, name: &str, ty: Type| {
            let field = Field {
                name: name.to_string(),
                ty: widen(ty),
                optional: false,
            };
            match fields.iter_mut().find(|f| f.name == name) {
                Some(existing) => *existing = field,
                None => fields.push(field),
            }
        };
        for prop in props {
            match prop {
                PropDef::KeyValue {
                    key: PropKey::Named(name),
                    value,
                } => {
                    let field_expected = expected_obj
                        .as_ref()
                        .and_then(|o| o.field(name))
                        .map(|f| f.ty.clone());
                    let ty = self.check_expr(value, field_expected.as_ref());
                    put(&mut fields, name, ty);
                }
                PropDef::KeyValue {
                    key: PropKey::Computed(key),
                    value,
                } => {
                    self.check_expr(key, None);
                    self.check_expr(value, None);
                    dynamic = true;
                }
                PropDef::Shorthand { name, span } => {
                    let ty = match self.value_type(name) {
                        Some((ty, _)) => ty,
                        None => {
                            self.error(*span, format!("Cannot find name '{name}'."));
                            Type::Any
                        }
                    };
                    put(&mut fields, name, ty);
                }
                PropDef::Spread(e) => {
                    let ty = self.check_expr(e, None);
                    match self.types.resolve(&ty) {
                        Type::Object(obj) => {
                            for f in &obj.fields {
                                put(&mut fields, &f.name, f.ty.clone());
                            }
                        }
                        Type::Null | Type::Undefined => {}
                        _ => dynamic = true,
                    }
                }
            }
        }
        if dynamic {
            Type::Record(Box::new(Type::Any))
        } else {
            Type::Object(Arc::new(ObjectType { name: None, fields }))
        }
    }

    fn check_args_untyped(&mut self, args: &[ArrayElem]) {
        for arg in args {
            match arg {
                ArrayElem::Expr(e) | ArrayElem::Spread(e) => {
                    self.check_expr(e, None);
                }
            }
        }
    }

    /// Static members of an unshadowed ambient builtin such as `Number`.
    fn statics_of(&self, object: &Expr) -> Option<Type> {
        let ExprKind::Ident(name) = &object.kind else {
            return None;
        };
        if self.lookup(name).is_some() {
            return None;
        }
        let statics = format!("{name}Constructor");
        self.ambient
            .types
            .contains(&statics)
            .then_some(Type::Named(statics))
    }

    fn check_call(&mut self, callee: &Expr, args: &[ArrayElem], span: Span) -> Type {
        if matches!(callee.kind, ExprKind::Super) {
            let ctor = self.frames.last().and_then(|f| f.this.super_ctor.clone());
            let Some(ctor) = ctor else {
                self.error(callee.span, "'super' calls are only allowed in constructors of derived classes.");
                self.check_args_untyped(args);
                return Type::Void;
            };
            self.frame().super_called = true;
            self.call_with(&ctor, args, span);
            return Type::Void;
        }
        if let ExprKind::Member {
            object, property, ..
        } = &callee.kind
        {
            if self.statics_of(object).is_none() && !matches!(object.kind, ExprKind::Super) {
                let object_ty = self.check_expr(object, None);
                let array = self.types.resolve(&object_ty);
                if let Type::Array(elem) = &array {
                    if matches!(property.as_str(), "map" | "flatMap" | "reduce") {
                        return self.array_generic_call(property, elem, args, span);
                    }
                }
                let callee_ty = self.member_type(&object_ty, property, callee.span);
                let ret = self.call_with(&callee_ty, args, span);
                // Flattening below the first level loses the element type.
                if matches!(array, Type::Array(_)) && property == "flat" && !args.is_empty() {
                    return Type::array(Type::Any);
                }
                return ret;
            }
        }
        let callee_ty = self.check_expr(callee, None);
        self.call_with(&callee_ty, args, span)
    }

    fn call_with(&mut self, callee_ty: &Type, args: &[ArrayElem], span: Span) -> Type {
        let func = match self.types.resolve(callee_ty) {
            Type::Function(func) => func,
            Type::Any | Type::Union(_) | Type::Never => {
                self.check_args_untyped(args);
                return Type::Any;
            }
            _ => {
                self.error(
                    span,
                    format!(
                        "This expression is not callable. Type '{callee_ty}' has no call signatures."
                    ),
                );
                self.check_args_untyped(args);
                return Type::Any;
            }
        };
        let has_spread = args.iter().any(|a| matches!(a, ArrayElem::Spread(_)));
        if !has_spread {
            let given = args.len();
            let min = func.required_params();
            let max = if func.rest.is_some() {
                None
            } else {
                Some(func.params.len())
            };
            if given < min || max.is_some_and(|m| given > m) {
                let expected = match max {
                    Some(m) if m == min => m.to_string(),
                    Some(m) => format!("{min}-{m}"),
                    None => format!("at least {min}"),
                };
                self.error(
                    span,
                    format!("Expected {expected} arguments, but got {given}."),
                );
            }
        }
        for (i, arg) in args.iter().enumerate() {
            match arg {
                ArrayElem::Expr(e) => {
                    let param = func.param_type(i).cloned();
                    let ty = self.check_expr(e, param.as_ref());
                    if let Some(param) = &param {
                        if !self.types.assignable(&ty, param) {
                            self.error(
                                e.span,
                                format!(
                                    "Argument of type '{ty}' is not assignable to parameter of type '{param}'."
                                ),
                            );
                        }
                    }
                }
                ArrayElem::Spread(e) => {
                    self.check_expr(e, None);
                }
            }
        }
        func.ret.clone()
    }

    /// `map`, `flatMap` and `reduce`, whose result type depends on the
    /// callback.
    fn array_generic_call(
        &mut self,
        method_name: &str,
        elem: &Type,
        args: &[ArrayElem],
        span: Span,
    ) -> Type {
        let array = Type::array(elem.clone());
        let arg_exprs: Vec<&Expr> = args
            .iter()
            .filter_map(|a| match a {
                ArrayElem::Expr(e) => Some(e),
                ArrayElem::Spread(_) => None,
            })
            .collect();
        if arg_exprs.len() != args.len() || args.is_empty() || args.len() > 2 {
            self.error(
                span,
                format!("Expected 1-2 arguments, but got {}.", args.len()),
            );
            self.check_args_untyped(args);
            return if method_name == "reduce" {
                Type::Any
            } else {
                Type::array(Type::Any)
            };
        }
        let value_params = |acc: Option<Type>| {
            let mut params = Vec::new();
            if let Some(acc) = acc {
                params.push(ParamType {
                    name: "accumulator".into(),
                    ty: acc,
                    optional: false,
                });
            }
            params.push(ParamType {
                name: "value".into(),
                ty: elem.clone(),
                optional: false,
            });
            params.push(ParamType {
                name: "index".into(),
                ty: Type::Number,
                optional: false,
            });
            params.push(ParamType {
                name: "array".into(),
                ty: array.clone(),
                optional: false,
            });
            params
        };

        if method_name == "reduce" {
            let acc = match arg_exprs.get(1) {
                Some(init) => widen(self.check_expr(init, None)),
                None => elem.clone(),
            };
            let expected = Type::Function(Arc::new(FunctionType {
                params: value_params(Some(acc.clone())),
                rest: None,
                ret: acc.clone(),
            }));
            let callback = self.check_expr(arg_exprs[0], Some(&expected));
            if !self.types.assignable(&callback, &expected) {
                self.error(
                    arg_exprs[0].span,
                    format!(
                        "Argument of type '{callback}' is not assignable to parameter of type '{expected}'."
                    ),
                );
            }
            return acc;
        }

        let expected = Type::Function(Arc::new(FunctionType {
            params: value_params(None),
            rest: None,
            ret: Type::Any,
        }));
        let callback = self.check_expr(arg_exprs[0], Some(&expected));
        if let Some(extra) = arg_exprs.get(1) {
            self.check_expr(extra, None);
        }
        let result = match self.types.resolve(&callback) {
            Type::Function(f) => f.ret.clone(),
            Type::Any => Type::Any,
            _ => {
                self.error(
                    arg_exprs[0].span,
                    format!(
                        "Argument of type '{callback}' is not assignable to parameter of type '{expected}'."
                    ),
                );
                Type::Any
            }
        };
        if method_name == "flatMap" {
            match self.types.resolve(&result) {
                Type::Array(inner) => Type::Array(inner),
                _ => Type::array(result),
            }
        } else {
            Type::array(result)
        }
    }

    fn member_type(&mut self, object_ty: &Type, property: &str, span: Span) -> Type {
        if let Some(ty) = self.lookup_member(object_ty, property) {
            return ty;
        }
        let hint = match self.types.resolve(object_ty) {
            Type::Promise(_) => " Did you forget to use 'await'?",
            _ => "",
        };
        self.error(
            span,
            format!("Property '{property}' does not exist on type '{object_ty}'.{hint}"),
        );
        Type::Any
    }

    fn lookup_member(&self, object_ty: &Type, property: &str) -> Option<Type> {
        match self.types.resolve(object_ty) {
            Type::Any | Type::Never | Type::Null | Type::Undefined | Type::Void | Type::Named(_) => {
                Some(Type::Any)
            }
            Type::String => string_member(property),
            Type::Number => match property {
                "toFixed" => Some(method(&[("digits", Type::Number, true)], Type::String)),
                "toString" => Some(method(&[("radix", Type::Number, true)], Type::String)),
                _ => None,
            },
            Type::Boolean => {
                (property == "toString").then(|| method(&[], Type::String))
            }
            Type::Array(elem) => self.array_member(&elem, property),
            Type::Record(value) => Some(*value),
            Type::Object(obj) => obj.field(property).map(|f| f.ty.clone()),
            Type::Class(class) => match property {
                "name" => Some(Type::String),
                _ => class.static_field(property).map(|f| f.ty.clone()),
            },
            Type::Function(_) | Type::Promise(_) => None,
            Type::Union(members) => {
                let concrete: Vec<&Type> = members.iter().filter(|m| !m.is_nullish()).collect();
                if concrete.is_empty() {
                    return Some(Type::Any);
                }
                let mut found = Vec::new();
                for member in concrete {
                    found.push(self.lookup_member(member, property)?);
                }
                Some(Type::union(found))
            }
        }
    }

    fn array_member(&self, elem: &Type, property: &str) -> Option<Type> {
        let t = elem.clone();
        let array = Type::array(t.clone());
        let callback = |ret: Type| {
            method(
                &[
                    ("value", t.clone(), false),
                    ("index", Type::Number, false),
                    ("array", array.clone(), false),
                ],
                ret,
            )
        };
        let ty = match property {
            "length" => Type::Number,
            "push" | "unshift" => variadic(&[], t.clone(), Type::Number),
            "pop" | "shift" => method(&[], t.clone()),
            "at" => method(&[("index", Type::Number, false)], t.clone()),
            "slice" => method(
                &[("start", Type::Number, true), ("end", Type::Number, true)],
                array.clone(),
            ),
            "splice" => variadic(
                &[
                    ("start", Type::Number, false),
                    ("deleteCount", Type::Number, true),
                ],
                t.clone(),
                array.clone(),
            ),
            "concat" => variadic(&[], Type::Any, array.clone()),
            "join" => method(&[("separator", Type::String, true)], Type::String),
            "indexOf" | "lastIndexOf" => method(
                &[("item", t.clone(), false), ("from", Type::Number, true)],
                Type::Number,
            ),
            "includes" => method(&[("item", t.clone(), false)], Type::Boolean),
            "reverse" => method(&[], array.clone()),
            "sort" => method(
                &[(
                    "compare",
                    method(&[("a", t.clone(), false), ("b", t.clone(), false)], Type::Number),
                    true,
                )],
                array.clone(),
            ),
            "filter" => method(&[("predicate", callback(Type::Any), false)], array.clone()),
            "find" => method(&[("predicate", callback(Type::Any), false)], t.clone()),
            "findIndex" => method(&[("predicate", callback(Type::Any), false)], Type::Number),
            "some" | "every" => {
                method(&[("predicate", callback(Type::Any), false)], Type::Boolean)
            }
            "forEach" => method(&[("callback", callback(Type::Void), false)], Type::Void),
            "map" | "flatMap" => method(
                &[("callback", callback(Type::Any), false)],
                Type::array(Type::Any),
            ),
            "reduce" => method(
                &[
                    (
                        "reducer",
                        method(
                            &[
                                ("accumulator", Type::Any, false),
                                ("value", t.clone(), false),
                                ("index", Type::Number, false),
                                ("array", array.clone(), false),
                            ],
                            Type::Any,
                        ),
                        false,
                    ),
                    ("initial", Type::Any, true),
                ],
                Type::Any,
            ),
            "flat" => {
                let depth = [("depth", Type::Number, true)];
                match self.types.resolve(&t) {
                    Type::Array(inner) => method(&depth, Type::Array(inner)),
                    _ => method(&depth, array.clone()),
                }
            }
            "toString" => method(&[], Type::String),
            _ => return None,
        };
        Some(ty)
    }
}

fn string_member(property: &str) -> Option<Type> {
    let search = [("search", Type::String, false), ("position", Type::Number, true)];
    let range = [("start", Type::Number, true), ("end", Type::Number, true)];
    let ty = match property {
        "length" => Type::Number,
        "toUpperCase" | "toLowerCase" | "trim" | "trimStart" | "trimEnd" | "toString" => {
            method(&[], Type::String)
        }
        "includes" | "startsWith" | "endsWith" => method(&search, Type::Boolean),
        "indexOf" | "lastIndexOf" => method(&search, Type::Number),
        "slice" | "substring" => method(&range, Type::String),
        "split" => method(
            &[("separator", Type::String, false), ("limit", Type::Number, true)],
            Type::array(Type::String),
        ),
        "replace" | "replaceAll" => method(
            &[
                ("pattern", Type::String, false),
                ("replacement", Type::String, false),
            ],
            Type::String,
        ),
        "repeat" => method(&[("count", Type::Number, false)], Type::String),
        "padStart" | "padEnd" => method(
            &[("length", Type::Number, false), ("fill", Type::String, true)],
            Type::String,
        ),
        "charAt" | "at" => method(&[("index", Type::Number, false)], Type::String),
        "charCodeAt" => method(&[("index", Type::Number, false)], Type::Number),
        "concat" => variadic(&[], Type::Any, Type::String),
        "localeCompare" => method(&[("other", Type::String, false)], Type::Number),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn check(src: &str) -> Vec<String> {
        let program = parse_program(src).unwrap();
        check_program(&program, &CheckOptions::default())
            .unwrap()
            .diagnostics
            .into_iter()
            .filter(|d| d.is_error())
            .map(|d| d.message)
            .collect()
    }

    fn assert_clean(src: &str) {
        let errors = check(src);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn well_typed_program_has_no_errors() {
        assert_clean(
            r#"
interface Summary { title: string; words: number }
const hits = await notes.search("rust", { limit: 3 });
const summaries: Summary[] = [];
for (const hit of hits) {
  const note = await notes.get(hit.id);
  if (!note) continue;
  summaries.push({ title: note.title, words: note.content.split(" ").length });
}
const titles = summaries.map((s) => s.title.toUpperCase()).filter((t) => t.length > 0);
const total = summaries.reduce((acc, s) => acc + s.words, 0);
console.log(`found ${titles.length}`, total);
return { titles, total: total.toFixed(1) };
"#,
        );
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let errors = check("const data = fs.readFileSync('/etc/passwd');");
        assert_eq!(errors, vec!["Cannot find name 'fs'.".to_string()]);
    }

    #[test]
    fn argument_type_and_count_are_checked() {
        let errors = check(
            "function greet(name: string, times?: number): string { return name; }\ngreet(1);\ngreet();",
        );
        assert_eq!(
            errors,
            vec![
                "Argument of type 'number' is not assignable to parameter of type 'string'."
                    .to_string(),
                "Expected 1-2 arguments, but got 0.".to_string(),
            ]
        );
    }

    #[test]
    fn declared_return_type_is_enforced() {
        let errors = check("function f(): number { return 'x'; }");
        assert_eq!(
            errors,
            vec!["Type 'string' is not assignable to type 'number'.".to_string()]
        );
        let errors = check("function g(): string { const x = 1; }");
        assert_eq!(
            errors,
            vec![
                "A function whose declared type is neither 'void' nor 'any' must return a value."
                    .to_string()
            ]
        );
        assert_clean("function h(): string { throw new Error('unreachable'); }");
    }

    #[test]
    fn falling_off_the_end_is_reported() {
        let errors = check("function noret(x: number): number { if (x > 0) { return 1; } }");
        assert_eq!(
            errors,
            vec![
                "Function lacks ending return statement and return type does not include 'undefined'."
                    .to_string()
            ]
        );
        assert_clean(
            r#"function sign(x: number): number { if (x > 0) { return 1; } else { return -1; } }
function spin(): number { while (true) { if (Math.random() > 0.5) return 1; } }
function pick(k: string): string { switch (k) { case "a": return "A"; default: throw new Error(k); } }
function guarded(): string { try { return "ok"; } finally { console.log("done"); } }
function maybe(x: number): number | undefined { if (x > 0) { return x; } }"#,
        );
        let errors = check("function leaks(): number { while (true) { break; } }");
        assert_eq!(errors.len(), 1);
        let errors = check("function tail(k: string): string { switch (k) { case 'a': return 'A'; } }");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn bitwise_operators_are_numeric() {
        assert_clean("let x = 5;
x <<= 1;
x |= 2;
const y: number = (x & 3) ^ ~x >>> 1;
let ok = false;
ok ||= y > 2;");
        let errors = check("const z = 'a' | 1;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("The left-hand side of an arithmetic operation"));
    }

    #[test]
    fn destructuring_assignment_targets_existing_bindings() {
        assert_clean("let a = 1;
let b = 2;
[a, b] = [b, a];
let t = '';
({ title: t } = { title: 'x' });");
        assert_eq!(
            check("const a = 1;
let b = 2;
[a, b] = [b, a];"),
            vec!["Cannot assign to 'a' because it is a constant.".to_string()]
        );
        assert_eq!(
            check("let s = '';
[s] = [1];"),
            vec!["Type 'number' is not assignable to type 'string'.".to_string()]
        );
    }

    #[test]
    fn classes_are_typed() {
        assert_clean(
            r#"class Shape {
  static count = 0;
  name: string;
  constructor(name: string) { this.name = name; Shape.count += 1; }
  area(): number { return 0; }
  describe(): string { return `${this.name}: ${this.area().toFixed(1)}`; }
}
class Square extends Shape {
  side: number;
  constructor(side: number) { super("square"); this.side = side; }
  area(): number { return this.side * this.side; }
  get perimeter(): number { return this.side * 4; }
  describe(): string { return super.describe() + "!"; }
}
const sq: Shape = new Square(2);
const total: number = new Square(3).perimeter + Shape.count;
return [sq.describe(), total];"#,
        );
        let errors = check(
            "class P { x: number = 0; }
const p = new P(1);
p.y;
const s: string = p.x;",
        );
        assert_eq!(
            errors,
            vec![
                "Expected 0 arguments, but got 1.".to_string(),
                "Property 'y' does not exist on type 'P'.".to_string(),
                "Type 'number' is not assignable to type 'string'.".to_string(),
            ]
        );
        assert_eq!(
            check("class A {}
class B extends A { constructor() { } }"),
            vec!["Constructors for derived classes must contain a 'super' call.".to_string()]
        );
        assert_eq!(
            check("const t = this;"),
            vec!["'this' cannot be referenced in this context.".to_string()]
        );
        assert_clean("class NotFound extends Error { constructor(what: string) { super(`${what} missing`); this.name = 'NotFound'; } }");
    }

    #[test]
    fn builtin_statics_and_flatten_depth() {
        assert_clean(
            "const big: number = Number.MAX_SAFE_INTEGER;
const ok: boolean = Number.isInteger(big);
const flat: any[] = [[1, [2]]].flat(Infinity);
const one: number[] = [[1], [2]].flat();",
        );
        assert_eq!(
            check("Number.NOPE;"),
            vec!["Property 'NOPE' does not exist on type 'NumberConstructor'.".to_string()]
        );
        // A local binding shadows the builtin statics.
        assert_clean("function f(Number: any) { return Number.anything; }");
    }

    #[test]
    fn missing_await_is_reported() {
        let errors = check("async function f() { const n = notes.get('x'); return n.title; }");
        assert_eq!(
            errors,
            vec![
                "Property 'title' does not exist on type 'Promise<Note | null>'. Did you forget to use 'await'?"
                    .to_string()
            ]
        );
    }

    #[test]
    fn await_outside_async_function() {
        let errors = check("function f() { return await notes.list(); }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("'await' expressions are only allowed"));
        // Top-level await is fine in programs.
        assert_clean("const all = await notes.list();\nreturn all.length;");
    }

    #[test]
    fn const_reassignment_and_redeclaration() {
        let errors = check("const a = 1;\na = 2;\nlet b = 1;\nlet b = 2;\nnotes = null;");
        assert_eq!(
            errors,
            vec![
                "Cannot assign to 'a' because it is a constant.".to_string(),
                "Cannot redeclare block-scoped variable 'b'.".to_string(),
                "Cannot assign to 'notes' because it is a constant.".to_string(),
            ]
        );
        assert_eq!(
            check("const c;"),
            vec!["'const' declarations must be initialized.".to_string()]
        );
    }

    #[test]
    fn non_strict_nulls() {
        assert_clean("let s: string = null;\nlet n: number = undefined;\nfunction f(x: string) {}\nf(null);");
    }

    #[test]
    fn arithmetic_on_strings_is_rejected() {
        let errors = check("const x = 'a' * 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("The left-hand side of an arithmetic operation"));
        assert_clean("const y = 'a' + 2;");
    }

    #[test]
    fn contextual_typing_of_callbacks() {
        let errors = check("const xs = [1, 2, 3];\nxs.forEach((x) => x.toUpperCase());");
        assert_eq!(
            errors,
            vec!["Property 'toUpperCase' does not exist on type 'number'.".to_string()]
        );
    }

    #[test]
    fn untyped_functions_accept_missing_arguments() {
        assert_clean(
            "const ns = { fmt: function fmt(message, prefix) { return `${prefix}: ${message}`; } };\nns.fmt('hi');",
        );
    }

    #[test]
    fn break_outside_loop() {
        assert_eq!(
            check("break;"),
            vec![
                "A 'break' statement can only be used within an enclosing iteration or switch statement."
                    .to_string()
            ]
        );
        assert_clean("for (;;) { break; }\nswitch (1) { case 1: break; }");
    }

    #[test]
    fn unknown_type_names_are_reported() {
        assert_eq!(
            check("let x: Missing = 1;"),
            vec!["Cannot find name 'Missing'.".to_string()]
        );
    }

    #[test]
    fn extra_globals_are_visible() {
        let program = parse_program("customFunctions.anything(1, 2);").unwrap();
        let options = CheckOptions {
            extra_globals: vec![("customFunctions".to_string(), Type::Any)],
        };
        let out = check_program(&program, &options).unwrap();
        assert!(!out.has_errors());
    }

    #[test]
    fn infers_function_return_types() {
        let program =
            parse_program("function double(x: number) { return x * 2; }\nasync function load() { return 'x'; }")
                .unwrap();
        let out = check_program(&program, &CheckOptions::default()).unwrap();
        assert_eq!(out.function_types["double"].to_string(), "(x: number) => number");
        assert_eq!(out.function_types["load"].to_string(), "() => Promise<string>");
    }

    #[test]
    fn var_is_accepted_with_warning() {
        let program = parse_program("var x = 1;").unwrap();
        let out = check_program(&program, &CheckOptions::default()).unwrap();
        assert!(!out.has_errors());
        assert_eq!(out.diagnostics.len(), 1);
    }
}
