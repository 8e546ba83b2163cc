//! Source → compiled text, for registered functions and ad-hoc programs.

use std::sync::Arc;

use tracing::debug;

use crate::ambient::Ambient;
use crate::ast::{FunctionBody, Pattern, StmtKind};
use crate::checker::{CheckOptions, check_program};
use crate::diag::Diagnostic;
use crate::emit::{LineMap, emit_function, emit_program_mapped};
use crate::parser::{parse_program, parse_type};
use crate::signature::FunctionSignature;
use crate::types::Type;

/// Name under which the function namespace is visible to programs.
pub const NAMESPACE_BINDING: &str = "customFunctions";

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    /// Untyped `function name(...) { ... }` text.
    pub compiled_text: String,
    /// Normalised signature; derived from the source when none was given.
    pub signature: FunctionSignature,
    pub is_async: bool,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub compiled_text: String,
    /// Lines of `compiled_text` back to positions in the input text.
    pub line_map: LineMap,
    pub warnings: Vec<Diagnostic>,
}

/// Type text for the `customFunctions` object holding `members`, plus the
/// `list` and `remove` helpers every namespace carries.  A member without a
/// signature accepts anything; parameter and return types that do not
/// resolve against the ambient declarations become `any`.
pub fn namespace_type_text<'a>(
    members: impl IntoIterator<Item = (&'a str, Option<&'a FunctionSignature>)>,
) -> String {
    let mut parts = Vec::new();
    for (name, signature) in members {
        let Some(signature) = signature else {
            parts.push(format!("{name}(...args: any[]): any"));
            continue;
        };
        let params: Vec<String> = signature
            .params
            .iter()
            .map(|p| {
                let opt = if p.optional { "?" } else { "" };
                format!("{}{opt}: {}", p.name, visible_type(&p.ty))
            })
            .collect();
        parts.push(format!(
            "{name}({}): {}",
            params.join(", "),
            visible_type(&signature.return_type)
        ));
    }
    parts.push("list(): { name: string; description: string; signature: string }[]".to_string());
    parts.push("remove(name: string): boolean".to_string());
    format!("{{ {} }}", parts.join("; "))
}

/// `text` normalised, or `any` when it names types a caller cannot see.
fn visible_type(text: &str) -> String {
    let Ok(expr) = parse_type(text) else {
        return "any".to_string();
    };
    let resolves = Ambient::get()
        .map(|ambient| ambient.types.unknown_names(&expr).is_empty())
        .unwrap_or(false);
    if resolves {
        Type::from_expr(&expr).to_string()
    } else {
        "any".to_string()
    }
}

fn signature_error(span: crate::diag::Span, message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(span, message).with_code("signature")
}

/// Compile one registered function.  The source must declare exactly one
/// top-level function called `name`; interfaces and type aliases may sit
/// beside it.  Sibling functions are reachable through `customFunctions`,
/// typed by `namespace` (see [`namespace_type_text`]).
pub fn compile_function(
    name: &str,
    source: &str,
    schema: Option<&FunctionSignature>,
    namespace: &str,
) -> Result<CompiledFunction, Vec<Diagnostic>> {
    if source.trim().is_empty() {
        return Err(vec![
            Diagnostic::general("Function source is empty.").with_code("signature"),
        ]);
    }
    let mut program = parse_program(source)?;

    let mut errors = Vec::new();
    let mut function_index = None;
    for (i, stmt) in program.body.iter().enumerate() {
        match &stmt.kind {
            StmtKind::Function(_) if function_index.is_none() => function_index = Some(i),
            StmtKind::Function(_) => errors.push(signature_error(
                stmt.span,
                "Only one function may be declared per registered function.",
            )),
            kind if kind.is_type_only() => {}
            _ => errors.push(signature_error(
                stmt.span,
                "Only a function declaration and type declarations are allowed here.",
            )),
        }
    }
    let Some(index) = function_index else {
        errors.push(
            Diagnostic::general(format!("Expected a function declaration named '{name}'."))
                .with_code("signature"),
        );
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let stmt_span = program.body[index].span;
    let StmtKind::Function(function) = &mut program.body[index].kind else {
        return Err(vec![signature_error(stmt_span, "Expected a function declaration.")]);
    };
    let function = Arc::make_mut(function);

    if function.name.as_deref() != Some(name) {
        errors.push(signature_error(
            function.span,
            format!(
                "Function is named '{}' but is being registered as '{name}'.",
                function.name.as_deref().unwrap_or_default()
            ),
        ));
    }
    match &function.body {
        FunctionBody::Block(stmts) if stmts.iter().all(|s| s.kind.is_type_only()) => {
            errors.push(signature_error(function.span, "Function body is empty."));
        }
        _ => {}
    }
    for param in &function.params {
        if param.rest || !matches!(param.pattern, Pattern::Ident { .. }) {
            errors.push(signature_error(
                param.span,
                "Parameters of registered functions must be plain identifiers.",
            ));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    if let Some(schema) = schema {
        let schema = schema.normalized().map_err(|d| vec![d])?;
        if schema.params.len() != function.params.len() {
            errors.push(signature_error(
                function.span,
                format!(
                    "Function declares {} parameters but the schema lists {}.",
                    function.params.len(),
                    schema.params.len()
                ),
            ));
        }
        for (i, (param, expected)) in function.params.iter_mut().zip(&schema.params).enumerate() {
            let param_name = param.name().unwrap_or_default().to_string();
            if param_name != expected.name {
                errors.push(signature_error(
                    param.span,
                    format!(
                        "Parameter {} is named '{param_name}' but the schema names it '{}'.",
                        i + 1,
                        expected.name
                    ),
                ));
                continue;
            }
            if param.is_optional() != expected.optional {
                let (schema_says, source_says) = if expected.optional {
                    ("optional", "required")
                } else {
                    ("required", "optional")
                };
                errors.push(signature_error(
                    param.span,
                    format!(
                        "Parameter '{param_name}' is {schema_says} in the schema but {source_says} in the source."
                    ),
                ));
            }
            match &param.ty {
                Some(annotation) => {
                    let declared = Type::from_expr(annotation).to_string();
                    if declared != expected.ty {
                        errors.push(signature_error(
                            param.span,
                            format!(
                                "Parameter '{param_name}' is declared as '{declared}' but the schema says '{}'.",
                                expected.ty
                            ),
                        ));
                    }
                }
                None => match parse_type(&expected.ty) {
                    Ok(ty) => param.ty = Some(ty),
                    Err(d) => errors.push(d.with_code("signature")),
                },
            }
        }
        match &function.return_type {
            Some(annotation) => {
                let declared = Type::from_expr(annotation).to_string();
                if declared != schema.return_type {
                    errors.push(signature_error(
                        function.span,
                        format!(
                            "Return type is declared as '{declared}' but the schema says '{}'.",
                            schema.return_type
                        ),
                    ));
                }
            }
            None if schema.return_type != "any" => match parse_type(&schema.return_type) {
                Ok(ty) => function.return_type = Some(ty),
                Err(d) => errors.push(d.with_code("signature")),
            },
            None => {}
        }
        if !errors.is_empty() {
            return Err(errors);
        }
    }

    let namespace_ty = parse_type(namespace)
        .map(|expr| Type::from_expr(&expr))
        .map_err(|d| vec![d.with_code("signature")])?;
    let options = CheckOptions {
        extra_globals: vec![(NAMESPACE_BINDING.to_string(), namespace_ty)],
    };
    let output = check_program(&program, &options).map_err(|d| vec![d])?;
    let (errors, warnings): (Vec<_>, Vec<_>) =
        output.diagnostics.into_iter().partition(Diagnostic::is_error);
    if !errors.is_empty() {
        debug!(function = %name, errors = errors.len(), "function failed to type-check");
        return Err(errors);
    }

    let StmtKind::Function(function) = &program.body[index].kind else {
        return Err(vec![signature_error(stmt_span, "Expected a function declaration.")]);
    };
    let signature = match output.function_types.get(name) {
        Some(Type::Function(ty)) => FunctionSignature::from_function_type(ty),
        _ => FunctionSignature::default(),
    };
    let compiled_text = emit_function(function);
    debug!(
        function = %name,
        bytes = compiled_text.len(),
        warnings = warnings.len(),
        "compiled function"
    );
    Ok(CompiledFunction {
        name: name.to_string(),
        compiled_text,
        signature,
        is_async: function.is_async,
        warnings,
    })
}

/// Compile an ad-hoc program.  Top-level `await` and `return` are allowed;
/// the value of a top-level `return` is the program's result.  A program
/// whose last statement is an expression returns that expression's value.
pub fn compile_program(text: &str) -> Result<CompiledProgram, Vec<Diagnostic>> {
    let mut program = parse_program(text)?;
    if program.body.iter().all(|s| matches!(s.kind, StmtKind::Empty)) {
        return Err(vec![Diagnostic::general("Program is empty.").with_code("parse")]);
    }
    let output = check_program(&program, &CheckOptions::default()).map_err(|d| vec![d])?;
    let (errors, warnings): (Vec<_>, Vec<_>) =
        output.diagnostics.into_iter().partition(Diagnostic::is_error);
    if !errors.is_empty() {
        return Err(errors);
    }
    if let Some(last) = program.body.iter_mut().rev().find(|s| !s.kind.is_type_only()) {
        if let StmtKind::Expr(expr) = &last.kind {
            last.kind = StmtKind::Return(Some(expr.clone()));
        }
    }
    let (compiled_text, line_map) = emit_program_mapped(&program);
    debug!(bytes = compiled_text.len(), warnings = warnings.len(), "compiled program");
    Ok(CompiledProgram {
        compiled_text,
        line_map,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::ParamSchema;

    const FORMAT_MESSAGE: &str = r#"function formatMessage(message: string, prefix?: string): string {
  return (prefix ?? "Message") + ": " + message;
}"#;

    fn format_schema() -> FunctionSignature {
        FunctionSignature::new(
            vec![
                ParamSchema::new("message", "string"),
                ParamSchema::new("prefix", "string").optional(),
            ],
            "string",
        )
    }

    /// Compile with no siblings registered.
    fn compile_alone(
        name: &str,
        source: &str,
        schema: Option<&FunctionSignature>,
    ) -> Result<CompiledFunction, Vec<Diagnostic>> {
        compile_function(name, source, schema, &namespace_type_text([]))
    }

    #[test]
    fn compiles_to_untyped_text() {
        let compiled = compile_alone("formatMessage", FORMAT_MESSAGE, Some(&format_schema())).unwrap();
        assert_eq!(
            compiled.compiled_text,
            "function formatMessage(message, prefix) {\n  return (prefix ?? \"Message\") + \": \" + message;\n}"
        );
        assert_eq!(compiled.signature, format_schema());
        assert!(!compiled.is_async);
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile_alone("formatMessage", FORMAT_MESSAGE, None).unwrap();
        let b = compile_alone("formatMessage", FORMAT_MESSAGE, None).unwrap();
        assert_eq!(a.compiled_text, b.compiled_text);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn derives_signature_when_schema_is_omitted() {
        let compiled = compile_alone(
            "countWords",
            "async function countWords(id: string) { const n = await notes.get(id); return n.content.split(' ').length; }",
            None,
        )
        .unwrap();
        assert_eq!(compiled.signature.render("countWords"), "countWords(id: string): Promise<number>");
        assert!(compiled.is_async);
    }

    #[test]
    fn schema_types_fill_unannotated_parameters() {
        let schema = FunctionSignature::new(vec![ParamSchema::new("n", "number")], "number");
        let err = compile_alone("twice", "function twice(n) { return n.toUpperCase(); }", Some(&schema))
            .unwrap_err();
        assert_eq!(err[0].message, "Property 'toUpperCase' does not exist on type 'number'.");
    }

    #[test]
    fn schema_mismatches_are_reported() {
        let schema = FunctionSignature::new(vec![ParamSchema::new("message", "number")], "string");
        let err = compile_alone("formatMessage", FORMAT_MESSAGE, Some(&schema)).unwrap_err();
        assert!(err.iter().all(|d| d.code.as_deref() == Some("signature")));
        assert!(err[0].message.contains("2 parameters"), "{}", err[0].message);
        assert!(err[1].message.contains("'string' but the schema says 'number'"));
    }

    #[test]
    fn empty_sources_and_bodies_are_rejected() {
        assert!(compile_alone("f", "   ", None).is_err());
        let err = compile_alone("f", "function f() {}", None).unwrap_err();
        assert_eq!(err[0].message, "Function body is empty.");
        assert!(compile_program("// nothing here\n").is_err());
    }

    #[test]
    fn unresolved_references_fail_compilation() {
        let err = compile_alone("f", "function f() { return fs.readFileSync('/etc/passwd'); }", None)
            .unwrap_err();
        assert_eq!(err[0].message, "Cannot find name 'fs'.");
        assert_eq!((err[0].line, err[0].column), (1, 23));
    }

    #[test]
    fn name_and_shape_are_enforced() {
        let err = compile_alone("g", "function f() { return 1; }", None).unwrap_err();
        assert!(err[0].message.contains("registered as 'g'"));
        let err = compile_alone("f", "function f() { return 1; }\nconst x = 2;", None).unwrap_err();
        assert_eq!(err[0].line, 2);
        let ok = compile_alone(
            "area",
            "interface Rect { w: number; h: number }\nfunction area(r: Rect): number { return r.w * r.h; }",
            None,
        )
        .unwrap();
        assert_eq!(ok.compiled_text, "function area(r) {\n  return r.w * r.h;\n}");
    }

    #[test]
    fn functions_may_call_siblings() {
        let schema = format_schema();
        let namespace = namespace_type_text([("formatMessage", Some(&schema)), ("shout", None)]);
        compile_function(
            "shout",
            "function shout(s: string): string { return customFunctions.formatMessage(s).toUpperCase(); }",
            None,
            &namespace,
        )
        .unwrap();

        let err = compile_function(
            "shout",
            "function shout(s: string): string { return customFunctions.formatMessage(42); }",
            None,
            &namespace,
        )
        .unwrap_err();
        assert_eq!(
            err[0].message,
            "Argument of type 'number' is not assignable to parameter of type 'string'."
        );
    }

    #[test]
    fn missing_siblings_fail_compilation() {
        let err = compile_alone(
            "shout",
            "function shout(s: string): string { return customFunctions.formatMessage(s); }",
            None,
        )
        .unwrap_err();
        assert!(
            err[0].message.starts_with("Property 'formatMessage' does not exist on type"),
            "{}",
            err[0].message
        );
    }

    #[test]
    fn namespace_types_hide_private_names() {
        let schema = FunctionSignature::new(
            vec![ParamSchema::new("r", "Rect"), ParamSchema::new("scale", "number").optional()],
            "Array<Note>",
        );
        assert_eq!(
            namespace_type_text([("area", Some(&schema)), ("raw", None)]),
            "{ area(r: any, scale?: number): Note[]; raw(...args: any[]): any; \
             list(): { name: string; description: string; signature: string }[]; \
             remove(name: string): boolean }"
        );
    }

    #[test]
    fn programs_allow_top_level_await_and_return() {
        let compiled =
            compile_program("const all = await notes.list();\nreturn all.length;").unwrap();
        assert_eq!(compiled.compiled_text, "const all = await notes.list();\nreturn all.length;\n");
    }

    #[test]
    fn trailing_expression_is_the_result() {
        let compiled = compile_program("const x = 2;\nx * 3;\ninterface Unused { a: number }").unwrap();
        assert_eq!(compiled.compiled_text, "const x = 2;\nreturn x * 3;\n");
        assert_eq!(compiled.line_map.resolve(2, 8).0, 2);

        let compiled = compile_program("for (const n of [1]) { n; }").unwrap();
        assert!(!compiled.compiled_text.contains("return"));
    }
}
