//! Typed scripting dialect: parsing, type checking against the ambient
//! capability declarations, and printing of the untyped executable form.

pub mod ambient;
pub mod ast;
pub mod checker;
pub mod compile;
pub mod diag;
pub mod emit;
pub mod lexer;
pub mod parser;
pub mod signature;
pub mod types;

pub use ambient::ambient_declarations;
pub use compile::{
    CompiledFunction, CompiledProgram, NAMESPACE_BINDING, compile_function, compile_program, namespace_type_text,
};
pub use diag::{Diagnostic, LineIndex, Severity, Span};
pub use emit::{LineMap, format_number, quote_string};
pub use lexer::{Token, TokenKind, is_identifier, is_keyword, tokenize};
pub use parser::parse_program;
pub use signature::{FunctionSignature, ParamSchema};
