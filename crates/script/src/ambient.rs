//! The fixed declaration set every compilation is checked against.  It
//! describes exactly what the VM injects: the `notes` capability object,
//! `console`, a handful of standard globals and the `__functions` host hook
//! used by the function namespace.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::ast::StmtKind;
use crate::diag::Diagnostic;
use crate::parser::parse_ambient;
use crate::types::{Field, ObjectType, Type, TypeTable};

const DECLARATIONS: &str = r#"interface Note {
  id: string;
  title: string;
  content: string;
  tags: string[];
  createdAt: string;
  updatedAt: string;
}

interface NoteInput {
  title: string;
  content?: string;
  tags?: string[];
}

interface NotePatch {
  title?: string;
  content?: string;
  tags?: string[];
}

interface SearchHit {
  id: string;
  title: string;
  snippet: string;
  score: number;
}

interface SearchOptions {
  limit?: number;
  tags?: string[];
}

interface NotesApi {
  get(id: string): Promise<Note | null>;
  getByTitle(title: string): Promise<Note | null>;
  create(input: NoteInput): Promise<Note>;
  update(id: string, patch: NotePatch): Promise<Note>;
  delete(id: string): Promise<boolean>;
  search(query: string, options?: SearchOptions): Promise<SearchHit[]>;
  list(options?: SearchOptions): Promise<Note[]>;
}

interface Console {
  log(...args: any[]): void;
  info(...args: any[]): void;
  warn(...args: any[]): void;
  error(...args: any[]): void;
  debug(...args: any[]): void;
}

interface MathApi {
  PI: number;
  E: number;
  abs(x: number): number;
  floor(x: number): number;
  ceil(x: number): number;
  round(x: number): number;
  trunc(x: number): number;
  sign(x: number): number;
  sqrt(x: number): number;
  cbrt(x: number): number;
  exp(x: number): number;
  log(x: number): number;
  log2(x: number): number;
  log10(x: number): number;
  sin(x: number): number;
  cos(x: number): number;
  tan(x: number): number;
  atan2(y: number, x: number): number;
  pow(x: number, y: number): number;
  min(...values: number[]): number;
  max(...values: number[]): number;
  hypot(...values: number[]): number;
  random(): number;
}

interface JsonApi {
  stringify(value: any, replacer?: any, indent?: number | string): string;
  parse(text: string): any;
}

interface ObjectApi {
  keys(value: any): string[];
  values(value: any): any[];
  entries(value: any): any[][];
  fromEntries(entries: any[]): any;
  assign(target: any, ...sources: any[]): any;
}

interface ArrayApi {
  isArray(value: any): boolean;
  from(value: any, map?: (value: any, index: number) => any): any[];
}

interface PromiseApi {
  all(values: any[]): Promise<any[]>;
  resolve(value?: any): Promise<any>;
}

interface Error {
  name: string;
  message: string;
  stack?: string;
  code?: string;
}

interface NumberConstructor {
  MAX_SAFE_INTEGER: number;
  MIN_SAFE_INTEGER: number;
  MAX_VALUE: number;
  MIN_VALUE: number;
  EPSILON: number;
  POSITIVE_INFINITY: number;
  NEGATIVE_INFINITY: number;
  NaN: number;
  isInteger(value: any): boolean;
  isSafeInteger(value: any): boolean;
  isFinite(value: any): boolean;
  isNaN(value: any): boolean;
  parseFloat(text: string): number;
  parseInt(text: string, radix?: number): number;
}

interface StringConstructor {
  fromCharCode(...codes: number[]): string;
}

interface FunctionsHost {
  remove(name: string): boolean;
}

declare const notes: NotesApi;
declare const console: Console;
declare const Math: MathApi;
declare const JSON: JsonApi;
declare const Object: ObjectApi;
declare const Array: ArrayApi;
declare const Promise: PromiseApi;
declare const __functions: FunctionsHost;
declare const NaN: number;
declare const Infinity: number;

declare function Error(message?: string): Error;
declare function TypeError(message?: string): Error;
declare function RangeError(message?: string): Error;
declare function String(value?: any): string;
declare function Number(value?: any): number;
declare function Boolean(value?: any): boolean;
declare function parseInt(text: string, radix?: number): number;
declare function parseFloat(text: string): number;
declare function isNaN(value: any): boolean;
declare function isFinite(value: any): boolean;
"#;

/// The declaration text, for editors offering completions.
pub fn ambient_declarations() -> &'static str {
    DECLARATIONS
}

/// Parsed form of [`ambient_declarations`]: a type namespace and a value
/// namespace, kept separate so `Error` can be both.
#[derive(Debug, Clone)]
pub struct Ambient {
    pub types: TypeTable,
    pub values: HashMap<String, Type>,
}

static AMBIENT: OnceLock<Result<Ambient, Diagnostic>> = OnceLock::new();

impl Ambient {
    pub fn get() -> Result<&'static Ambient, Diagnostic> {
        AMBIENT
            .get_or_init(|| Ambient::build(DECLARATIONS))
            .as_ref()
            .map_err(Clone::clone)
    }

    fn build(text: &str) -> Result<Ambient, Diagnostic> {
        let program = parse_ambient(text).map_err(|mut diags| {
            diags
                .pop()
                .unwrap_or_else(|| Diagnostic::general("invalid ambient declarations"))
        })?;
        let mut types = TypeTable::default();
        let mut values = HashMap::new();
        for stmt in &program.body {
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
                    types.insert(
                        decl.name.clone(),
                        Type::Object(std::sync::Arc::new(ObjectType {
                            name: Some(decl.name.clone()),
                            fields,
                        })),
                    );
                }
                StmtKind::Declare { name, ty } => {
                    values.insert(name.clone(), Type::from_expr(ty));
                }
                _ => {
                    return Err(Diagnostic::error(
                        stmt.span,
                        "only interfaces and declarations are allowed in ambient text",
                    ));
                }
            }
        }
        Ok(Ambient { types, values })
    }
}
