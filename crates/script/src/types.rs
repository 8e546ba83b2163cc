//! Semantic types used by the checker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::TypeExpr;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Void,
    Undefined,
    Null,
    Never,
    Boolean,
    Number,
    String,
    Array(Box<Type>),
    /// `Record<string, T>`; also used for `object`.
    Record(Box<Type>),
    Object(Arc<ObjectType>),
    Function(Arc<FunctionType>),
    /// The value a class declaration binds: constructor plus statics.
    Class(Arc<ClassType>),
    Promise(Box<Type>),
    Union(Vec<Type>),
    /// Reference to an interface or alias, resolved lazily so that
    /// declarations may refer to each other.
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: Option<String>,
    pub fields: Vec<Field>,
}

impl ObjectType {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<ParamType>,
    /// Element type of a trailing rest parameter.
    pub rest: Option<Type>,
    pub ret: Type,
}

impl FunctionType {
    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// Expected type of the argument at `index`.
    pub fn param_type(&self, index: usize) -> Option<&Type> {
        self.params
            .get(index)
            .map(|p| &p.ty)
            .or(self.rest.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassType {
    pub name: String,
    /// Returns the instance type, registered under `name`.
    pub ctor: Arc<FunctionType>,
    pub statics: Vec<Field>,
}

impl ClassType {
    pub fn static_field(&self, name: &str) -> Option<&Field> {
        self.statics.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamType {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

impl Type {
    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn promise(inner: Type) -> Type {
        Type::Promise(Box::new(inner))
    }

    pub fn function(params: Vec<ParamType>, ret: Type) -> Type {
        Type::Function(Arc::new(FunctionType {
            params,
            rest: None,
            ret,
        }))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Type::Null | Type::Undefined | Type::Void)
    }

    /// Flattening, de-duplicating union constructor.
    pub fn union(types: impl IntoIterator<Item = Type>) -> Type {
        let mut members: Vec<Type> = Vec::new();
        for ty in types {
            let parts = match ty {
                Type::Union(parts) => parts,
                Type::Never => continue,
                other => vec![other],
            };
            for part in parts {
                if part.is_any() {
                    return Type::Any;
                }
                if !members.contains(&part) {
                    members.push(part);
                }
            }
        }
        match members.len() {
            0 => Type::Never,
            1 => members.remove(0),
            _ => Type::Union(members),
        }
    }

    /// The type with `null` and `undefined` members removed.
    pub fn non_nullable(&self) -> Type {
        match self {
            Type::Union(parts) => {
                let rest: Vec<Type> = parts.iter().filter(|p| !p.is_nullish()).cloned().collect();
                if rest.is_empty() {
                    self.clone()
                } else {
                    Type::union(rest)
                }
            }
            other => other.clone(),
        }
    }

    /// Convert annotation syntax to a semantic type.  Names are not checked
    /// here; see [`TypeTable::unknown_names`].
    pub fn from_expr(expr: &TypeExpr) -> Type {
        match expr {
            TypeExpr::Named { name, args, .. } => match (name.as_str(), args.as_slice()) {
                ("string", _) => Type::String,
                ("number", _) => Type::Number,
                ("boolean", _) => Type::Boolean,
                ("any" | "unknown", _) => Type::Any,
                ("void", _) => Type::Void,
                ("null", _) => Type::Null,
                ("undefined", _) => Type::Undefined,
                ("never", _) => Type::Never,
                ("object", _) => Type::Record(Box::new(Type::Any)),
                ("Array", [elem]) => Type::array(Type::from_expr(elem)),
                ("Promise", [inner]) => Type::promise(Type::from_expr(inner)),
                ("Record", [_, value]) => Type::Record(Box::new(Type::from_expr(value))),
                _ => Type::Named(name.clone()),
            },
            TypeExpr::Array(elem) => Type::array(Type::from_expr(elem)),
            TypeExpr::Union(members) => Type::union(members.iter().map(Type::from_expr)),
            TypeExpr::StringLit(_) => Type::String,
            TypeExpr::NumberLit(_) => Type::Number,
            TypeExpr::Object(members) => Type::Object(Arc::new(ObjectType {
                name: None,
                fields: members
                    .iter()
                    .map(|m| Field {
                        name: m.name.clone(),
                        ty: Type::from_expr(&m.ty),
                        optional: m.optional,
                    })
                    .collect(),
            })),
            TypeExpr::Function { params, ret } => {
                let mut fixed = Vec::new();
                let mut rest = None;
                for p in params {
                    let ty = Type::from_expr(&p.ty);
                    if p.rest {
                        rest = Some(match ty {
                            Type::Array(elem) => *elem,
                            other => other,
                        });
                    } else {
                        fixed.push(ParamType {
                            name: p.name.clone(),
                            ty,
                            optional: p.optional,
                        });
                    }
                }
                Type::Function(Arc::new(FunctionType {
                    params: fixed,
                    rest,
                    ret: Type::from_expr(ret),
                }))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("any"),
            Type::Void => f.write_str("void"),
            Type::Undefined => f.write_str("undefined"),
            Type::Null => f.write_str("null"),
            Type::Never => f.write_str("never"),
            Type::Boolean => f.write_str("boolean"),
            Type::Number => f.write_str("number"),
            Type::String => f.write_str("string"),
            Type::Array(elem) => match **elem {
                Type::Union(_) | Type::Function(_) => write!(f, "({elem})[]"),
                _ => write!(f, "{elem}[]"),
            },
            Type::Record(value) => write!(f, "Record<string, {value}>"),
            Type::Object(obj) => match &obj.name {
                Some(name) => f.write_str(name),
                None => {
                    if obj.fields.is_empty() {
                        return f.write_str("{}");
                    }
                    f.write_str("{ ")?;
                    for (i, field) in obj.fields.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" ")?;
                        }
                        let opt = if field.optional { "?" } else { "" };
                        write!(f, "{}{opt}: {};", field.name, field.ty)?;
                    }
                    f.write_str(" }")
                }
            },
            Type::Function(func) => {
                f.write_str("(")?;
                let mut first = true;
                for p in &func.params {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    let opt = if p.optional { "?" } else { "" };
                    write!(f, "{}{opt}: {}", p.name, p.ty)?;
                }
                if let Some(rest) = &func.rest {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "...args: {}", Type::array(rest.clone()))?;
                }
                write!(f, ") => {}", func.ret)
            }
            Type::Class(class) => write!(f, "typeof {}", class.name),
            Type::Promise(inner) => write!(f, "Promise<{inner}>"),
            Type::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    match m {
                        Type::Function(_) => write!(f, "({m})")?,
                        _ => write!(f, "{m}")?,
                    }
                }
                Ok(())
            }
            Type::Named(name) => f.write_str(name),
        }
    }
}

/// Named types in scope: ambient interfaces plus those declared by the
/// source being checked.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    names: HashMap<String, Type>,
}

impl TypeTable {
    pub fn insert(&mut self, name: impl Into<String>, ty: Type) {
        self.names.insert(name.into(), ty);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Expand `Named` references (through alias chains) to their definition.
    /// Unknown names resolve to `any`; they are reported elsewhere.
    pub fn resolve(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        for _ in 0..MAX_DEPTH {
            match current {
                Type::Named(ref name) => match self.names.get(name) {
                    Some(def) => current = def.clone(),
                    None => return Type::Any,
                },
                other => return other,
            }
        }
        Type::Any
    }

    /// Names referenced by `expr` that are neither builtin nor declared.
    pub fn unknown_names(&self, expr: &TypeExpr) -> Vec<(String, crate::diag::Span)> {
        let mut out = Vec::new();
        self.collect_unknown(expr, &mut out);
        out
    }

    fn collect_unknown(&self, expr: &TypeExpr, out: &mut Vec<(String, crate::diag::Span)>) {
        match expr {
            TypeExpr::Named { name, args, span } => {
                let builtin = matches!(
                    name.as_str(),
                    "string"
                        | "number"
                        | "boolean"
                        | "any"
                        | "unknown"
                        | "void"
                        | "null"
                        | "undefined"
                        | "never"
                        | "object"
                        | "Array"
                        | "Promise"
                        | "Record"
                );
                if !builtin && !self.contains(name) {
                    out.push((name.clone(), *span));
                }
                for arg in args {
                    self.collect_unknown(arg, out);
                }
            }
            TypeExpr::Array(elem) => self.collect_unknown(elem, out),
            TypeExpr::Union(members) => {
                for m in members {
                    self.collect_unknown(m, out);
                }
            }
            TypeExpr::Object(members) => {
                for m in members {
                    self.collect_unknown(&m.ty, out);
                }
            }
            TypeExpr::Function { params, ret } => {
                for p in params {
                    self.collect_unknown(&p.ty, out);
                }
                self.collect_unknown(ret, out);
            }
            TypeExpr::StringLit(_) | TypeExpr::NumberLit(_) => {}
        }
    }

    /// Assignability in non-strict-null mode: `null` and `undefined` are
    /// assignable to everything and `any` is compatible both ways.
    pub fn assignable(&self, source: &Type, target: &Type) -> bool {
        self.assignable_at(source, target, 0)
    }

    fn assignable_at(&self, source: &Type, target: &Type, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return true;
        }
        let source = self.resolve(source);
        let target = self.resolve(target);
        match (&source, &target) {
            (_, Type::Any) | (Type::Any, _) | (Type::Never, _) => return true,
            (Type::Null | Type::Undefined, _) => return true,
            (Type::Void, Type::Void | Type::Undefined) => return true,
            (Type::Union(members), _) => {
                return members
                    .iter()
                    .all(|m| self.assignable_at(m, &target, depth + 1));
            }
            (_, Type::Union(members)) => {
                return members
                    .iter()
                    .any(|m| self.assignable_at(&source, m, depth + 1));
            }
            _ => {}
        }
        match (&source, &target) {
            (Type::Boolean, Type::Boolean)
            | (Type::Number, Type::Number)
            | (Type::String, Type::String)
            | (Type::Void, Type::Void) => true,
            (Type::Array(s), Type::Array(t)) | (Type::Promise(s), Type::Promise(t)) => {
                self.assignable_at(s, t, depth + 1)
            }
            (Type::Record(s), Type::Record(t)) => self.assignable_at(s, t, depth + 1),
            (Type::Object(obj), Type::Record(value)) => obj
                .fields
                .iter()
                .all(|f| self.assignable_at(&f.ty, value, depth + 1)),
            (Type::Array(_) | Type::Function(_) | Type::Class(_), Type::Record(value)) => {
                value.is_any()
            }
            (Type::Class(s), Type::Class(t)) => s.name == t.name,
            (Type::Record(value), Type::Object(obj)) => obj
                .fields
                .iter()
                .all(|f| f.optional || self.assignable_at(value, &f.ty, depth + 1)),
            (Type::Object(s), Type::Object(t)) => t.fields.iter().all(|tf| match s.field(&tf.name) {
                Some(sf) => self.assignable_at(&sf.ty, &tf.ty, depth + 1),
                None => tf.optional,
            }),
            (Type::Function(s), Type::Function(t)) => {
                if s.required_params() > t.params.len() && t.rest.is_none() {
                    return false;
                }
                let params_ok = s.params.iter().enumerate().all(|(i, sp)| {
                    match t.param_type(i) {
                        // Parameters are compared bivariantly.
                        Some(tp) => {
                            self.assignable_at(tp, &sp.ty, depth + 1)
                                || self.assignable_at(&sp.ty, tp, depth + 1)
                        }
                        None => true,
                    }
                });
                let ret_ok = matches!(self.resolve(&t.ret), Type::Void)
                    || self.assignable_at(&s.ret, &t.ret, depth + 1);
                params_ok && ret_ok
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_type;

    fn ty(src: &str) -> Type {
        Type::from_expr(&parse_type(src).unwrap())
    }

    #[test]
    fn display_matches_annotation_syntax() {
        assert_eq!(ty("Array<string>").to_string(), "string[]");
        assert_eq!(ty("(string | number)[]").to_string(), "(string | number)[]");
        assert_eq!(ty("Record<string, number>").to_string(), "Record<string, number>");
        assert_eq!(ty("'a' | 'b'").to_string(), "string");
        assert_eq!(ty("{ a: number; b?: string }").to_string(), "{ a: number; b?: string; }");
        assert_eq!(
            ty("(a: string, b?: number) => void").to_string(),
            "(a: string, b?: number) => void"
        );
        assert_eq!(ty("Promise<Note | null>").to_string(), "Promise<Note | null>");
    }

    #[test]
    fn union_flattens_and_absorbs() {
        assert_eq!(Type::union([Type::String, Type::String]), Type::String);
        assert_eq!(Type::union([Type::String, Type::Any]), Type::Any);
        assert_eq!(Type::union([]), Type::Never);
        assert_eq!(
            Type::union([Type::union([Type::Number, Type::Null]), Type::String]).to_string(),
            "number | null | string"
        );
        assert_eq!(ty("string | null").non_nullable(), Type::String);
    }

    #[test]
    fn non_strict_null_assignability() {
        let table = TypeTable::default();
        assert!(table.assignable(&Type::Null, &Type::String));
        assert!(table.assignable(&Type::Undefined, &Type::Number));
        assert!(!table.assignable(&Type::Number, &Type::String));
        assert!(table.assignable(&Type::Any, &Type::String));
        assert!(table.assignable(&Type::String, &ty("string | number")));
        assert!(!table.assignable(&ty("string | number"), &Type::String));
    }

    #[test]
    fn structural_objects() {
        let mut table = TypeTable::default();
        table.insert("Point", ty("{ x: number; y: number; label?: string }"));
        let point = Type::Named("Point".into());
        assert!(table.assignable(&ty("{ x: number; y: number }"), &point));
        assert!(!table.assignable(&ty("{ x: number }"), &point));
        assert!(!table.assignable(&ty("{ x: string; y: number }"), &point));
        assert!(table.assignable(&ty("{ a: number }"), &ty("Record<string, number>")));
        assert!(!table.assignable(&ty("{ a: string }"), &ty("Record<string, number>")));
    }

    #[test]
    fn function_assignability() {
        let table = TypeTable::default();
        let callback = ty("(value: number, index: number) => boolean");
        assert!(table.assignable(&ty("(v: number) => boolean"), &callback));
        assert!(!table.assignable(&ty("(a: number, b: number, c: number) => boolean"), &callback));
        assert!(table.assignable(&ty("(v: number) => string"), &ty("(v: number) => void")));
        assert!(!table.assignable(&ty("(v: string) => boolean"), &callback));
    }

    #[test]
    fn classes_compare_by_name() {
        let table = TypeTable::default();
        let class = |name: &str| {
            Type::Class(Arc::new(ClassType {
                name: name.to_string(),
                ctor: Arc::new(FunctionType {
                    params: Vec::new(),
                    rest: None,
                    ret: Type::Named(name.to_string()),
                }),
                statics: Vec::new(),
            }))
        };
        assert_eq!(class("Shape").to_string(), "typeof Shape");
        assert!(table.assignable(&class("Shape"), &class("Shape")));
        assert!(!table.assignable(&class("Shape"), &class("Point")));
        assert!(table.assignable(&class("Shape"), &ty("object")));
    }

    #[test]
    fn recursive_aliases_terminate() {
        let mut table = TypeTable::default();
        table.insert("A", Type::Named("B".into()));
        table.insert("B", Type::Named("A".into()));
        assert_eq!(table.resolve(&Type::Named("A".into())), Type::Any);
        assert!(table.assignable(&Type::Named("A".into()), &Type::String));
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut table = TypeTable::default();
        table.insert("Note", Type::Any);
        let names = table.unknown_names(&parse_type("Array<Note | Missing> | Other[]").unwrap());
        let names: Vec<String> = names.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Missing".to_string(), "Other".to_string()]);
    }
}
