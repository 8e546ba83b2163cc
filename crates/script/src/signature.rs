//! Parameter schemas as stored alongside a registered function.

use serde::{Deserialize, Serialize};

use crate::diag::Diagnostic;
use crate::parser::parse_type;
use crate::types::{FunctionType, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
}

impl ParamSchema {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Ordered parameter list plus return type, all as type text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSignature {
    #[serde(default)]
    pub params: Vec<ParamSchema>,
    #[serde(default = "any_type")]
    pub return_type: String,
}

fn any_type() -> String {
    "any".to_string()
}

impl FunctionSignature {
    pub fn new(params: Vec<ParamSchema>, return_type: impl Into<String>) -> Self {
        Self {
            params,
            return_type: return_type.into(),
        }
    }

    /// Normalise type text, e.g. `Array<string>` becomes `string[]`.
    pub fn parse_type(text: &str) -> Result<String, Diagnostic> {
        let expr = parse_type(text).map_err(|d| d.with_code("signature"))?;
        Ok(Type::from_expr(&expr).to_string())
    }

    /// `formatMessage(message: string, prefix?: string): string`
    pub fn render(&self, name: &str) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let opt = if p.optional { "?" } else { "" };
                format!("{}{opt}: {}", p.name, p.ty)
            })
            .collect();
        format!("{name}({}): {}", params.join(", "), self.return_type)
    }

    /// A copy with every type text normalised.
    pub fn normalized(&self) -> Result<FunctionSignature, Diagnostic> {
        let mut params = Vec::with_capacity(self.params.len());
        for p in &self.params {
            params.push(ParamSchema {
                name: p.name.clone(),
                ty: Self::parse_type(&p.ty).map_err(|d| {
                    Diagnostic::general(format!(
                        "Invalid type '{}' for parameter '{}': {}",
                        p.ty, p.name, d.message
                    ))
                    .with_code("signature")
                })?,
                optional: p.optional,
            });
        }
        let return_type = Self::parse_type(&self.return_type).map_err(|d| {
            Diagnostic::general(format!(
                "Invalid return type '{}': {}",
                self.return_type, d.message
            ))
            .with_code("signature")
        })?;
        Ok(FunctionSignature {
            params,
            return_type,
        })
    }

    pub(crate) fn from_function_type(ty: &FunctionType) -> Self {
        Self {
            params: ty
                .params
                .iter()
                .map(|p| ParamSchema {
                    name: p.name.clone(),
                    ty: p.ty.to_string(),
                    optional: p.optional,
                })
                .collect(),
            return_type: ty.ret.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_a_declaration() {
        let sig = FunctionSignature::new(
            vec![
                ParamSchema::new("message", "string"),
                ParamSchema::new("prefix", "string").optional(),
            ],
            "string",
        );
        assert_eq!(
            sig.render("formatMessage"),
            "formatMessage(message: string, prefix?: string): string"
        );
    }

    #[test]
    fn normalizes_type_text() {
        assert_eq!(FunctionSignature::parse_type("Array<string>").unwrap(), "string[]");
        assert_eq!(
            FunctionSignature::parse_type("Promise<Array<Note>>").unwrap(),
            "Promise<Note[]>"
        );
        assert!(FunctionSignature::parse_type("string |").is_err());
    }

    #[test]
    fn invalid_parameter_type_names_the_parameter() {
        let sig = FunctionSignature::new(vec![ParamSchema::new("x", "<<")], "void");
        let err = sig.normalized().unwrap_err();
        assert!(err.message.contains("parameter 'x'"), "{}", err.message);
        assert_eq!(err.code.as_deref(), Some("signature"));
    }

    #[test]
    fn serde_uses_type_key_and_camel_case() {
        let sig = FunctionSignature::new(vec![ParamSchema::new("n", "number")], "number");
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "params": [{ "name": "n", "type": "number", "optional": false }],
                "returnType": "number"
            })
        );
        let back: FunctionSignature =
            serde_json::from_value(serde_json::json!({ "params": [{ "name": "n", "type": "number" }] }))
                .unwrap();
        assert_eq!(back.return_type, "any");
        assert!(!back.params[0].optional);
    }
}
