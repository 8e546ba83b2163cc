use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use flint_script::{FunctionSignature, ParamSchema, is_identifier, is_keyword};
use flint_security::SecurityReport;

use crate::RegistryError;

/// Namespace members that are not user functions.
pub const RESERVED_NAMES: &[&str] = &["list", "remove"];

const MAX_NAME_LEN: usize = 64;

/// A registered, validated function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFunction {
    /// Stable across updates.
    pub id: Uuid,
    pub name: String,
    pub source_text: String,
    pub compiled_text: String,
    #[serde(default)]
    pub parameter_schema: Vec<ParamSchema>,
    pub return_type: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    #[serde(default)]
    pub is_async: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_security_scan: SecurityReport,
    /// SHA-256 hex of `compiled_text`.
    pub content_hash: String,
}

impl CustomFunction {
    pub fn signature(&self) -> FunctionSignature {
        FunctionSignature::new(self.parameter_schema.clone(), self.return_type.clone())
    }

    /// `name(a: string, b?: number): string`
    pub fn rendered_signature(&self) -> String {
        self.signature().render(&self.name)
    }

    pub fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            signature: self.rendered_signature(),
            enabled: self.enabled,
        }
    }

    /// Whether `content_hash` still matches `compiled_text`.
    pub fn hash_matches(&self) -> bool {
        self.content_hash == content_hash(&self.compiled_text)
    }
}

/// What `customFunctions.list()` and the management surface report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub name: String,
    pub description: String,
    pub signature: String,
    pub enabled: bool,
}

/// Input to [`FunctionRegistry::register`](crate::FunctionRegistry::register)
/// and [`FunctionRegistry::update`](crate::FunctionRegistry::update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub source: String,
    /// Derived from the source when omitted.
    #[serde(default)]
    pub schema: Option<FunctionSignature>,
    /// On update, `None` keeps the current description.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Registration {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            schema: None,
            description: None,
            enabled: true,
        }
    }

    pub fn with_schema(mut self, schema: FunctionSignature) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

pub fn content_hash(text: &str) -> String {
    let mut h = Sha256::new();
    h.update(text.as_bytes());
    format!("{:x}", h.finalize())
}

/// Function names become property names on the namespace object and must
/// read as plain identifiers there.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 64 characters"));
    }
    if !is_identifier(name) {
        return Err(invalid("name must be an identifier (letters, digits, '_' or '$')"));
    }
    if is_keyword(name) || RESERVED_NAMES.contains(&name) || name.starts_with("__") {
        return Err(RegistryError::ReservedName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_checked() {
        assert!(validate_name("formatMessage").is_ok());
        assert!(validate_name("$helper_2").is_ok());
        assert!(matches!(validate_name(""), Err(RegistryError::InvalidName { .. })));
        assert!(matches!(validate_name("2fast"), Err(RegistryError::InvalidName { .. })));
        assert!(matches!(validate_name("with-dash"), Err(RegistryError::InvalidName { .. })));
        assert!(matches!(validate_name(&"a".repeat(65)), Err(RegistryError::InvalidName { .. })));
        for reserved in ["list", "remove", "return", "__functions"] {
            assert!(
                matches!(validate_name(reserved), Err(RegistryError::ReservedName(_))),
                "{reserved} should be reserved"
            );
        }
    }

    #[test]
    fn hashes_are_sha256_hex() {
        let hash = content_hash("function f() {}");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash("function f() {}"));
        assert_ne!(hash, content_hash("function g() {}"));
    }

    #[test]
    fn registration_defaults_to_enabled() {
        let reg: Registration =
            serde_json::from_str(r#"{"name":"f","source":"function f() { return 1; }"}"#).unwrap();
        assert!(reg.enabled);
        assert!(reg.schema.is_none());
        assert!(!Registration::new("f", "").disabled().enabled);
    }
}
