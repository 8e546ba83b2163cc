//! Built-in deny-list.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SecurityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Reported, never blocks.
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn blocks(self) -> bool {
        self >= Severity::High
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "warning" | "warn" | "low" | "medium" => Some(Severity::Warning),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    DynamicCode,
    Filesystem,
    Network,
    Process,
    GlobalObject,
    Prototype,
    Timers,
    Reflection,
    Hygiene,
    Custom,
}

/// One deny-list entry.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    /// Match against the raw text instead of the literal-masked text.
    pub scan_literals: bool,
    pattern: Regex,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        severity: Severity,
        pattern: &str,
        message: impl Into<String>,
    ) -> Result<Self, SecurityError> {
        let id = id.into();
        let pattern = Regex::new(pattern).map_err(|source| SecurityError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            category,
            severity,
            message: message.into(),
            scan_literals: false,
            pattern,
        })
    }

    pub fn scanning_literals(mut self) -> Self {
        self.scan_literals = true;
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub(crate) fn regex(&self) -> &Regex {
        &self.pattern
    }
}

type BuiltinRule = (&'static str, Category, Severity, &'static str, &'static str, bool);

const BUILTIN: &[BuiltinRule] = &[
    (
        "dynamic-eval",
        Category::DynamicCode,
        Severity::Critical,
        r"\beval\s*\(",
        "dynamic code evaluation with eval()",
        false,
    ),
    (
        "function-constructor",
        Category::DynamicCode,
        Severity::Critical,
        r"\bFunction\s*\(",
        "dynamic code evaluation with the Function constructor",
        false,
    ),
    (
        "module-loading",
        Category::DynamicCode,
        Severity::High,
        r"\brequire\s*\(|\bimport\s*\(|\bimport\s+[\w{*]",
        "module loading is not available",
        false,
    ),
    (
        "filesystem",
        Category::Filesystem,
        Severity::High,
        r"\bfs\s*\.|\bDeno\s*\.|\b(?:readFile|writeFile|readdir|unlink)(?:Sync)?\s*\(|\b__dirname\b|\b__filename\b",
        "filesystem access is not available",
        false,
    ),
    (
        "network",
        Category::Network,
        Severity::High,
        r"\bfetch\s*\(|\bXMLHttpRequest\b|\bWebSocket\b|\bnet\s*\.|\bhttps?\s*\.\s*(?:get|request)\b",
        "network access is not available",
        false,
    ),
    (
        "process",
        Category::Process,
        Severity::Critical,
        r"\bprocess\s*[.\[]|\bchild_process\b|\b(?:execSync|spawnSync|execFile)\s*\(",
        "process access is not available",
        false,
    ),
    (
        "global-object",
        Category::GlobalObject,
        Severity::High,
        r"\bglobalThis\b|\b(?:window|global|self)\s*[.\[]",
        "the global object is not reachable",
        false,
    ),
    (
        "prototype",
        Category::Prototype,
        Severity::High,
        r"__proto__|\.\s*prototype\b|\.\s*constructor\b|\b(?:setPrototypeOf|defineProperty|defineProperties)\b",
        "prototype tampering",
        false,
    ),
    (
        "computed-prototype",
        Category::Prototype,
        Severity::High,
        r#"\[\s*["'`](?:__proto__|constructor|prototype)["'`]\s*\]"#,
        "prototype tampering through a computed property",
        true,
    ),
    (
        "timers",
        Category::Timers,
        Severity::High,
        r"\b(?:setTimeout|setInterval|setImmediate|queueMicrotask)\b",
        "timers would outlive the evaluation",
        false,
    ),
    (
        "reflection",
        Category::Reflection,
        Severity::High,
        r"\bReflect\s*\.|\bnew\s+Proxy\b|\bWebAssembly\b",
        "reflection escapes the capability object",
        false,
    ),
    (
        "debugger",
        Category::Hygiene,
        Severity::Warning,
        r"\bdebugger\b",
        "debugger statements have no effect",
        false,
    ),
    (
        "with-statement",
        Category::Hygiene,
        Severity::Warning,
        r"\bwith\s*\(",
        "'with' is not supported",
        false,
    ),
];

pub fn builtin_rules() -> Result<Vec<Rule>, SecurityError> {
    BUILTIN
        .iter()
        .map(|(id, category, severity, pattern, message, literals)| {
            let rule = Rule::new(*id, *category, *severity, pattern, *message)?;
            Ok(if *literals { rule.scanning_literals() } else { rule })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_patterns_compile() {
        let rules = builtin_rules().unwrap();
        assert_eq!(rules.len(), BUILTIN.len());
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), rules.len(), "rule ids must be unique");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical.blocks());
        assert!(Severity::High.blocks());
        assert!(!Severity::Warning.blocks());
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("nope"), None);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let err = Rule::new("bad", Category::Custom, Severity::High, "(", "x").unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
