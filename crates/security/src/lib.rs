//! Static deny-list scanner run over function sources, compiled function
//! text and every combined program before it reaches the VM.
//!
//! The scanner is a first filter, not the isolation boundary: the VM only
//! ever exposes the capability objects it injects.

pub mod mask;
pub mod rules;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use flint_config::SecurityConfig;
use flint_script::{Diagnostic, LineIndex};

pub use rules::{Category, Rule, Severity, builtin_rules};

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("rule '{id}' has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule '{0}' is defined twice")]
    DuplicateRule(String),
}

/// Which text a finding was made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanTarget {
    Source,
    Compiled,
    Program,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub rule_id: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    /// The matched text.
    pub matched: String,
    pub line: u32,
    pub column: u32,
    pub target: ScanTarget,
}

impl Finding {
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::general(format!(
            "{} (matched '{}')",
            self.message, self.matched
        ))
        .with_code(format!("security/{}", self.rule_id));
        diag.line = self.line;
        diag.column = self.column;
        if !self.severity.blocks() {
            diag.severity = flint_script::Severity::Warning;
        }
        diag
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub passed: bool,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub scanned_at: DateTime<Utc>,
}

impl SecurityReport {
    pub fn clean() -> Self {
        Self {
            passed: true,
            findings: Vec::new(),
            scanned_at: Utc::now(),
        }
    }

    fn from_findings(findings: Vec<Finding>) -> Self {
        Self {
            passed: !findings.iter().any(|f| f.severity.blocks()),
            findings,
            scanned_at: Utc::now(),
        }
    }

    /// Findings that fail the scan.
    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity.blocks())
    }

    pub fn merge(mut self, other: SecurityReport) -> Self {
        self.passed &= other.passed;
        self.findings.extend(other.findings);
        self.scanned_at = self.scanned_at.max(other.scanned_at);
        self
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.findings.iter().map(Finding::to_diagnostic).collect()
    }

    /// One-line summary for logs and error messages.
    pub fn summary(&self) -> String {
        let ids: Vec<&str> = self.blocking().map(|f| f.rule_id.as_str()).collect();
        if ids.is_empty() {
            "passed".to_string()
        } else {
            format!("blocked by {}", ids.join(", "))
        }
    }
}

/// The configured rule set.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    rules: Vec<Rule>,
}

impl SecurityGate {
    /// Built-in rules only.
    pub fn builtin() -> Result<Self, SecurityError> {
        Ok(Self {
            rules: builtin_rules()?,
        })
    }

    /// Built-in rules minus `disabled_rules`, plus `extra_rules`.
    pub fn from_config(config: &SecurityConfig) -> Result<Self, SecurityError> {
        let disabled: HashSet<&str> = config.disabled_rules.iter().map(String::as_str).collect();
        let mut rules: Vec<Rule> = builtin_rules()?
            .into_iter()
            .filter(|r| !disabled.contains(r.id.as_str()))
            .collect();
        for extra in &config.extra_rules {
            if rules.iter().any(|r| r.id == extra.id) {
                return Err(SecurityError::DuplicateRule(extra.id.clone()));
            }
            let severity = Severity::parse(&extra.severity).unwrap_or_else(|| {
                warn!(rule = %extra.id, severity = %extra.severity, "unknown rule severity; using high");
                Severity::High
            });
            rules.push(Rule::new(
                extra.id.clone(),
                Category::Custom,
                severity,
                &extra.pattern,
                extra.message.clone(),
            )?);
        }
        debug!(
            rules = rules.len(),
            disabled = disabled.len(),
            extra = config.extra_rules.len(),
            "security gate configured"
        );
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Scan one text.
    pub fn scan(&self, text: &str, target: ScanTarget) -> SecurityReport {
        let masked = mask::mask_literals(text);
        if masked.is_none() {
            debug!(?target, "text does not tokenize; scanning it unmasked");
        }
        let code = masked.as_deref().unwrap_or(text);
        let index = LineIndex::new(text);

        let mut findings = Vec::new();
        for rule in &self.rules {
            let haystack = if rule.scan_literals { text } else { code };
            for m in rule.regex().find_iter(haystack) {
                let (line, column) = index.locate(text, m.start());
                findings.push(Finding {
                    rule_id: rule.id.clone(),
                    category: rule.category,
                    severity: rule.severity,
                    message: rule.message.clone(),
                    matched: m.as_str().trim().to_string(),
                    line,
                    column,
                    target,
                });
            }
        }
        findings.sort_by_key(|f| (f.line, f.column));
        let report = SecurityReport::from_findings(findings);
        if !report.passed {
            warn!(?target, result = %report.summary(), "security scan failed");
        }
        report
    }

    /// Scan several texts and merge the reports.
    pub fn scan_all(&self, texts: &[(&str, ScanTarget)]) -> SecurityReport {
        texts
            .iter()
            .map(|(text, target)| self.scan(text, *target))
            .fold(SecurityReport::clean(), SecurityReport::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_config::RuleConfig;

    fn gate() -> SecurityGate {
        SecurityGate::builtin().unwrap()
    }

    fn ids(report: &SecurityReport) -> Vec<&str> {
        report.findings.iter().map(|f| f.rule_id.as_str()).collect()
    }

    #[test]
    fn filesystem_reference_is_blocked_with_location() {
        let report = gate().scan(
            "function f() {\n  return fs.readFileSync('/etc/passwd');\n}",
            ScanTarget::Source,
        );
        assert!(!report.passed);
        assert_eq!(ids(&report), vec!["filesystem", "filesystem"]);
        let first = &report.findings[0];
        assert_eq!((first.line, first.column), (2, 10));
        assert_eq!(first.matched, "fs.");
        assert_eq!(first.category, Category::Filesystem);
    }

    #[test]
    fn literals_and_comments_are_ignored() {
        let report = gate().scan(
            "// never call eval(x) or require('fs')\nconst tip = \"open the window and fetch(coffee)\";\nreturn tip;",
            ScanTarget::Program,
        );
        assert!(report.passed, "{:?}", report.findings);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn template_substitutions_are_scanned() {
        let report = gate().scan("const s = `home: ${process.env.HOME}`;", ScanTarget::Program);
        assert_eq!(ids(&report), vec!["process"]);
    }

    #[test]
    fn untokenizable_text_is_scanned_raw() {
        let report = gate().scan("eval(\"1 + ", ScanTarget::Source);
        assert!(!report.passed);
        assert_eq!(ids(&report), vec!["dynamic-eval"]);
    }

    #[test]
    fn computed_prototype_access_is_caught_inside_literals() {
        let report = gate().scan("const p = obj[\"__proto__\"];", ScanTarget::Program);
        assert!(ids(&report).contains(&"computed-prototype"));
        assert!(!report.passed);
    }

    #[test]
    fn warnings_do_not_fail_the_scan() {
        let report = gate().scan("debugger;\nreturn 1;", ScanTarget::Program);
        assert!(report.passed);
        assert_eq!(ids(&report), vec!["debugger"]);
        let diag = report.findings[0].to_diagnostic();
        assert!(!diag.is_error());
        assert_eq!(diag.code.as_deref(), Some("security/debugger"));
    }

    #[test]
    fn config_disables_and_extends_rules() {
        let config = SecurityConfig {
            disabled_rules: vec!["timers".into()],
            extra_rules: vec![RuleConfig {
                id: "no-secrets".into(),
                pattern: r"\bsecretNote\b".into(),
                severity: "critical".into(),
                message: "secret notes are off limits".into(),
            }],
        };
        let gate = SecurityGate::from_config(&config).unwrap();
        assert!(gate.rules().iter().all(|r| r.id != "timers"));
        assert!(gate.scan("setTimeout(f, 10);", ScanTarget::Program).passed);
        let report = gate.scan("const x = secretNote;", ScanTarget::Program);
        assert!(!report.passed);
        assert_eq!(report.findings[0].category, Category::Custom);
    }

    #[test]
    fn bad_extra_rules_are_rejected() {
        let mut config = SecurityConfig::default();
        config.extra_rules.push(RuleConfig {
            id: "dynamic-eval".into(),
            pattern: "x".into(),
            severity: "high".into(),
            message: "dup".into(),
        });
        assert!(matches!(
            SecurityGate::from_config(&config),
            Err(SecurityError::DuplicateRule(_))
        ));
        config.extra_rules[0].id = "other".into();
        config.extra_rules[0].severity = "extreme".into();
        let gate = SecurityGate::from_config(&config).unwrap();
        let other = gate.rules().iter().find(|r| r.id == "other").unwrap();
        assert_eq!(other.severity, Severity::High);
        config.extra_rules[0].pattern = "(".into();
        assert!(matches!(
            SecurityGate::from_config(&config),
            Err(SecurityError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn scan_all_merges_targets() {
        let report = gate().scan_all(&[
            ("return 1;", ScanTarget::Source),
            ("globalThis.x = 1;", ScanTarget::Compiled),
        ]);
        assert!(!report.passed);
        assert_eq!(report.findings[0].target, ScanTarget::Compiled);
        assert_eq!(report.summary(), "blocked by global-object");
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = gate().scan("eval('1')", ScanTarget::Source);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["findings"][0]["ruleId"], "dynamic-eval");
        assert_eq!(json["findings"][0]["category"], "dynamic-code");
        assert_eq!(json["findings"][0]["target"], "source");
    }
}
