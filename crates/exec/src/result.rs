//! Request and result types of the execution pipeline.

use serde::{Deserialize, Serialize};

use flint_script::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Success,
    CompileError,
    SecurityViolation,
    RuntimeError,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompileError => "compileError",
            ExecutionStatus::SecurityViolation => "securityViolation",
            ExecutionStatus::RuntimeError => "runtimeError",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

/// One captured `console.*` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Who an evaluation runs for.  `vault` must name the registry's vault
/// when set; `session` only labels log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityContext {
    #[serde(default)]
    pub vault: String,
    #[serde(default)]
    pub session: Option<String>,
}

impl CapabilityContext {
    pub fn new(vault: impl Into<String>) -> Self {
        Self {
            vault: vault.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub program_text: String,
    #[serde(default = "include_by_default")]
    pub include_custom_functions: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub capability_context: CapabilityContext,
}

fn include_by_default() -> bool {
    true
}

impl ExecutionRequest {
    pub fn new(program_text: impl Into<String>) -> Self {
        Self {
            program_text: program_text.into(),
            include_custom_functions: true,
            timeout_ms: None,
            capability_context: CapabilityContext::default(),
        }
    }

    pub fn without_functions(mut self) -> Self {
        self.include_custom_functions = false;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_context(mut self, context: CapabilityContext) -> Self {
        self.capability_context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// The program's return value; only set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub duration_ms: u64,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl ExecutionResult {
    pub(crate) fn failure(status: ExecutionStatus, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            status,
            value: None,
            diagnostics,
            duration_ms: 0,
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// First error diagnostic, if any.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_error())
    }
}
