use thiserror::Error;

use flint_script::Diagnostic;
use flint_security::SecurityReport;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid function name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("'{0}' is a reserved name")]
    ReservedName(String),
    #[error("a function named '{0}' already exists")]
    AlreadyExists(String),
    #[error("no function named '{0}'")]
    NotFound(String),
    #[error("function '{name}' failed to compile: {}", first_message(.diagnostics))]
    Compile {
        name: String,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("function '{name}' failed the security scan: {}", .report.summary())]
    SecurityViolation { name: String, report: SecurityReport },
    #[error("function storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    match diagnostics.first() {
        Some(d) if diagnostics.len() > 1 => format!("{d} (and {} more)", diagnostics.len() - 1),
        Some(d) => d.to_string(),
        None => "unknown error".to_string(),
    }
}

impl RegistryError {
    /// Short tag used by the CLI and the management surface.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidName { .. } => "invalid_name",
            RegistryError::ReservedName(_) => "reserved_name",
            RegistryError::AlreadyExists(_) => "already_exists",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Compile { .. } => "compile_error",
            RegistryError::SecurityViolation { .. } => "security_violation",
            RegistryError::Storage(_) => "storage",
        }
    }

    /// Located diagnostics for compile and security failures.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            RegistryError::Compile { diagnostics, .. } => diagnostics.clone(),
            RegistryError::SecurityViolation { report, .. } => report.diagnostics(),
            other => vec![Diagnostic::general(other.to_string()).with_code(other.code())],
        }
    }
}
