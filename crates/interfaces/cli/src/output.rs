use anyhow::Result;

use flint_exec::{ExecutionResult, LogLevel};
use flint_script::Diagnostic;

/// Print a result: JSON on stdout, or logs on stderr and the value or
/// diagnostics for a human.
pub(crate) fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    for entry in &result.logs {
        let tag = match entry.level {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        };
        eprintln!("[{tag}] {}", entry.message);
    }
    if result.is_success() {
        for diag in &result.diagnostics {
            eprintln!("{}", render_diagnostic(diag));
        }
        if let Some(value) = &result.value {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    } else {
        println!("{} ({} ms)", result.status, result.duration_ms);
        for diag in &result.diagnostics {
            println!("{}", render_diagnostic(diag));
        }
    }
    Ok(())
}

pub(crate) fn render_diagnostic(diag: &Diagnostic) -> String {
    let mut out = match &diag.code {
        Some(code) => format!("{diag} [{code}]"),
        None => diag.to_string(),
    };
    for frame in &diag.stack {
        out.push_str("\n    ");
        out.push_str(frame);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_show_code_and_stack() {
        let mut diag = Diagnostic::general("TypeError: x is not a function").with_code("runtime");
        diag.line = 3;
        diag.column = 5;
        diag.stack = vec!["at helper (3:5)".into(), "at <program> (7:1)".into()];
        assert_eq!(
            render_diagnostic(&diag),
            "3:5: error: TypeError: x is not a function [runtime]\n    at helper (3:5)\n    at <program> (7:1)"
        );
        assert_eq!(
            render_diagnostic(&Diagnostic::general("Program is empty.")),
            "error: Program is empty."
        );
    }
}
