//! The execution pipeline: namespace, compile, gate, run.
//!
//! [`Evaluator::execute`] never fails.  Every outcome, including a program
//! that spins forever or throws, comes back as an [`ExecutionResult`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use flint_config::ExecConfig;
use flint_functions::{CustomFunction, FunctionRegistry, FunctionSummary, Registration, RegistryError};
use flint_notes::NoteStore;
use flint_script::{CompiledProgram, Diagnostic, LineMap, NAMESPACE_BINDING, ambient_declarations, compile_program};
use flint_security::ScanTarget;

use crate::capability::Capabilities;
use crate::host::{VmHost, VmJob};
use crate::engine::{Limits, StackFrame, VmError};
use crate::result::{CapabilityContext, ExecutionRequest, ExecutionResult, ExecutionStatus};

type CompileOutcome = Result<Arc<CompiledProgram>, Arc<Vec<Diagnostic>>>;

/// A program that compiled and passed the gate.
struct Prepared {
    compiled: Arc<CompiledProgram>,
    /// Lines of namespace text in front of the caller's program.
    offset: u32,
    warnings: Vec<Diagnostic>,
}

pub struct Evaluator {
    config: ExecConfig,
    registry: Arc<FunctionRegistry>,
    notes: Arc<dyn NoteStore>,
    host: VmHost,
    cache: Mutex<LruCache<String, CompileOutcome>>,
}

impl Evaluator {
    pub fn new(config: ExecConfig, registry: Arc<FunctionRegistry>, notes: Arc<dyn NoteStore>) -> Self {
        let capacity = NonZeroUsize::new(config.compile_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            host: VmHost::from_config(&config),
            cache: Mutex::new(LruCache::new(capacity)),
            config,
            registry,
            notes,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    // ── Evaluation ───────────────────────────────────────────────────────────

    pub async fn evaluate(
        &self,
        program_text: &str,
        include_custom_functions: bool,
        timeout_ms: Option<u64>,
        context: CapabilityContext,
    ) -> ExecutionResult {
        self.execute(ExecutionRequest {
            program_text: program_text.to_string(),
            include_custom_functions,
            timeout_ms,
            capability_context: context,
        })
        .await
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let mut result = self.run(&request).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        let ctx = &request.capability_context;
        let session = ctx.session.as_deref().unwrap_or("-");
        if result.is_success() {
            info!(
                status = %result.status,
                duration_ms = result.duration_ms,
                vault = %ctx.vault,
                session,
                logs = result.logs.len(),
                "evaluation finished"
            );
        } else {
            warn!(
                status = %result.status,
                duration_ms = result.duration_ms,
                vault = %ctx.vault,
                session,
                error = result.first_error().map(|d| d.message.as_str()).unwrap_or(""),
                "evaluation failed"
            );
        }
        result
    }

    /// Compile and gate `program_text` without running it.  A successful
    /// result carries only warnings.
    pub fn check(&self, program_text: &str, include_custom_functions: bool) -> ExecutionResult {
        let started = Instant::now();
        let mut result = match self.prepare(program_text, include_custom_functions) {
            Ok(prepared) => ExecutionResult {
                status: ExecutionStatus::Success,
                value: None,
                diagnostics: prepared.warnings,
                duration_ms: 0,
                logs: Vec::new(),
            },
            Err(failure) => failure,
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        debug!(status = %result.status, "program checked");
        result
    }

    /// Declarations a program is checked against, `customFunctions`
    /// included.
    pub fn declarations(&self) -> String {
        let namespace = self.registry.namespace();
        let mut text = ambient_declarations().to_string();
        text.push_str(&format!("\ndeclare const {NAMESPACE_BINDING}: {};\n", namespace.type_text));
        text
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        let ctx = &request.capability_context;
        if !ctx.vault.is_empty() && ctx.vault != self.registry.vault() {
            return ExecutionResult::failure(
                ExecutionStatus::RuntimeError,
                vec![
                    Diagnostic::general(format!(
                        "this engine serves vault '{}', not '{}'",
                        self.registry.vault(),
                        ctx.vault
                    ))
                    .with_code("capability/vault_mismatch"),
                ],
            );
        }

        let prepared = match self.prepare(&request.program_text, request.include_custom_functions) {
            Ok(prepared) => prepared,
            Err(failure) => return failure,
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => return vm_failure(&VmError::Worker(err.to_string())),
        };
        let timeout_ms = self.config.effective_timeout_ms(request.timeout_ms);
        let limit = Duration::from_millis(timeout_ms);
        let cancel = Arc::new(AtomicBool::new(false));
        let job = VmJob {
            source: prepared.compiled.compiled_text.as_str().into(),
            caps: Capabilities::new(Arc::clone(&self.notes), handle)
                .with_functions(Arc::clone(&self.registry)),
            limits: Limits::from_config(&self.config),
            cancel: Arc::clone(&cancel),
            deadline: Instant::now() + limit,
        };
        let rx = match self.host.spawn(job) {
            Ok(rx) => rx,
            Err(err) => return vm_failure(&err),
        };

        let output = match tokio::time::timeout(limit, rx).await {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => {
                return vm_failure(&VmError::Worker("VM thread exited without a result".into()));
            }
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                return ExecutionResult::failure(ExecutionStatus::Timeout, vec![timeout_diagnostic(timeout_ms)]);
            }
        };

        let mut diagnostics = prepared.warnings;
        let (status, value) = match output.result {
            Ok(value) => (ExecutionStatus::Success, value),
            Err(VmError::Uncaught {
                message,
                code,
                line,
                column,
                stack,
            }) => {
                let map = &prepared.compiled.line_map;
                let mut diag = Diagnostic::general(message).with_code(code);
                (diag.line, diag.column) = locate(map, line, column);
                let mut diag = rebase(diag, prepared.offset);
                diag.stack = stack.iter().map(|f| render_frame(f, map, prepared.offset)).collect();
                diagnostics.push(diag);
                (ExecutionStatus::RuntimeError, None)
            }
            Err(VmError::Cancelled) => {
                diagnostics.push(timeout_diagnostic(timeout_ms));
                (ExecutionStatus::Timeout, None)
            }
            Err(VmError::OperationBudget(steps)) => {
                diagnostics.push(
                    Diagnostic::general(format!("Execution exceeded its budget of {steps} steps."))
                        .with_code("timeout"),
                );
                (ExecutionStatus::Timeout, None)
            }
            Err(err @ VmError::Worker(_)) => {
                diagnostics.push(worker_diagnostic(&err));
                (ExecutionStatus::RuntimeError, None)
            }
        };
        ExecutionResult {
            status,
            value,
            diagnostics,
            duration_ms: 0,
            logs: output.logs,
        }
    }

    /// Scan, namespace, compile and gate.  Source findings are reported at
    /// the caller's positions; findings only visible in the compiled text
    /// are reported without a position.
    fn prepare(&self, program_text: &str, include_custom_functions: bool) -> Result<Prepared, ExecutionResult> {
        let gate = self.registry.gate();
        let source_report = gate.scan(program_text, ScanTarget::Program);
        if !source_report.passed {
            return Err(ExecutionResult::failure(
                ExecutionStatus::SecurityViolation,
                source_report.diagnostics(),
            ));
        }

        let (combined, offset) = if include_custom_functions {
            let namespace = self.registry.namespace();
            let offset = u32::try_from(namespace.line_count).unwrap_or(u32::MAX);
            (namespace.prepend_to(program_text), offset)
        } else {
            (program_text.to_string(), 0)
        };

        let compiled = match self.compile_cached(&combined) {
            Ok(compiled) => compiled,
            Err(diagnostics) => {
                return Err(ExecutionResult::failure(
                    ExecutionStatus::CompileError,
                    diagnostics.iter().cloned().map(|d| rebase(d, offset)).collect(),
                ));
            }
        };

        let compiled_report = gate.scan(&compiled.compiled_text, ScanTarget::Compiled);
        if !compiled_report.passed {
            let diagnostics = compiled_report
                .blocking()
                .map(|finding| {
                    let mut diag = finding.to_diagnostic();
                    diag.line = 0;
                    diag.column = 0;
                    diag
                })
                .collect();
            return Err(ExecutionResult::failure(ExecutionStatus::SecurityViolation, diagnostics));
        }

        let mut warnings: Vec<Diagnostic> = compiled.warnings.iter().cloned().map(|d| rebase(d, offset)).collect();
        warnings.extend(source_report.diagnostics());
        Ok(Prepared {
            compiled,
            offset,
            warnings,
        })
    }

    fn compile_cached(&self, combined: &str) -> CompileOutcome {
        let key = format!("{:x}", Sha256::digest(combined.as_bytes()));
        if let Some(hit) = self.cache().get(&key) {
            debug!(key = %&key[..12], "compile cache hit");
            return hit.clone();
        }
        let outcome = compile_program(combined)
            .map(Arc::new)
            .map_err(Arc::new);
        self.cache().put(key, outcome.clone());
        outcome
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, CompileOutcome>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Function management ──────────────────────────────────────────────────

    pub fn list_functions(&self) -> Vec<FunctionSummary> {
        self.registry.list()
    }

    pub async fn register_function(&self, registration: Registration) -> Result<CustomFunction, RegistryError> {
        self.registry.register(registration).await
    }

    pub async fn update_function(&self, registration: Registration) -> Result<CustomFunction, RegistryError> {
        self.registry.update(registration).await
    }

    pub async fn remove_function(&self, name: &str) -> Result<bool, RegistryError> {
        self.registry.remove(name).await
    }

    pub async fn set_function_enabled(&self, name: &str, enabled: bool) -> Result<CustomFunction, RegistryError> {
        self.registry.set_enabled(name, enabled).await
    }

    /// Call one registered function with JSON arguments through the normal
    /// pipeline.
    pub async fn test_function(
        &self,
        name: &str,
        args: &[Json],
        context: CapabilityContext,
    ) -> Result<ExecutionResult, RegistryError> {
        let function = self
            .registry
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !function.enabled {
            return Ok(ExecutionResult::failure(
                ExecutionStatus::RuntimeError,
                vec![Diagnostic::general(format!("function '{name}' is disabled")).with_code("disabled")],
            ));
        }
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| {
                serde_json::to_string(arg).map_err(|err| {
                    RegistryError::Storage(anyhow::Error::from(err).context("cannot render test arguments"))
                })
            })
            .collect::<Result<_, _>>()?;
        let program = format!(
            "return await {NAMESPACE_BINDING}.{name}({});\n",
            rendered.join(", ")
        );
        Ok(self.evaluate(&program, true, None, context).await)
    }
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Move a diagnostic from combined-unit lines onto the caller's program.
/// Lines inside the namespace have no caller position.
fn rebase(mut diag: Diagnostic, offset: u32) -> Diagnostic {
    if offset == 0 || diag.line == 0 {
        return diag;
    }
    if diag.line > offset {
        diag.line -= offset;
    } else {
        diag.line = 0;
        diag.column = 0;
        diag.message = format!("in {NAMESPACE_BINDING}: {}", diag.message);
    }
    diag
}

/// Map a compiled-text position back onto the combined unit.
fn locate(map: &LineMap, line: u32, column: u32) -> (u32, u32) {
    if line == 0 { (0, 0) } else { map.resolve(line, column) }
}

fn render_frame(frame: &StackFrame, map: &LineMap, offset: u32) -> String {
    let (line, column) = locate(map, frame.line, frame.column);
    if offset > 0 && line <= offset {
        format!("at {} ({NAMESPACE_BINDING})", frame.function)
    } else {
        format!("at {} ({}:{})", frame.function, line - offset, column)
    }
}

fn timeout_diagnostic(timeout_ms: u64) -> Diagnostic {
    Diagnostic::general(format!("Execution timed out after {timeout_ms} ms.")).with_code("timeout")
}

fn worker_diagnostic(err: &VmError) -> Diagnostic {
    Diagnostic::general(err.to_string()).with_code("vm")
}

fn vm_failure(err: &VmError) -> ExecutionResult {
    warn!(error = %err, "VM host failure");
    ExecutionResult::failure(ExecutionStatus::RuntimeError, vec![worker_diagnostic(err)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_functions::MemoryFunctionStore;
    use flint_notes::MemoryNoteStore;
    use flint_security::SecurityGate;
    use serde_json::json;

    const FORMAT_MESSAGE: &str = r#"function formatMessage(message: string, prefix?: string): string {
  return (prefix ?? "Message") + ": " + message;
}"#;

    fn evaluator_with(config: ExecConfig) -> Evaluator {
        let registry = FunctionRegistry::open(
            "main",
            Arc::new(MemoryFunctionStore::new()),
            Arc::new(SecurityGate::builtin().unwrap()),
        )
        .unwrap();
        Evaluator::new(config, Arc::new(registry), Arc::new(MemoryNoteStore::new()))
    }

    fn evaluator() -> Evaluator {
        evaluator_with(ExecConfig::default())
    }

    async fn eval(ev: &Evaluator, src: &str) -> ExecutionResult {
        ev.evaluate(src, true, None, CapabilityContext::default()).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn format_message_scenario() {
        let ev = evaluator();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE).with_description("Prefix a message"))
            .await
            .unwrap();

        let result = eval(&ev, r#"return customFunctions.formatMessage("Hello");"#).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
        assert_eq!(result.value, Some(json!("Message: Hello")));

        let result = eval(&ev, r#"return customFunctions.formatMessage("Hello", "Test");"#).await;
        assert_eq!(result.value, Some(json!("Test: Hello")));

        let tested = ev
            .test_function("formatMessage", &[json!("Hello"), json!("Test")], CapabilityContext::default())
            .await
            .unwrap();
        assert_eq!(tested.value, Some(json!("Test: Hello")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn filesystem_access_is_refused_everywhere() {
        let ev = evaluator();
        let err = ev
            .register_function(Registration::new(
                "f",
                "function f() { return fs.readFileSync('/etc/passwd'); }",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SecurityViolation { .. }));
        assert!(ev.list_functions().is_empty());

        let result = eval(&ev, "const x = 1;\nreturn fs.readFileSync('/etc/passwd');").await;
        assert_eq!(result.status, ExecutionStatus::SecurityViolation);
        let diag = result.first_error().unwrap();
        assert_eq!(diag.code.as_deref(), Some("security/filesystem"));
        assert_eq!(diag.line, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prototype_access_is_caught_by_the_gate() {
        let ev = evaluator();
        let result = eval(&ev, "const o: any = {};\nreturn o.constructor;").await;
        assert_eq!(result.status, ExecutionStatus::SecurityViolation);
        assert_eq!(result.first_error().unwrap().code.as_deref(), Some("security/prototype"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn namespace_exposes_only_enabled_functions() {
        let ev = evaluator();
        for name in ["alpha", "beta", "gamma"] {
            let source = format!("function {name}(x: number): number {{\n  return x + 1;\n}}");
            let mut registration = Registration::new(name, source);
            if name == "gamma" {
                registration = registration.disabled();
            }
            ev.register_function(registration).await.unwrap();
        }

        let result = eval(&ev, "return customFunctions.list().map((f) => f.name);").await;
        assert_eq!(result.value, Some(json!(["alpha", "beta"])));

        let result = eval(&ev, "return customFunctions.gamma(1);").await;
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert_eq!(result.first_error().unwrap().line, 1);

        let tested = ev.test_function("gamma", &[json!(1)], CapabilityContext::default()).await.unwrap();
        assert_eq!(tested.status, ExecutionStatus::RuntimeError);
        assert!(matches!(
            ev.test_function("missing", &[], CapabilityContext::default()).await,
            Err(RegistryError::NotFound(_))
        ));

        ev.set_function_enabled("gamma", true).await.unwrap();
        let result = eval(&ev, "return customFunctions.gamma(1);").await;
        assert_eq!(result.value, Some(json!(2)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn evaluations_share_no_state() {
        let ev = evaluator();
        ev.register_function(Registration::new(
            "tally",
            "function tally(): number {\n  let n = 0;\n  const bump = () => { n += 1; return n; };\n  bump();\n  return bump();\n}",
        ))
        .await
        .unwrap();

        let src = "(Math as any).leak = ((Math as any).leak ?? 0) + 1;\nreturn [customFunctions.tally(), (Math as any).leak];";
        let first = eval(&ev, src).await;
        let second = eval(&ev, src).await;
        assert_eq!(first.value, Some(json!([2, 1])), "{:?}", first.diagnostics);
        assert_eq!(second.value, first.value);

        let result = eval(&ev, "return typeof (Math as any).leak;").await;
        assert_eq!(result.value, Some(json!("undefined")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trailing_expression_is_the_result() {
        let ev = evaluator();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();

        let result = eval(&ev, "customFunctions.formatMessage('Hello')").await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
        assert_eq!(result.value, Some(json!("Message: Hello")));

        let result = eval(&ev, "customFunctions.formatMessage('Hello', 'Test');").await;
        assert_eq!(result.value, Some(json!("Test: Hello")));

        let result = eval(&ev, "const a = 1;\na + 2").await;
        assert_eq!(result.value, Some(json!(3)));

        let result = eval(&ev, "const a = 1;").await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.value, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn namespace_calls_are_type_checked() {
        let ev = evaluator();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();

        let result = eval(&ev, "const n = 42;\nreturn customFunctions.formatMessage(n);").await;
        assert_eq!(result.status, ExecutionStatus::CompileError);
        let diag = result.first_error().unwrap();
        assert_eq!(diag.line, 2);
        assert!(diag.message.contains("not assignable to parameter of type 'string'"), "{}", diag.message);

        let result = eval(&ev, "const s: number = customFunctions.formatMessage(\"x\");").await;
        assert_eq!(result.status, ExecutionStatus::CompileError);

        assert!(ev.declarations().contains("formatMessage(message: string, prefix?: string): string;"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn modern_syntax_runs_end_to_end() {
        let ev = evaluator();
        let src = r#"class Counter {
  count: number = 0;
  add(n: number): Counter { this.count += n; return this; }
}
const c = new Counter().add(2).add(3);
let a = 0;
let b = 0;
({ a, b } = { a: c.count, b: 1 << 3 });
[a, b] = [b, a];
[a, b, Number.MAX_SAFE_INTEGER, [[1], [[2]]].flat(Infinity)]"#;
        let result = eval(&ev, src).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
        assert_eq!(result.value, Some(json!([8, 5, 9007199254740991_i64, [1, 2]])));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_evaluations_are_isolated() {
        let ev = Arc::new(evaluator());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let ev = Arc::clone(&ev);
            tasks.push(tokio::spawn(async move {
                let src = format!("let total = 0;\nfor (let j = 0; j < 1000; j++) {{ total += {i}; }}\nreturn total;");
                (i, eval(&ev, &src).await)
            }));
        }
        for task in tasks {
            let (i, result) = task.await.unwrap();
            assert_eq!(result.value, Some(json!(i * 1000)));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runaway_programs_time_out_and_the_host_keeps_serving() {
        let ev = evaluator();
        let result = ev
            .evaluate("while (true) {}", false, Some(100), CapabilityContext::default())
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.first_error().unwrap().code.as_deref(), Some("timeout"));

        let result = eval(&ev, "return 1 + 1;").await;
        assert_eq!(result.value, Some(json!(2)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operation_budget_counts_as_timeout() {
        let ev = evaluator_with(ExecConfig {
            max_operations: 5_000,
            ..ExecConfig::default()
        });
        let result = eval(&ev, "let i = 0;\nwhile (i >= 0) { i++; }").await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runtime_errors_point_at_the_callers_program() {
        let ev = evaluator();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();

        let result = eval(&ev, "const a = 1;\nthrow new Error(\"boom\");").await;
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        let diag = result.first_error().unwrap();
        assert_eq!(diag.message, "Error: boom");
        assert_eq!(diag.code.as_deref(), Some("runtime"));
        assert_eq!(diag.line, 2);
        assert_eq!(diag.stack.len(), 1);
        assert!(diag.stack[0].starts_with("at <program> (2:"), "{:?}", diag.stack);

        let result = eval(&ev, "const a: number = \"x\";").await;
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert_eq!(result.first_error().unwrap().line, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capability_errors_are_catchable() {
        let ev = evaluator();
        let src = r#"await notes.create({ title: "Inbox" });
try {
  await notes.create({ title: "inbox" });
  return "created twice";
} catch (e) {
  return e.code;
}"#;
        let result = eval(&ev, src).await;
        assert_eq!(result.value, Some(json!("already_exists")), "{:?}", result.diagnostics);

        let result = eval(&ev, "return await notes.update(\"missing\", { content: \"x\" });").await;
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.first_error().unwrap().code.as_deref(), Some("capability/not_found"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn programs_may_remove_functions_for_later_runs() {
        let ev = evaluator();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();
        let result = eval(
            &ev,
            "const removed = customFunctions.remove(\"formatMessage\");\nreturn { removed, text: customFunctions.formatMessage(\"hi\") };",
        )
        .await;
        assert_eq!(
            result.value,
            Some(json!({"removed": true, "text": "Message: hi"})),
            "{:?}",
            result.diagnostics
        );
        assert!(ev.list_functions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn vault_mismatch_is_rejected() {
        let ev = evaluator();
        let result = ev
            .evaluate("return 1;", true, None, CapabilityContext::new("other"))
            .await;
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(
            result.first_error().unwrap().code.as_deref(),
            Some("capability/vault_mismatch")
        );
        let result = ev
            .evaluate("return 1;", true, None, CapabilityContext::new("main").with_session("s1"))
            .await;
        assert_eq!(result.value, Some(json!(1)));
    }

    #[tokio::test]
    async fn check_compiles_without_running() {
        let ev = evaluator();
        let result = ev.check("while (true) {}", false);
        assert!(result.is_success());
        let result = ev.check("return missing;", false);
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert!(ev.declarations().contains("declare const customFunctions: {"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn functions_and_notes_persist_on_disk() {
        use flint_functions::RedbFunctionStore;
        use flint_notes::DirNoteStore;

        let dir = tempfile::TempDir::new().unwrap();
        let notes_root = dir.path().join("vault");
        let open = || {
            let store = RedbFunctionStore::open(dir.path().join("functions.redb")).unwrap();
            let registry =
                FunctionRegistry::open("main", Arc::new(store), Arc::new(SecurityGate::builtin().unwrap())).unwrap();
            Evaluator::new(
                ExecConfig::default(),
                Arc::new(registry),
                Arc::new(DirNoteStore::new(notes_root.clone())),
            )
        };

        let ev = open();
        ev.register_function(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();
        let result = eval(
            &ev,
            "const note = await notes.create({ title: \"Plan\", content: customFunctions.formatMessage(\"ship\") });\nreturn note.id;",
        )
        .await;
        let id = result.value.as_ref().and_then(Json::as_str).unwrap().to_string();
        assert!(notes_root.join(format!("{id}.md")).exists());
        drop(ev);

        let ev = open();
        assert_eq!(ev.list_functions().len(), 1);
        let result = eval(&ev, "const n = await notes.getByTitle(\"plan\");\nreturn n === null ? \"\" : n.content;").await;
        assert_eq!(result.value, Some(json!("Message: ship")), "{:?}", result.diagnostics);
    }

    #[test]
    fn rebasing_moves_lines_past_the_namespace() {
        let diag = rebase(Diagnostic::general("x").with_code("type"), 10);
        assert_eq!(diag.line, 0);

        let mut diag = Diagnostic::general("late");
        diag.line = 12;
        diag.column = 4;
        assert_eq!(rebase(diag.clone(), 10).line, 2);

        diag.line = 3;
        let inside = rebase(diag, 10);
        assert_eq!((inside.line, inside.column), (0, 0));
        assert_eq!(inside.message, "in customFunctions: late");

        let frame = StackFrame {
            function: "formatMessage".into(),
            line: 2,
            column: 3,
        };
        let map = LineMap::default();
        assert_eq!(render_frame(&frame, &map, 10), "at formatMessage (customFunctions)");
        assert_eq!(render_frame(&frame, &map, 0), "at formatMessage (2:3)");
        assert_eq!(locate(&map, 0, 7), (0, 0));
    }
}
