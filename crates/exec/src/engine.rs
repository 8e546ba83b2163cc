//! Per-call JavaScript runtime for compiled programs.
//!
//! Every run builds a fresh QuickJS runtime and context, installs the host
//! hooks behind frozen `notes`, `console` and `__functions` objects, runs
//! the compiled text as the body of an async function and drops it all.
//! Nothing a program creates outlives the call.
//!
//! An interrupt handler stops the program when the deadline passes, the
//! cancel flag is raised or the step budget runs out; QuickJS raises an
//! uncatchable exception from inside whatever the program was doing.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use rquickjs::{Context, Ctx, Function, Promise, Runtime, Value};
use serde::Deserialize;
use serde_json::{Value as Json, json};
use thiserror::Error;
use tracing::debug;

use flint_config::ExecConfig;

use crate::capability::{Capabilities, CapabilityError};
use crate::result::{LogEntry, LogLevel};

/// Steps QuickJS runs between two calls of the interrupt handler.
pub const STEPS_PER_POLL: u64 = 10_000;

const HOST_HOOK: &str = "__flint_host";
const LOG_HOOK: &str = "__flint_log";
/// Frames of host glue carry this prefix and are left out of traces.
const GLUE_PREFIX: &str = "__flint";
const PROGRAM_FUNCTION: &str = "__program";
const PROGRAM_FRAME: &str = "<program>";
const SCRIPT_FRAME: &str = "<eval>";

/// Evaluated once per context before the program.  Takes the raw hooks off
/// the global object, builds the guest-facing objects around them and
/// returns the function that describes an uncaught exception.
const PRELUDE: &str = r#"(function () {
  "use strict";
  const host = globalThis.__flint_host;
  const log = globalThis.__flint_log;
  delete globalThis.__flint_host;
  delete globalThis.__flint_log;
  delete globalThis.eval;
  const stringify = JSON.stringify;
  const parse = JSON.parse;
  const freeze = Object.freeze;
  const keysOf = Object.keys;
  const isArray = Array.isArray;
  const capabilityErrors = new WeakSet();

  function __flint_fail(code, message) {
    const error = new Error(message);
    error.name = "CapabilityError";
    error.code = code;
    capabilityErrors.add(error);
    return error;
  }

  function __flint_call(kind, method, args) {
    const reply = parse(host(kind, method, stringify(args)));
    if (reply.err) {
      throw __flint_fail(reply.err.code, reply.err.message);
    }
    return reply.ok;
  }

  function __flint_show(value, nested, seen) {
    if (typeof value === "string") {
      return nested ? stringify(value) : value;
    }
    if (typeof value === "function") {
      return value.name ? "[Function: " + value.name + "]" : "[Function]";
    }
    if (value === null || typeof value !== "object") {
      return String(value);
    }
    if (seen.indexOf(value) >= 0) {
      return "[Circular]";
    }
    if (value instanceof Error) {
      return "[" + value.name + ": " + value.message + "]";
    }
    if (seen.length >= 6) {
      return isArray(value) ? "[Array]" : "[Object]";
    }
    seen.push(value);
    let out;
    if (isArray(value)) {
      const parts = [];
      for (let i = 0; i < value.length; i++) {
        parts.push(__flint_show(value[i], true, seen));
      }
      out = parts.length === 0 ? "[]" : "[ " + parts.join(", ") + " ]";
    } else {
      const parts = [];
      for (const key of keysOf(value)) {
        const label = /^[A-Za-z_$][A-Za-z0-9_$]*$/.test(key) ? key : stringify(key);
        parts.push(label + ": " + __flint_show(value[key], true, seen));
      }
      out = parts.length === 0 ? "{}" : "{ " + parts.join(", ") + " }";
    }
    seen.pop();
    return out;
  }

  function __flint_notes_method(method) {
    return async function __flint_notes_call(...args) {
      return __flint_call("notes", method, args);
    };
  }

  function __flint_console_method(level) {
    return function __flint_console_write(...args) {
      const parts = [];
      for (const arg of args) {
        parts.push(__flint_show(arg, false, []));
      }
      log(level, parts.join(" "));
    };
  }

  const notes = {};
  for (const method of ["get", "getByTitle", "create", "update", "delete", "search", "list"]) {
    notes[method] = __flint_notes_method(method);
  }
  const console = {};
  for (const level of ["log", "info", "warn", "error", "debug"]) {
    console[level] = __flint_console_method(level);
  }
  const functions = {
    remove: function __flint_functions_remove(name) {
      return __flint_call("functions", "remove", [name]);
    },
  };
  for (const [name, value] of [["notes", notes], ["console", console], ["__functions", functions]]) {
    Object.defineProperty(globalThis, name, {
      value: freeze(value),
      writable: false,
      enumerable: false,
      configurable: false,
    });
  }

  return function __flint_describe(error) {
    if (error instanceof Error) {
      const name = String(error.name);
      const message = String(error.message);
      return stringify({
        message: message ? name + ": " + message : name,
        code: capabilityErrors.has(error) ? "capability/" + error.code : "runtime",
        stack: typeof error.stack === "string" ? error.stack : "",
      });
    }
    return stringify({
      message: "Uncaught " + __flint_show(error, false, []),
      code: "runtime",
      stack: "",
    });
  };
})()"#;

/// Per-evaluation resource limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_operations: u64,
    pub max_memory_bytes: usize,
    pub max_stack_bytes: usize,
    pub max_log_lines: usize,
}

impl Limits {
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            max_operations: config.max_operations,
            max_memory_bytes: config.max_memory_bytes,
            max_stack_bytes: config.max_stack_bytes,
            max_log_lines: config.max_log_lines,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_config(&ExecConfig::default())
    }
}

/// One frame of a guest stack trace.  Positions refer to the compiled text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub line: u32,
    pub column: u32,
}

/// Why a program did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// An exception nobody caught.  `code` is `runtime` or
    /// `capability/<code>`; `line` is 0 when the engine gave no position.
    #[error("{message}")]
    Uncaught {
        message: String,
        code: String,
        line: u32,
        column: u32,
        stack: Vec<StackFrame>,
    },
    #[error("execution was cancelled")]
    Cancelled,
    #[error("operation budget of {0} steps exhausted")]
    OperationBudget(u64),
    #[error("VM worker failed: {0}")]
    Worker(String),
}

impl VmError {
    fn uncaught(message: impl Into<String>) -> Self {
        VmError::Uncaught {
            message: message.into(),
            code: "runtime".into(),
            line: 0,
            column: 0,
            stack: Vec::new(),
        }
    }
}

/// What one run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub result: Result<Option<Json>, VmError>,
    pub logs: Vec<LogEntry>,
    /// Steps executed, to the precision of [`STEPS_PER_POLL`].
    pub operations: u64,
}

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const OVER_BUDGET: u8 = 2;

/// State shared with the interrupt handler.
#[derive(Default)]
struct Watchdog {
    polls: AtomicU64,
    stop: AtomicU8,
}

struct LogSink {
    entries: Vec<LogEntry>,
    dropped: usize,
    cap: usize,
}

impl LogSink {
    fn push(&mut self, level: &str, message: String) {
        if self.entries.len() >= self.cap {
            self.dropped += 1;
            return;
        }
        let level = match level {
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Log,
        };
        self.entries.push(LogEntry { level, message });
    }

    fn take(&mut self) -> Vec<LogEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        if self.dropped > 0 {
            entries.push(LogEntry {
                level: LogLevel::Warn,
                message: format!("{} further log lines were dropped", self.dropped),
            });
        }
        entries
    }
}

/// `__flint_describe`'s report on an uncaught exception.
#[derive(Deserialize)]
struct Report {
    message: String,
    code: String,
    stack: String,
}

pub struct Engine {
    limits: Limits,
    caps: Capabilities,
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Engine {
    pub fn new(limits: Limits, caps: Capabilities, cancel: Arc<AtomicBool>) -> Self {
        Self {
            limits,
            caps,
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run compiled program text.  A top-level `return` gives the result.
    pub fn run(self, source: &str) -> RunOutput {
        let logs = Rc::new(RefCell::new(LogSink {
            entries: Vec::new(),
            dropped: 0,
            cap: self.limits.max_log_lines,
        }));
        let watchdog = Arc::new(Watchdog::default());
        let result = self.execute(source, &logs, &watchdog);
        let result = match watchdog.stop.load(Ordering::Relaxed) {
            CANCELLED => Err(VmError::Cancelled),
            OVER_BUDGET => Err(VmError::OperationBudget(self.limits.max_operations)),
            _ => result,
        };
        let operations = watchdog.polls.load(Ordering::Relaxed).saturating_mul(STEPS_PER_POLL);
        debug!(operations, ok = result.is_ok(), "program finished");
        let logs = logs.borrow_mut().take();
        RunOutput {
            result,
            logs,
            operations,
        }
    }

    fn execute(
        &self,
        source: &str,
        logs: &Rc<RefCell<LogSink>>,
        watchdog: &Arc<Watchdog>,
    ) -> Result<Option<Json>, VmError> {
        let runtime = Runtime::new().map_err(|err| VmError::Worker(format!("cannot create runtime: {err}")))?;
        runtime.set_memory_limit(self.limits.max_memory_bytes);
        runtime.set_max_stack_size(self.limits.max_stack_bytes);
        runtime.set_interrupt_handler(Some(self.interrupt_handler(Arc::clone(watchdog))));
        let context = Context::full(&runtime).map_err(|err| VmError::Worker(format!("cannot create context: {err}")))?;
        context.with(|ctx| self.evaluate(&ctx, source, logs))
    }

    fn interrupt_handler(&self, watchdog: Arc<Watchdog>) -> Box<dyn FnMut() -> bool + Send + 'static> {
        let cancel = Arc::clone(&self.cancel);
        let deadline = self.deadline;
        let budget = self.limits.max_operations;
        Box::new(move || {
            let polls = watchdog.polls.fetch_add(1, Ordering::Relaxed) + 1;
            if watchdog.stop.load(Ordering::Relaxed) != RUNNING {
                return true;
            }
            let reason = if cancel.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d) {
                CANCELLED
            } else if polls.saturating_mul(STEPS_PER_POLL) > budget {
                OVER_BUDGET
            } else {
                return false;
            };
            watchdog.stop.store(reason, Ordering::Relaxed);
            true
        })
    }

    fn evaluate<'js>(
        &self,
        ctx: &Ctx<'js>,
        source: &str,
        logs: &Rc<RefCell<LogSink>>,
    ) -> Result<Option<Json>, VmError> {
        self.install_hooks(ctx, logs)
            .map_err(|err| VmError::Worker(format!("cannot install host hooks: {err}")))?;
        let describe: Function<'js> = ctx
            .eval(PRELUDE)
            .map_err(|err| VmError::Worker(format!("cannot install host objects: {err}")))?;

        let outcome = ctx
            .eval::<Promise<'js>, _>(wrap(source))
            .and_then(|promise| promise.finish::<Value<'js>>())
            .and_then(|value| ctx.json_stringify(value))
            .and_then(|text| text.map(|t| t.to_string()).transpose());
        match outcome {
            Ok(None) => Ok(None),
            Ok(Some(text)) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| VmError::Worker(format!("unreadable program result: {err}"))),
            Err(rquickjs::Error::Exception) => Err(describe_uncaught(ctx, &describe, ctx.catch())),
            Err(rquickjs::Error::WouldBlock) => Err(VmError::uncaught(
                "Error: the program awaited a promise that never settles",
            )),
            Err(err) => Err(VmError::Worker(err.to_string())),
        }
    }

    fn install_hooks<'js>(&self, ctx: &Ctx<'js>, logs: &Rc<RefCell<LogSink>>) -> rquickjs::Result<()> {
        let globals = ctx.globals();
        let caps = self.caps.clone();
        globals.set(
            HOST_HOOK,
            Function::new(ctx.clone(), move |kind: String, method: String, args: String| {
                host_call(&caps, &kind, &method, &args)
            })?,
        )?;
        let sink = Rc::clone(logs);
        globals.set(
            LOG_HOOK,
            Function::new(ctx.clone(), move |level: String, message: String| {
                sink.borrow_mut().push(&level, message);
            })?,
        )?;
        Ok(())
    }
}

/// The program becomes the body of an async function; its first line is
/// line 2 of the script.
fn wrap(source: &str) -> String {
    format!("(async function {PROGRAM_FUNCTION}() {{\"use strict\";\n{source}\n}})()")
}

/// Serve one hook call.  Replies `{"ok": value}` or
/// `{"err": {"code", "message"}}`.
fn host_call(caps: &Capabilities, kind: &str, method: &str, args: &str) -> String {
    let args = match serde_json::from_str(args) {
        Ok(Json::Array(args)) => args,
        _ => Vec::new(),
    };
    let outcome = match (kind, method) {
        ("notes", method) => caps.notes_call(method, &args),
        ("functions", "remove") => match args.first() {
            Some(Json::String(name)) => caps.remove_function(name).map(Json::Bool),
            _ => Err(CapabilityError::invalid_argument("'name' must be a string")),
        },
        _ => Err(CapabilityError {
            code: "unsupported".into(),
            message: format!("{kind}.{method} is not available"),
        }),
    };
    match outcome {
        Ok(value) => json!({ "ok": value }),
        Err(err) => json!({ "err": { "code": err.code, "message": err.message } }),
    }
    .to_string()
}

fn describe_uncaught<'js>(ctx: &Ctx<'js>, describe: &Function<'js>, thrown: Value<'js>) -> VmError {
    let report = describe
        .call::<_, String>((thrown,))
        .ok()
        .and_then(|text| serde_json::from_str::<Report>(&text).ok());
    let Some(report) = report else {
        // Out of memory, most likely; describing needs allocations too.
        let _ = ctx.catch();
        return VmError::uncaught("Uncaught exception");
    };
    let stack = parse_stack(&report.stack);
    let (line, column) = stack.first().map(|f| (f.line, f.column)).unwrap_or((0, 0));
    VmError::Uncaught {
        message: report.message,
        code: report.code,
        line,
        column,
        stack,
    }
}

/// Frames of an engine stack trace, innermost first, in compiled-text
/// positions.  Native frames and host glue are skipped.
fn parse_stack(stack: &str) -> Vec<StackFrame> {
    stack.lines().filter_map(parse_frame).collect()
}

/// `at name (file:line:column)`, `at name (file:line)` or `at file:line:column`.
fn parse_frame(text: &str) -> Option<StackFrame> {
    let rest = text.trim().strip_prefix("at ")?;
    let (name, location) = match rest.rsplit_once(" (") {
        Some((name, location)) => (name.trim(), location.strip_suffix(')')?),
        None => (PROGRAM_FUNCTION, rest),
    };
    let name = name.strip_prefix("async ").unwrap_or(name);
    if name.starts_with(GLUE_PREFIX) || name == SCRIPT_FRAME {
        return None;
    }
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next()?;
    let (line, column) = match (middle.parse::<u32>(), last.parse::<u32>()) {
        (Ok(line), Ok(column)) => (line, column),
        (Err(_), Ok(line)) => (line, 0),
        _ => return None,
    };
    // Line 1 of the script is the wrapper's opening.
    let line = line.checked_sub(1).filter(|l| *l > 0)?;
    let function = if name == PROGRAM_FUNCTION {
        PROGRAM_FRAME.to_string()
    } else {
        name.to_string()
    };
    Some(StackFrame { function, line, column })
}
