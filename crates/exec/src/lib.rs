//! Evaluation of typed note-scripting programs.
//!
//! [`Evaluator`] is the entry point: it prepends the `customFunctions`
//! namespace, compiles and gates the combined program, and runs it in a
//! fresh JavaScript runtime on its own thread with only the `notes`
//! capability in reach.

pub mod capability;
pub mod engine;
pub mod host;
pub mod pipeline;
pub mod result;
pub mod tool;

pub use capability::{Capabilities, CapabilityError};
pub use engine::{Engine, Limits, RunOutput, StackFrame, VmError};
pub use host::{VmHost, VmJob};
pub use pipeline::Evaluator;
pub use result::{
    CapabilityContext, ExecutionRequest, ExecutionResult, ExecutionStatus, LogEntry, LogLevel,
};
pub use tool::{EVALUATE_TOOL_NAME, EvaluateTool, ParamType, Tool, ToolParam, ToolSpec};
