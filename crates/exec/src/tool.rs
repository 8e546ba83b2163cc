//! Tool-call surface: lets a model hand a program to the evaluator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use flint_script::Diagnostic;

use crate::pipeline::Evaluator;
use crate::result::{CapabilityContext, ExecutionRequest, ExecutionResult, ExecutionStatus};

/// JSON-friendly type hint for a tool parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            ..Self::default()
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            ..Self::default()
        }
    }

    pub fn of_type(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn with_default(mut self, default: Json) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolSpec {
    /// The OpenAI-compatible `tools` array element for this tool:
    ///
    /// ```json
    /// { "type": "function",
    ///   "function": { "name": "…", "description": "…",
    ///     "parameters": { "type": "object", "properties": {…}, "required": […] } } }
    /// ```
    pub fn to_openai_tool_schema(&self) -> Json {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();
        for p in &self.params {
            let mut prop = serde_json::json!({
                "type": p.param_type.as_str(),
                "description": p.description,
            });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(p.name.clone());
            }
        }
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Something a model can call.  Failures are part of the returned result.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Json) -> ExecutionResult;
}

// ── evaluate_program ──────────────────────────────────────────────────────────

pub const EVALUATE_TOOL_NAME: &str = "evaluate_program";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateArgs {
    #[serde(alias = "program_text", alias = "programText")]
    program: String,
    #[serde(default = "include_by_default", alias = "include_custom_functions")]
    include_custom_functions: bool,
    #[serde(default, alias = "timeout_ms")]
    timeout_ms: Option<u64>,
}

fn include_by_default() -> bool {
    true
}

/// Runs a program for one vault/session through an [`Evaluator`].
pub struct EvaluateTool {
    evaluator: Arc<Evaluator>,
    context: CapabilityContext,
}

impl EvaluateTool {
    pub fn new(evaluator: Arc<Evaluator>, context: CapabilityContext) -> Self {
        Self { evaluator, context }
    }
}

#[async_trait]
impl Tool for EvaluateTool {
    fn spec(&self) -> ToolSpec {
        let mut description = String::from(
            "Run a typed script against the user's notes and return its result. \
             The program may use `notes`, `console` and `customFunctions`; end it with `return <value>;`.",
        );
        let functions = self.evaluator.list_functions();
        let enabled: Vec<&str> = functions
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.signature.as_str())
            .collect();
        if !enabled.is_empty() {
            description.push_str(" Available custom functions: ");
            description.push_str(&enabled.join("; "));
            description.push('.');
        }
        ToolSpec {
            name: EVALUATE_TOOL_NAME.to_string(),
            description,
            params: vec![
                ToolParam::required("program", "Program text to run."),
                ToolParam::optional("includeCustomFunctions", "Expose registered functions as `customFunctions`.")
                    .of_type(ParamType::Boolean)
                    .with_default(Json::Bool(true)),
                ToolParam::optional("timeoutMs", "Time limit in milliseconds.").of_type(ParamType::Integer),
            ],
        }
    }

    async fn call(&self, args: Json) -> ExecutionResult {
        let args: EvaluateArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(err) => {
                debug!(error = %err, "rejecting malformed tool arguments");
                return ExecutionResult::failure(
                    ExecutionStatus::CompileError,
                    vec![Diagnostic::general(format!("invalid tool arguments: {err}")).with_code("arguments")],
                );
            }
        };
        let mut request = ExecutionRequest::new(args.program).with_context(self.context.clone());
        request.include_custom_functions = args.include_custom_functions;
        request.timeout_ms = args.timeout_ms;
        self.evaluator.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_config::ExecConfig;
    use flint_functions::{FunctionRegistry, MemoryFunctionStore, Registration};
    use flint_notes::MemoryNoteStore;
    use flint_security::SecurityGate;
    use serde_json::json;

    fn tool() -> EvaluateTool {
        let registry = FunctionRegistry::open(
            "main",
            Arc::new(MemoryFunctionStore::new()),
            Arc::new(SecurityGate::builtin().unwrap()),
        )
        .unwrap();
        let evaluator = Evaluator::new(
            ExecConfig::default(),
            Arc::new(registry),
            Arc::new(MemoryNoteStore::new()),
        );
        EvaluateTool::new(Arc::new(evaluator), CapabilityContext::new("main"))
    }

    #[tokio::test]
    async fn schema_is_openai_shaped_and_lists_functions() {
        let tool = tool();
        tool.evaluator
            .register_function(Registration::new(
                "double",
                "function double(x: number): number {\n  return x * 2;\n}",
            ))
            .await
            .unwrap();
        let schema = tool.spec().to_openai_tool_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], EVALUATE_TOOL_NAME);
        assert_eq!(schema["function"]["parameters"]["required"], json!(["program"]));
        let props = &schema["function"]["parameters"]["properties"];
        assert_eq!(props["includeCustomFunctions"]["type"], "boolean");
        assert_eq!(props["includeCustomFunctions"]["default"], true);
        assert_eq!(props["timeoutMs"]["type"], "integer");
        let description = schema["function"]["description"].as_str().unwrap();
        assert!(description.contains("double(x: number): number"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn calls_return_results_as_data() {
        let tool = tool();
        let result = tool.call(json!({"program": "return [1, 2, 3].length;"})).await;
        assert_eq!(result.value, Some(json!(3)));

        let result = tool.call(json!({"programText": "return 1;", "timeout_ms": 50})).await;
        assert!(result.is_success());

        let result = tool.call(json!({"source": "return 1;"})).await;
        assert_eq!(result.status, ExecutionStatus::CompileError);
        assert_eq!(result.first_error().unwrap().code.as_deref(), Some("arguments"));

        let result = tool.call(json!({"program": "throw new Error(\"no\");"})).await;
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
    }
}
