//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.execute，
//! 超时或失败时转为 EngineError::ToolExecutionFailure；每次调用输出结构化审计日志（JSON）。
//! 作为 ToolInvoker 时失败被折叠为 success = false 的结果。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::EngineError;
use crate::tools::{SchemaLookup, Tool, ToolDescriptor, ToolInvocationResult, ToolInvoker, ToolRegistry};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；超时或工具返回 Err 均为 ToolExecutionFailure；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, EngineError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(EngineError::ToolExecutionFailure(e)),
            Err(_) => Err(EngineError::ToolExecutionFailure(format!(
                "tool '{tool_name}' timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }
}

#[async_trait]
impl ToolInvoker for ToolExecutor {
    async fn invoke(&self, tool_name: &str, parameters: Map<String, Value>) -> ToolInvocationResult {
        match self.execute(tool_name, Value::Object(parameters)).await {
            // 工具输出本身是 JSON 时保留结构，否则按字符串
            Ok(content) => {
                let value = serde_json::from_str::<Value>(&content)
                    .ok()
                    .filter(|v| v.is_object() || v.is_array())
                    .unwrap_or(Value::String(content));
                ToolInvocationResult::ok(tool_name, value)
            }
            Err(EngineError::ToolExecutionFailure(reason)) => {
                ToolInvocationResult::failed(tool_name, reason)
            }
            Err(other) => ToolInvocationResult::failed(tool_name, other.to_string()),
        }
    }
}

impl SchemaLookup for ToolExecutor {
    fn parameter_schema(&self, tool_name: &str) -> Option<Value> {
        self.registry.get(tool_name).map(|t| t.parameters_schema())
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        ToolExecutor::with_timeout(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut params = Map::new();
        params.insert("text".into(), Value::String("hello".into()));
        let result = executor().invoke("echo", params).await;
        assert!(result.success);
        assert_eq!(result.result, Some(Value::String("hello".into())));
    }

    #[tokio::test]
    async fn test_invoke_failure_folds_into_result() {
        let result = executor().invoke("echo", Map::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("text"));

        let unknown = executor().invoke("missing", Map::new()).await;
        assert!(!unknown.success);
        assert!(unknown.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = executor().invoke("slow", Map::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_schema_lookup() {
        let exec = executor();
        assert!(exec.parameter_schema("echo").is_some());
        assert!(exec.parameter_schema("nope").is_none());
    }
}
