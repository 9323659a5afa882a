//! 工具调用协作接口
//!
//! 回合执行器只依赖 ToolInvoker：给定工具名与参数，返回 ToolInvocationResult。
//! 工具失败不是错误，而是 success = false 的结果，随后回灌给 LLM。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 单次工具调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocationResult {
    pub fn ok(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// 工具调用执行者
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, parameters: Map<String, Value>)
        -> ToolInvocationResult;
}

/// 按工具名查询其声明的参数 schema（失败结果回灌时附带）
pub trait SchemaLookup: Send + Sync {
    fn parameter_schema(&self, tool_name: &str) -> Option<Value>;
}

/// 不知道任何 schema 的查询
pub struct NoSchemas;

impl SchemaLookup for NoSchemas {
    fn parameter_schema(&self, _tool_name: &str) -> Option<Value> {
        None
    }
}
