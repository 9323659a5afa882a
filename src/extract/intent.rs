//! 工具调用意图
//!
//! ToolSelector 二选一：tool_slot（稍后按工作区绑定表解析）或具体 tool_name，二者绝不同时出现。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具选择器：序列化为 `{"tool_slot": "..."}` 或 `{"tool_name": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSelector {
    ToolSlot(String),
    ToolName(String),
}

/// Extractor 输出的单个调用意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationIntent {
    pub selector: ToolSelector,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ToolInvocationIntent {
    pub fn named(name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            selector: ToolSelector::ToolName(name.into()),
            parameters,
        }
    }

    pub fn slot(slot: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            selector: ToolSelector::ToolSlot(slot.into()),
            parameters,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match &self.selector {
            ToolSelector::ToolName(n) => Some(n),
            ToolSelector::ToolSlot(_) => None,
        }
    }

    pub fn tool_slot(&self) -> Option<&str> {
        match &self.selector {
            ToolSelector::ToolSlot(s) => Some(s),
            ToolSelector::ToolName(_) => None,
        }
    }

    /// 日志与结果回灌时使用的展示名
    pub fn display_name(&self) -> &str {
        match &self.selector {
            ToolSelector::ToolSlot(s) | ToolSelector::ToolName(s) => s,
        }
    }
}
