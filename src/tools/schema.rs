//! 工具调用 JSON Schema 生成（schemars）
//!
//! 把唯一权威的 tool call 结构注入 system prompt。展示槽位目录时使用 tool_slot 形式，否则使用 tool_name 形式。

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// prompt 中声明的调用形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallForm {
    Slot,
    Name,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct SlotCall {
    /// 工作区槽位名，由引擎解析为具体工具
    tool_slot: String,
    /// 工具参数
    parameters: BTreeMap<String, Value>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct NamedCall {
    /// 具体工具名
    tool_name: String,
    /// 工具参数
    parameters: BTreeMap<String, Value>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct SlotEnvelope {
    tool_call: SlotCall,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct NamedEnvelope {
    tool_call: NamedCall,
}

/// 返回调用信封的 JSON Schema 字符串
pub fn tool_call_schema_json(form: CallForm) -> String {
    let schema = match form {
        CallForm::Slot => schema_for!(SlotEnvelope),
        CallForm::Name => schema_for!(NamedEnvelope),
    };
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 调用信封示例
pub fn tool_call_example(form: CallForm, selector: &str) -> String {
    let key = match form {
        CallForm::Slot => "tool_slot",
        CallForm::Name => "tool_name",
    };
    let example = serde_json::json!({
        "tool_call": { key: selector, "parameters": {} }
    });
    serde_json::to_string(&example).unwrap_or_default()
}
