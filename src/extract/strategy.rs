//! 解析策略
//!
//! 按固定优先级排列的纯函数策略，每个返回 (matched, intents)；第一个 matched 的策略决定结果。
//! 整条消息本身是合法 JSON 时视为权威：即使其中没有工具调用，也不再扫描代码块或调用语法。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::extract::alias::normalize_tool_name;
use crate::extract::call_syntax::parse_calls;
use crate::extract::{ToolInvocationIntent, STRUCTURED_OUTPUT_KEYS};

/// 与 `tool_call` 同义的键（`tool_calls` 数组单独处理，只取首元素）
const CALL_KEYS: &[&str] = &["tool_call", "tool_code", "tool_command", "function_call", "call"];
const CALL_ARRAY_KEY: &str = "tool_calls";
/// 嵌套调用对象中表示工具名的键，按优先级
const NAME_KEYS: &[&str] = &["tool_name", "name", "tool"];
/// 嵌套调用对象中表示参数的键，按优先级
const PARAM_KEYS: &[&str] = &["parameters", "arguments", "args", "params", "input"];

/// 单个策略的结果
#[derive(Debug, Default)]
pub struct StrategyOutcome {
    pub matched: bool,
    pub intents: Vec<ToolInvocationIntent>,
}

impl StrategyOutcome {
    fn matched(intents: Vec<ToolInvocationIntent>) -> Self {
        Self {
            matched: true,
            intents,
        }
    }

    fn unmatched() -> Self {
        Self::default()
    }
}

/// 解析策略（按 ORDER 依次尝试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 整条消息是一个 JSON 对象
    WholeObject,
    /// 整条消息是一个 JSON 数组
    WholeArray,
    /// ``` 代码块中的 JSON，第一个产出意图的块生效
    FencedBlocks,
    /// `ident(k='v')` 调用语法兜底
    CallSyntax,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [
        Strategy::WholeObject,
        Strategy::WholeArray,
        Strategy::FencedBlocks,
        Strategy::CallSyntax,
    ];

    pub fn apply(self, text: &str) -> StrategyOutcome {
        match self {
            Strategy::WholeObject => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(obj)) => StrategyOutcome::matched(intents_from_object(&obj)),
                _ => StrategyOutcome::unmatched(),
            },
            Strategy::WholeArray => match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => StrategyOutcome::matched(intents_from_array(&items)),
                _ => StrategyOutcome::unmatched(),
            },
            Strategy::FencedBlocks => fenced_blocks(text)
                .into_iter()
                .map(intents_from_json_text)
                .find(|intents| !intents.is_empty())
                .map(StrategyOutcome::matched)
                .unwrap_or_else(StrategyOutcome::unmatched),
            Strategy::CallSyntax => {
                let intents = parse_calls(text);
                if intents.is_empty() {
                    StrategyOutcome::unmatched()
                } else {
                    StrategyOutcome::matched(intents)
                }
            }
        }
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_\-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// 文本中全部代码块的内容，按出现顺序
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    let Some(re) = fence_regex() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect()
}

/// 对一段文本依次应用对象 / 数组两种 JSON 形态
fn intents_from_json_text(text: &str) -> Vec<ToolInvocationIntent> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => intents_from_object(&obj),
        Ok(Value::Array(items)) => intents_from_array(&items),
        _ => Vec::new(),
    }
}

fn intents_from_array(items: &[Value]) -> Vec<ToolInvocationIntent> {
    items
        .iter()
        .filter_map(Value::as_object)
        .flat_map(intents_from_object)
        .collect()
}

/// 顶层对象：先找 tool_call 及其同义键，再看是否直接带 tool_slot / tool_name
fn intents_from_object(obj: &Map<String, Value>) -> Vec<ToolInvocationIntent> {
    for key in CALL_KEYS {
        if let Some(value) = obj.get(*key) {
            return intents_from_call_value(value);
        }
    }

    if let Some(Value::Array(calls)) = obj.get(CALL_ARRAY_KEY) {
        return calls
            .first()
            .and_then(Value::as_object)
            .and_then(normalize_call)
            .into_iter()
            .collect();
    }

    let has_selector = obj.contains_key("tool_slot") || obj.contains_key("tool_name");
    let has_structured_output = STRUCTURED_OUTPUT_KEYS.iter().any(|k| obj.contains_key(*k));
    if has_selector && !has_structured_output {
        return normalize_call(obj).into_iter().collect();
    }

    Vec::new()
}

/// tool_call 的值可以是对象、对象数组，或内嵌 JSON / 调用语法的字符串
fn intents_from_call_value(value: &Value) -> Vec<ToolInvocationIntent> {
    match value {
        Value::Object(call) => normalize_call(call).into_iter().collect(),
        Value::Array(calls) => calls
            .iter()
            .filter_map(Value::as_object)
            .filter_map(normalize_call)
            .collect(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(call)) => normalize_call(&call).into_iter().collect(),
            _ => parse_calls(raw),
        },
        _ => Vec::new(),
    }
}

/// 把一个调用对象规整为意图：tool_slot 优先，其次按 NAME_KEYS 取工具名并做别名改写
fn normalize_call(call: &Map<String, Value>) -> Option<ToolInvocationIntent> {
    // OpenAI 风格：{"type": "function", "function": {"name": ..., "arguments": "..."}}
    if let Some(Value::Object(function)) = call.get("function") {
        return normalize_call(function);
    }

    let parameters = extract_parameters(call);

    if let Some(slot) = non_empty_str(call.get("tool_slot")) {
        return Some(ToolInvocationIntent::slot(slot, parameters));
    }

    NAME_KEYS
        .iter()
        .find_map(|k| non_empty_str(call.get(*k)))
        .map(|name| ToolInvocationIntent::named(normalize_tool_name(name), parameters))
}

fn extract_parameters(call: &Map<String, Value>) -> Map<String, Value> {
    for key in PARAM_KEYS {
        match call.get(*key) {
            Some(Value::Object(params)) => return params.clone(),
            Some(Value::String(raw)) => {
                if let Ok(Value::Object(params)) = serde_json::from_str::<Value>(raw) {
                    return params;
                }
            }
            _ => {}
        }
    }
    Map::new()
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_object_without_tool_call_is_authoritative() {
        let outcome = Strategy::WholeObject.apply(r#"{"note": "read_file('x')"}"#);
        assert!(outcome.matched);
        assert!(outcome.intents.is_empty());
    }

    #[test]
    fn test_whole_array_accumulates() {
        let text = r#"[{"tool_name": "fs_read", "parameters": {"path": "a"}},
                       {"tool_call": {"tool_slot": "crm", "parameters": {}}},
                       42]"#;
        let outcome = Strategy::WholeArray.apply(text);
        assert!(outcome.matched);
        assert_eq!(outcome.intents.len(), 2);
        assert_eq!(outcome.intents[1].tool_slot(), Some("crm"));
    }

    #[test]
    fn test_fenced_blocks_first_yielding_block_wins() {
        let text = "```json\n{\"summary\": 1}\n```\nthen\n```\n{\"tool_name\": \"echo\", \"parameters\": {\"text\": \"x\"}}\n```";
        let outcome = Strategy::FencedBlocks.apply(text);
        assert!(outcome.matched);
        assert_eq!(outcome.intents.len(), 1);
        assert_eq!(outcome.intents[0].tool_name(), Some("echo"));
    }

    #[test]
    fn test_fenced_blocks_without_intents_unmatched() {
        let outcome = Strategy::FencedBlocks.apply("```json\n{\"a\": 1}\n```");
        assert!(!outcome.matched);
    }

    #[test]
    fn test_tool_calls_array_takes_first() {
        let obj = json!({"tool_calls": [
            {"type": "function", "function": {"name": "read_file", "arguments": "{\"path\": \"a.txt\"}"}},
            {"type": "function", "function": {"name": "list_files", "arguments": "{}"}}
        ]});
        let intents = intents_from_object(obj.as_object().unwrap());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].tool_name(), Some("fs_read"));
        assert_eq!(intents[0].parameters.get("path"), Some(&json!("a.txt")));
    }

    #[test]
    fn test_call_synonyms() {
        for key in ["tool_code", "tool_command", "function_call", "call"] {
            let obj = json!({ key: {"name": "fs.read_file", "arguments": {"path": "a.txt"}} });
            let intents = intents_from_object(obj.as_object().unwrap());
            assert_eq!(intents.len(), 1, "key {key}");
            assert_eq!(intents[0].tool_name(), Some("fs_read"));
        }
    }

    #[test]
    fn test_string_tool_code_with_call_syntax() {
        let obj = json!({"tool_code": "fs_read('notes.md')"});
        let intents = intents_from_object(obj.as_object().unwrap());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].parameters.get("path"), Some(&json!("notes.md")));
    }

    #[test]
    fn test_structured_output_key_suppresses_direct_intent() {
        let obj = json!({"tool_name": "fs_read", "extracted_data": {"a": 1}});
        assert!(intents_from_object(obj.as_object().unwrap()).is_empty());
    }

    #[test]
    fn test_slot_preferred_over_name() {
        let obj = json!({"tool_slot": "docs.reader", "tool_name": "fs_read", "parameters": {"p": 1}});
        let intents = intents_from_object(obj.as_object().unwrap());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].tool_slot(), Some("docs.reader"));
        assert_eq!(intents[0].tool_name(), None);
    }

    #[test]
    fn test_blank_selector_yields_nothing() {
        let obj = json!({"tool_call": {"tool_name": "  ", "parameters": {}}});
        assert!(intents_from_object(obj.as_object().unwrap()).is_empty());
    }
}
