//! 兜底解析：函数调用语法
//!
//! 模型有时不输出 JSON，而是写 `fs_read('a.txt')` 或 `filesystem.read_file(path="a.txt")`。
//! 仅识别别名表中的工具名；单个位置字符串参数绑定到 `path`；无法解析的参数列表直接跳过该片段。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::extract::alias::canonical_tool_name;
use crate::extract::ToolInvocationIntent;

/// 单个位置参数绑定到的参数名
const POSITIONAL_PARAM: &str = "path";

fn call_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<name>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\((?P<args>[^()]*)\)",
        )
        .ok()
    })
    .as_ref()
}

fn positional_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*(?:'(?P<sq>[^']*)'|"(?P<dq>[^"]*)")\s*$"#).ok())
        .as_ref()
}

fn kwarg_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:'(?P<sq>[^']*)'|"(?P<dq>[^"]*)"|(?P<bare>[^,\s]+))"#,
        )
        .ok()
    })
    .as_ref()
}

/// 扫描文本中的全部调用语法片段，按出现顺序返回
pub fn parse_calls(text: &str) -> Vec<ToolInvocationIntent> {
    let Some(re) = call_regex() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let name = caps.name("name")?.as_str();
            let canonical = canonical_tool_name(name)?;
            let args = caps.name("args").map(|m| m.as_str()).unwrap_or("");
            let parameters = parse_args(args)?;
            Some(ToolInvocationIntent::named(canonical, parameters))
        })
        .collect()
}

/// 解析参数列表；空列表得到空参数，无法识别的内容返回 None
fn parse_args(args: &str) -> Option<Map<String, Value>> {
    let mut parameters = Map::new();
    if args.trim().is_empty() {
        return Some(parameters);
    }

    if let Some(caps) = positional_regex().and_then(|re| re.captures(args)) {
        let value = caps
            .name("sq")
            .or_else(|| caps.name("dq"))
            .map(|m| m.as_str())
            .unwrap_or("");
        parameters.insert(POSITIONAL_PARAM.to_string(), Value::String(value.to_string()));
        return Some(parameters);
    }

    let re = kwarg_regex()?;
    for caps in re.captures_iter(args) {
        let Some(key) = caps.name("key") else {
            continue;
        };
        let value = if let Some(m) = caps.name("sq").or_else(|| caps.name("dq")) {
            Value::String(m.as_str().to_string())
        } else if let Some(m) = caps.name("bare") {
            bare_literal(m.as_str())
        } else {
            continue;
        };
        parameters.insert(key.as_str().to_string(), value);
    }

    if parameters.is_empty() {
        None
    } else {
        Some(parameters)
    }
}

/// 未加引号的字面量：Python 风格布尔 / None、数字，其余按字符串
fn bare_literal(raw: &str) -> Value {
    match raw {
        "True" | "true" => Value::Bool(true),
        "False" | "false" => Value::Bool(false),
        "None" | "null" => Value::Null,
        _ => serde_json::from_str::<serde_json::Number>(raw)
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}
