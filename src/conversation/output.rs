//! 结构化产出识别
//!
//! 优先找 `STRUCTURED_OUTPUT:` 标记后的 JSON（裸写或包在代码块里）；否则扫描文本中每个 `{`，
//! 取第一个含有识别键的 JSON 对象。永不报错，找不到返回 None。

use serde_json::{Deserializer, Map, Value};

use crate::conversation::prompt::STRUCTURED_OUTPUT_LABEL;
use crate::extract::STRUCTURED_OUTPUT_KEYS;

pub fn extract_structured_output(message: &str) -> Option<Map<String, Value>> {
    labeled(message).or_else(|| keyed_object(message))
}

/// 标记后的第一个 JSON 对象
fn labeled(message: &str) -> Option<Map<String, Value>> {
    let (_, after) = message.rsplit_once(STRUCTURED_OUTPUT_LABEL)?;
    let start = after.find('{')?;
    // 标记与对象之间只允许空白和代码块开头
    let between = after[..start].trim();
    if !between.is_empty() && !between.starts_with("```") {
        return None;
    }
    first_object_at(&after[start..]).map(unwrap_envelope)
}

/// 文本中第一个含有识别键的 JSON 对象
///
/// 每个成功解析的片段只扫一次：在片段内按先序找嵌套对象，然后跳到片段之后继续。
fn keyed_object(message: &str) -> Option<Map<String, Value>> {
    let mut pos = 0;
    while let Some(offset) = message[pos..].find('{') {
        let start = pos + offset;
        let mut stream = Deserializer::from_str(&message[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                if let Some(found) = first_keyed(&value) {
                    return Some(unwrap_envelope(found.clone()));
                }
                pos = start + stream.byte_offset().max(1);
            }
            _ => pos = start + 1,
        }
    }
    None
}

/// 先序遍历，返回第一个含有识别键的对象
fn first_keyed(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(obj) => {
            if STRUCTURED_OUTPUT_KEYS.iter().any(|k| obj.contains_key(*k)) {
                return Some(obj);
            }
            obj.values().find_map(first_keyed)
        }
        Value::Array(items) => items.iter().find_map(first_keyed),
        _ => None,
    }
}

/// 从文本开头解析一个 JSON 值，忽略其后的内容
fn first_object_at(text: &str) -> Option<Map<String, Value>> {
    let mut stream = Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(obj))) => Some(obj),
        _ => None,
    }
}

/// `{"structured_output": {...}}` 只有这一个键时取内层
fn unwrap_envelope(obj: Map<String, Value>) -> Map<String, Value> {
    if obj.len() == 1 {
        if let Some(Value::Object(inner)) = obj.get("structured_output") {
            return inner.clone();
        }
    }
    obj
}
