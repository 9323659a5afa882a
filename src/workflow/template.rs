//! 步骤参数模板渲染（minijinja）
//!
//! 上下文为 `{inputs, steps}`：`{{ inputs.topic }}`、`{{ steps.fetch }}`。
//! 只有包含模板语法的字符串才渲染，结果一律是字符串；
//! 唯一例外是整个字符串恰好是一个 `{{ expr }}` 且求值为对象或数组，此时保留结构。

use minijinja::Environment;
use serde_json::{Map, Value};

pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// 整个字符串是单个 `{{ expr }}` 时返回 expr
    fn sole_expression(s: &str) -> Option<&str> {
        let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
        if inner.contains("{{") || inner.contains("}}") {
            return None;
        }
        Some(inner.trim())
    }

    fn context(inputs: &Map<String, Value>, steps: &Map<String, Value>) -> minijinja::Value {
        minijinja::context! {
            inputs => minijinja::Value::from_serialize(inputs),
            steps => minijinja::Value::from_serialize(steps),
        }
    }

    pub fn render(
        &self,
        template: &str,
        inputs: &Map<String, Value>,
        steps: &Map<String, Value>,
    ) -> Result<String, minijinja::Error> {
        self.env.render_str(template, Self::context(inputs, steps))
    }

    /// 单表达式求值为对象或数组时返回其 JSON 结构
    fn structured(
        &self,
        template: &str,
        inputs: &Map<String, Value>,
        steps: &Map<String, Value>,
    ) -> Result<Option<Value>, minijinja::Error> {
        let Some(expr) = Self::sole_expression(template) else {
            return Ok(None);
        };
        let value = self
            .env
            .compile_expression(expr)?
            .eval(Self::context(inputs, steps))?;
        match value.kind() {
            minijinja::value::ValueKind::Map | minijinja::value::ValueKind::Seq => {
                Ok(serde_json::to_value(&value).ok())
            }
            _ => Ok(None),
        }
    }

    /// 递归渲染 JSON 值中的模板字符串
    pub fn render_value(
        &self,
        value: &Value,
        inputs: &Map<String, Value>,
        steps: &Map<String, Value>,
    ) -> Result<Value, minijinja::Error> {
        match value {
            Value::String(s) if Self::is_template(s) => {
                if let Some(structured) = self.structured(s, inputs, steps)? {
                    return Ok(structured);
                }
                Ok(Value::String(self.render(s, inputs, steps)?))
            }
            Value::Object(obj) => {
                let mut out = Map::new();
                for (k, v) in obj {
                    out.insert(k.clone(), self.render_value(v, inputs, steps)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, inputs, steps))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_inputs_and_steps() {
        let renderer = TemplateRenderer::new();
        let inputs = json!({"path": "a.txt"}).as_object().cloned().unwrap();
        let steps = json!({"fetch": "hello"}).as_object().cloned().unwrap();

        let params = json!({"path": "{{ inputs.path }}", "text": "got {{ steps.fetch }}", "n": 3});
        let rendered = renderer.render_value(&params, &inputs, &steps).unwrap();
        assert_eq!(rendered, json!({"path": "a.txt", "text": "got hello", "n": 3}));
    }

    #[test]
    fn test_json_looking_strings_stay_strings() {
        let renderer = TemplateRenderer::new();
        let inputs = json!({"target": "123", "flag": "true", "list": "[1]"})
            .as_object()
            .cloned()
            .unwrap();
        let params = json!({
            "text": "{{ inputs.target }}",
            "flag": "{{ inputs.flag }}",
            "list": "{{ inputs.list }}",
        });
        let rendered = renderer.render_value(&params, &inputs, &Map::new()).unwrap();
        assert_eq!(rendered, json!({"text": "123", "flag": "true", "list": "[1]"}));
    }

    #[test]
    fn test_sole_expression_keeps_structure() {
        let renderer = TemplateRenderer::new();
        let steps = json!({"fetch": {"files": ["a.txt"]}, "count": 3})
            .as_object()
            .cloned()
            .unwrap();
        let params = json!({
            "data": "{{ steps.fetch }}",
            "n": "{{ steps.count }}",
            "mixed": "files: {{ steps.fetch.files }}",
        });
        let rendered = renderer.render_value(&params, &Map::new(), &steps).unwrap();
        assert_eq!(rendered["data"], json!({"files": ["a.txt"]}));
        assert_eq!(rendered["n"], json!("3"));
        assert!(rendered["mixed"].is_string());
    }

    #[test]
    fn test_plain_strings_untouched() {
        let renderer = TemplateRenderer::new();
        let empty = Map::new();
        let value = json!("[not a template]");
        assert_eq!(renderer.render_value(&value, &empty, &empty).unwrap(), value);
    }
}
