//! 工具调用提取与规整
//!
//! 从 LLM 的自由文本回复中找出工具调用意图。支持多种方言：整条 JSON 对象 / 数组、
//! ```json 代码块、`read_file('a.txt')` 这样的调用语法。纯函数、无副作用、永不报错：
//! 解析不出任何东西时返回空列表。

pub mod alias;
pub mod call_syntax;
pub mod intent;
pub mod strategy;

pub use alias::{canonical_tool_name, normalize_tool_name};
pub use intent::{ToolInvocationIntent, ToolSelector};
pub use strategy::{Strategy, StrategyOutcome};

/// 出现任一键即视为结构化产出，而非工具调用
pub const STRUCTURED_OUTPUT_KEYS: &[&str] = &[
    "structured_output",
    "extracted_data",
    "outputs",
    "deliverables",
    "final_output",
];

/// 按策略顺序提取工具调用意图，第一个命中的策略决定结果
pub fn extract_tool_calls(message: &str) -> Vec<ToolInvocationIntent> {
    let text = message.trim();
    if text.is_empty() {
        return Vec::new();
    }

    for strategy in Strategy::ORDER {
        let outcome = strategy.apply(text);
        if outcome.matched {
            tracing::debug!(
                strategy = ?strategy,
                count = outcome.intents.len(),
                "tool calls extracted"
            );
            return outcome.intents;
        }
    }
    Vec::new()
}
