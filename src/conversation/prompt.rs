//! System prompt 组装
//!
//! BuildPrompt 是纯函数：输入是对话状态与预先取好的 PromptContext，不访问任何存储。
//! 段落顺序固定：指令、变体、用户画像、语言、执行模式、工具、调用格式、完成约定。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ConversationState;
use crate::extract::{ToolInvocationIntent, ToolSelector};
use crate::playbook::{Playbook, ToolSlotSpec};
use crate::tools::{tool_call_example, tool_call_schema_json, CallForm, ToolDescriptor};

/// 完成标记
pub const STRUCTURED_OUTPUT_LABEL: &str = "STRUCTURED_OUTPUT:";

/// 用户画像（由 ContextSource 预取）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileContext {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// prompt 中展示的工具目录
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCatalog {
    /// 槽位目录 + 工作区绑定表（slot -> tool_name）
    Slots {
        slots: Vec<ToolSlotSpec>,
        bindings: BTreeMap<String, String>,
        policy: Option<String>,
    },
    /// 平铺的具体工具列表
    Flat(Vec<ToolDescriptor>),
}

impl ToolCatalog {
    pub fn call_form(&self) -> CallForm {
        match self {
            ToolCatalog::Slots { .. } => CallForm::Slot,
            ToolCatalog::Flat(_) => CallForm::Name,
        }
    }

    /// 把意图解析为具体工具名；未绑定的槽位返回给 LLM 看的错误
    pub fn resolve(&self, intent: &ToolInvocationIntent) -> Result<String, String> {
        match &intent.selector {
            ToolSelector::ToolName(name) => Ok(name.clone()),
            ToolSelector::ToolSlot(slot) => match self {
                ToolCatalog::Slots { bindings, .. } => bindings
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| format!("tool slot '{slot}' is not bound in this workspace")),
                ToolCatalog::Flat(_) => Err(format!(
                    "tool slot '{slot}' cannot be used here; call a tool by tool_name"
                )),
            },
        }
    }
}

/// BuildPrompt 的全部外部输入
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub playbook: Playbook,
    pub profile: Option<ProfileContext>,
    pub tools: ToolCatalog,
    /// 自动执行：跳过确认
    pub auto_execute: bool,
}

pub fn build_prompt(state: &ConversationState, ctx: &PromptContext) -> String {
    let mut sections = vec![playbook_section(&ctx.playbook)];
    if let Some(section) = variant_section(state, &ctx.playbook) {
        sections.push(section);
    }
    if let Some(profile) = &ctx.profile {
        sections.push(profile_section(profile));
    }
    sections.push(language_section(&state.locale));
    sections.push(mode_section(ctx.auto_execute));
    sections.push(tools_section(&ctx.tools));
    sections.push(call_format_section(&ctx.tools));
    sections.push(completion_section());
    sections.join("\n\n")
}

fn playbook_section(playbook: &Playbook) -> String {
    format!(
        "# Playbook: {} ({} v{})\n\n{}",
        playbook.name,
        playbook.code,
        playbook.version,
        playbook.instructions.trim()
    )
}

fn variant_section(state: &ConversationState, playbook: &Playbook) -> Option<String> {
    let variant = state.variant.as_deref().and_then(|v| playbook.variant(v));

    let mut skip: Vec<&str> = Vec::new();
    let variant_skips = variant.map(|v| v.skip_steps.as_slice()).unwrap_or_default();
    for step in state.skip_steps.iter().chain(variant_skips) {
        if !skip.contains(&step.as_str()) {
            skip.push(step);
        }
    }

    if variant.is_none() && skip.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    match variant {
        Some(v) => {
            lines.push(format!("## Variant: {}", v.name));
            if let Some(desc) = &v.description {
                lines.push(desc.clone());
            }
        }
        None => lines.push("## Variant".to_string()),
    }
    if !skip.is_empty() {
        lines.push(format!("Skip these steps: {}", skip.join(", ")));
    }
    if let Some(v) = variant.filter(|v| !v.checklist.is_empty()) {
        lines.push("Checklist:".to_string());
        lines.extend(v.checklist.iter().map(|item| format!("- {item}")));
    }
    Some(lines.join("\n"))
}

fn profile_section(profile: &ProfileContext) -> String {
    let mut lines = vec!["## User profile".to_string()];
    if let Some(name) = &profile.display_name {
        lines.push(format!("Name: {name}"));
    }
    for (key, value) in &profile.attributes {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("- {key}: {rendered}"));
    }
    lines.join("\n")
}

fn language_name(locale: &str) -> &str {
    match locale {
        "en" | "en-US" | "en-GB" => "English",
        "zh-TW" | "zh-Hant" => "Traditional Chinese",
        "zh-CN" | "zh-Hans" | "zh" => "Simplified Chinese",
        "ja" | "ja-JP" => "Japanese",
        "ko" | "ko-KR" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        other => other,
    }
}

fn language_section(locale: &str) -> String {
    format!(
        "## Language\nRespond in {} (locale: {locale}).",
        language_name(locale)
    )
}

fn mode_section(auto_execute: bool) -> String {
    if auto_execute {
        "## Execution mode\nAuto-execute: do not ask the user for confirmation; call tools directly and keep going until the task is done.".to_string()
    } else {
        "## Execution mode\nInteractive: confirm with the user before actions that change files or external state.".to_string()
    }
}

fn tools_section(tools: &ToolCatalog) -> String {
    match tools {
        ToolCatalog::Slots {
            slots,
            bindings,
            policy,
        } => {
            let mut lines = vec!["## Tool slots".to_string()];
            for slot in slots {
                let state = if bindings.contains_key(&slot.slot) {
                    "available"
                } else {
                    "not configured"
                };
                lines.push(format!("- `{}` ({state}): {}", slot.slot, slot.description));
            }
            if let Some(policy) = policy {
                lines.push(format!("Policy: {policy}"));
            }
            lines.join("\n")
        }
        ToolCatalog::Flat(descriptors) => {
            let mut lines = vec!["## Available tools".to_string()];
            for d in descriptors {
                lines.push(format!("- `{}`: {} Parameters: {}", d.name, d.description, d.parameters));
            }
            if descriptors.is_empty() {
                lines.push("(none)".to_string());
            }
            lines.join("\n")
        }
    }
}

fn call_format_section(tools: &ToolCatalog) -> String {
    let form = tools.call_form();
    let selector = match tools {
        ToolCatalog::Slots { slots, .. } => slots.first().map(|s| s.slot.as_str()).unwrap_or("<slot>"),
        ToolCatalog::Flat(descriptors) => descriptors.first().map(|d| d.name.as_str()).unwrap_or("<tool>"),
    };
    format!(
        "## Tool call format\nTo call a tool, reply with exactly one JSON object of this shape:\n```json\n{}\n```\nJSON Schema:\n```json\n{}\n```\nTool results come back as a system message holding a JSON array.",
        tool_call_example(form, selector),
        tool_call_schema_json(form)
    )
}

fn completion_section() -> String {
    format!(
        "## Completion\nWhen the task is complete, end your reply with `{STRUCTURED_OUTPUT_LABEL}` followed by one JSON object, e.g.\n{STRUCTURED_OUTPUT_LABEL} {{\"extracted_data\": {{}}, \"deliverables\": []}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::PlaybookVariant;

    fn playbook() -> Playbook {
        let mut p = Playbook::new("brief", "Brief", "Write a brief.");
        p.variants.push(PlaybookVariant {
            name: "quick".into(),
            description: Some("Short version".into()),
            skip_steps: vec!["research".into(), "review".into()],
            checklist: vec!["Title".into()],
        });
        p
    }

    fn flat() -> ToolCatalog {
        ToolCatalog::Flat(vec![ToolDescriptor {
            name: "fs_read".into(),
            description: "Read a file.".into(),
            parameters: serde_json::json!({"type": "object"}),
        }])
    }

    fn state() -> ConversationState {
        ConversationState::new("exec-1", "brief", "ws-1", "user-1", "zh-TW")
    }

    #[test]
    fn test_section_order() {
        let ctx = PromptContext {
            playbook: playbook(),
            profile: Some(ProfileContext {
                display_name: Some("Ada".into()),
                attributes: BTreeMap::new(),
            }),
            tools: flat(),
            auto_execute: true,
        };
        let mut state = state();
        state.variant = Some("quick".into());
        let prompt = build_prompt(&state, &ctx);

        let positions: Vec<usize> = [
            "# Playbook: Brief",
            "## Variant: quick",
            "## User profile",
            "## Language",
            "## Execution mode",
            "## Available tools",
            "## Tool call format",
            "## Completion",
        ]
        .iter()
        .map(|h| prompt.find(h).unwrap_or_else(|| panic!("missing {h}")))
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("Traditional Chinese"));
        assert!(prompt.contains("do not ask the user for confirmation"));
    }

    #[test]
    fn test_skip_steps_union() {
        let ctx = PromptContext {
            playbook: playbook(),
            profile: None,
            tools: flat(),
            auto_execute: false,
        };
        let mut state = state();
        state.variant = Some("quick".into());
        state.skip_steps = vec!["intro".into(), "review".into()];
        let prompt = build_prompt(&state, &ctx);
        assert!(prompt.contains("Skip these steps: intro, review, research"));
        assert!(prompt.contains("- Title"));
    }

    #[test]
    fn test_one_call_shape_per_catalog() {
        let mut ctx = PromptContext {
            playbook: playbook(),
            profile: None,
            tools: flat(),
            auto_execute: false,
        };
        let prompt = build_prompt(&state(), &ctx);
        assert!(prompt.contains("\"tool_name\""));
        assert!(!prompt.contains("tool_slot"));

        ctx.tools = ToolCatalog::Slots {
            slots: vec![ToolSlotSpec {
                slot: "docs.reader".into(),
                description: "Reads docs".into(),
            }],
            bindings: BTreeMap::new(),
            policy: Some("Read before writing.".into()),
        };
        let prompt = build_prompt(&state(), &ctx);
        assert!(prompt.contains("\"tool_slot\""));
        assert!(!prompt.contains("tool_name"));
        assert!(prompt.contains("`docs.reader` (not configured)"));
        assert!(prompt.contains("Policy: Read before writing."));
    }

    #[test]
    fn test_resolve_slots() {
        let mut bindings = BTreeMap::new();
        bindings.insert("docs.reader".to_string(), "fs_read".to_string());
        let catalog = ToolCatalog::Slots {
            slots: vec![],
            bindings,
            policy: None,
        };
        let bound = ToolInvocationIntent::slot("docs.reader", Default::default());
        let unbound = ToolInvocationIntent::slot("crm.lookup", Default::default());
        let named = ToolInvocationIntent::named("echo", Default::default());
        assert_eq!(catalog.resolve(&bound), Ok("fs_read".to_string()));
        assert!(catalog.resolve(&unbound).unwrap_err().contains("not bound"));
        assert_eq!(catalog.resolve(&named), Ok("echo".to_string()));
    }
}
