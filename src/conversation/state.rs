//! 对话状态
//!
//! 按 execution_id 区分，可由快照完全恢复：快照 -> 序列化 -> 反序列化 -> 恢复后，BuildPrompt 输出逐字节一致。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::prompt::{build_prompt, PromptContext};
use crate::conversation::Message;
use crate::tools::{SchemaLookup, ToolInvocationResult};

/// 单个执行的对话状态
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub execution_id: String,
    pub playbook_code: String,
    pub workspace_id: String,
    pub profile_id: String,
    pub locale: String,
    pub variant: Option<String>,
    pub skip_steps: Vec<String>,
    pub history: Vec<Message>,
}

/// 持久化快照（执行上下文中保存的部分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_history: Vec<Message>,
    pub locale: String,
    pub playbook_code: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    pub workspace_id: String,
    pub profile_id: String,
}

impl ConversationState {
    pub fn new(
        execution_id: impl Into<String>,
        playbook_code: impl Into<String>,
        workspace_id: impl Into<String>,
        profile_id: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            playbook_code: playbook_code.into(),
            workspace_id: workspace_id.into(),
            profile_id: profile_id.into(),
            locale: locale.into(),
            variant: None,
            skip_steps: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_history: self.history.clone(),
            locale: self.locale.clone(),
            playbook_code: self.playbook_code.clone(),
            variant: self.variant.clone(),
            skip_steps: self.skip_steps.clone(),
            workspace_id: self.workspace_id.clone(),
            profile_id: self.profile_id.clone(),
        }
    }

    pub fn from_snapshot(execution_id: impl Into<String>, snapshot: ConversationSnapshot) -> Self {
        Self {
            execution_id: execution_id.into(),
            playbook_code: snapshot.playbook_code,
            workspace_id: snapshot.workspace_id,
            profile_id: snapshot.profile_id,
            locale: snapshot.locale,
            variant: snapshot.variant,
            skip_steps: snapshot.skip_steps,
            history: snapshot.conversation_history,
        }
    }

    pub fn append_user_message(&mut self, content: impl Into<String>) {
        self.history.push(Message::user(content));
    }

    pub fn append_assistant_message(&mut self, content: impl Into<String>) {
        self.history.push(Message::assistant(content));
    }

    /// 把一批工具结果作为一条 system 消息（JSON 数组）追加；失败项附带该工具的参数 schema
    pub fn append_tool_results(&mut self, results: &[ToolInvocationResult], schemas: &dyn SchemaLookup) {
        if results.is_empty() {
            return;
        }
        let entries: Vec<Value> = results
            .iter()
            .map(|r| {
                let mut entry = serde_json::to_value(r).unwrap_or_else(|_| {
                    serde_json::json!({"tool_name": r.tool_name, "success": r.success})
                });
                if !r.success {
                    if let (Some(schema), Some(obj)) =
                        (schemas.parameter_schema(&r.tool_name), entry.as_object_mut())
                    {
                        obj.insert("parameter_schema".to_string(), schema);
                    }
                }
                entry
            })
            .collect();
        let content = serde_json::to_string_pretty(&Value::Array(entries))
            .unwrap_or_else(|_| "[]".to_string());
        self.history.push(Message::system(content));
    }

    pub fn build_prompt(&self, ctx: &PromptContext) -> String {
        build_prompt(self, ctx)
    }

    /// LLM 输入：system prompt + 完整历史
    pub fn build_messages(&self, ctx: &PromptContext) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(self.build_prompt(ctx)));
        messages.extend(self.history.iter().cloned());
        messages
    }
}
