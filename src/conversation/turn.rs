//! 单回合执行
//!
//! 追加用户消息后循环：调 LLM -> 追加助手消息 -> 提取工具调用 -> 顺序执行 -> 回灌结果，
//! 直到回复不含工具调用或达到 max_tool_rounds。每次 LLM 调用和每次工具调用前检查取消。

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::conversation::output::extract_structured_output;
use crate::conversation::prompt::PromptContext;
use crate::conversation::ConversationState;
use crate::core::EngineError;
use crate::extract::extract_tool_calls;
use crate::llm::LlmClient;
use crate::tools::{SchemaLookup, ToolInvocationResult, ToolInvoker};

/// 默认每回合最多的工具往返次数
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// 回合结果
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// 最后一条助手回复
    pub assistant_message: String,
    pub tool_results: Vec<ToolInvocationResult>,
    pub structured_output: Option<Map<String, Value>>,
}

impl TurnOutcome {
    pub fn completed(&self) -> bool {
        self.structured_output.is_some()
    }
}

/// 回合执行器：只借用协作者，不持有状态
pub struct TurnRunner<'a> {
    llm: &'a dyn LlmClient,
    tools: &'a dyn ToolInvoker,
    schemas: &'a dyn SchemaLookup,
    max_tool_rounds: usize,
}

impl<'a> TurnRunner<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        tools: &'a dyn ToolInvoker,
        schemas: &'a dyn SchemaLookup,
    ) -> Self {
        Self {
            llm,
            tools,
            schemas,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub async fn run(
        &self,
        state: &mut ConversationState,
        ctx: &PromptContext,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        state.append_user_message(user_message);
        let mut all_results = Vec::new();
        let mut round = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let messages = state.build_messages(ctx);
            tracing::debug!(
                execution_id = %state.execution_id,
                round,
                messages = messages.len(),
                "llm call"
            );
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                reply = self.llm.complete(&messages) => reply?,
            };
            state.append_assistant_message(reply.clone());

            let intents = extract_tool_calls(&reply);
            if intents.is_empty() {
                let structured_output = extract_structured_output(&reply);
                return Ok(TurnOutcome {
                    assistant_message: reply,
                    tool_results: all_results,
                    structured_output,
                });
            }

            if round >= self.max_tool_rounds {
                tracing::warn!(
                    execution_id = %state.execution_id,
                    max_tool_rounds = self.max_tool_rounds,
                    "tool round limit reached, ending turn"
                );
                return Ok(TurnOutcome {
                    assistant_message: reply,
                    tool_results: all_results,
                    structured_output: None,
                });
            }

            let mut results = Vec::with_capacity(intents.len());
            for intent in intents {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let result = match ctx.tools.resolve(&intent) {
                    Ok(tool_name) => self.tools.invoke(&tool_name, intent.parameters).await,
                    Err(reason) => ToolInvocationResult::failed(intent.display_name(), reason),
                };
                if !result.success {
                    tracing::info!(
                        execution_id = %state.execution_id,
                        tool = %result.tool_name,
                        error = result.error.as_deref().unwrap_or(""),
                        "tool call failed, reporting back to llm"
                    );
                }
                results.push(result);
            }

            state.append_tool_results(&results, self.schemas);
            all_results.extend(results);
            round += 1;
        }
    }
}
