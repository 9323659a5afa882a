//! 对话状态管理
//!
//! 每个执行一份 ConversationState：有序的 user / assistant / system 历史、语言、变体与跳过步骤。
//! 提供 prompt 组装、工具结果回灌、结构化产出识别，以及驱动单回合的 TurnRunner。

pub mod message;
pub mod output;
pub mod prompt;
pub mod state;
pub mod turn;

pub use message::{Message, Role};
pub use output::extract_structured_output;
pub use prompt::{build_prompt, ProfileContext, PromptContext, ToolCatalog, STRUCTURED_OUTPUT_LABEL};
pub use state::{ConversationSnapshot, ConversationState};
pub use turn::{TurnOutcome, TurnRunner, DEFAULT_MAX_TOOL_ROUNDS};
