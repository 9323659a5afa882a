//! 引擎错误类型与对外错误分类
//!
//! EngineError 覆盖状态机违例、查找失败、上游不可用等；ErrorKind 供传输层（HTTP / RPC）机械映射为
//! not-found / conflict / bad-request / server-error。工具级失败不在此列：它们在回合内以 system 消息回灌给 LLM。

use thiserror::Error;

use crate::execution::ExecutionStatus;
use crate::llm::LlmError;

/// 引擎运行过程中可能向调用方返回的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Playbook not found: {0}")]
    PlaybookNotFound(String),

    #[error("Invalid transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// 当前状态不允许该操作（如对终态执行 Continue、对工作流执行 Continue）
    #[error("Operation '{operation}' not allowed for execution {execution_id} in status {status}")]
    InvalidState {
        execution_id: String,
        operation: &'static str,
        status: ExecutionStatus,
    },

    #[error("Gate mismatch for execution {execution_id}: paused at {expected}, got {actual}")]
    GateMismatch {
        execution_id: String,
        expected: String,
        actual: String,
    },

    #[error("A turn is already in flight for execution {0}")]
    TurnInProgress(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Missing required input '{input}' for playbook {playbook_code}")]
    MissingRequiredOverride {
        playbook_code: String,
        input: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailure(String),

    #[error("Upstream failure: {0}")]
    Upstream(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution cancelled")]
    Cancelled,
}

/// 对外错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Upstream,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ExecutionNotFound(_) | EngineError::PlaybookNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::InvalidTransition { .. }
            | EngineError::InvalidState { .. }
            | EngineError::GateMismatch { .. }
            | EngineError::TurnInProgress(_)
            | EngineError::DuplicateRequest(_) => ErrorKind::Conflict,
            EngineError::MissingRequiredOverride { .. } | EngineError::InvalidRequest(_) => {
                ErrorKind::BadRequest
            }
            EngineError::Upstream(_) => ErrorKind::Upstream,
            EngineError::ToolExecutionFailure(_)
            | EngineError::Storage(_)
            | EngineError::Cancelled => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("serialization: {e}"))
    }
}
