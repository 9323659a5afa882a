//! 执行记录与状态机
//!
//! queued -> running -> {completed, failed, cancelled}，running <-> paused；终态不可再迁移。
//! 所有状态变更都经过 `Execution::transition`，completed_at 在进入终态时只写一次。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::{ConversationSnapshot, ConversationState, Message};
use crate::core::EngineError;
use crate::workflow::GateDecision;

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, to),
            (Queued, Running | Failed | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Failed | Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(EngineError::Storage(format!("unknown execution status: {other}"))),
        }
    }
}

/// 实际执行后端（start 时确定，之后不变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// 对话式，逐回合同步执行
    InProcess,
    /// 结构化工作流，后台任务执行
    Runner,
}

/// 调用方给出的后端偏好
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendHint {
    #[default]
    Auto,
    Runner,
    InProcess,
}

/// 暂停点：停在哪个闸门，以及已做出的闸门决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub paused_step_id: String,
    #[serde(default)]
    pub gate_decisions: BTreeMap<String, GateDecision>,
}

/// 执行记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub playbook_code: String,
    pub workspace_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub backend: ExecutionBackend,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    pub locale: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    /// 仅在 paused 时存在
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    /// 恢复后保留的闸门决定
    #[serde(default)]
    pub gate_decisions: BTreeMap<String, GateDecision>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub extracted_data: Map<String, Value>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub step_outputs: Map<String, Value>,
    #[serde(default)]
    pub workflow_result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub rerun_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// 新建 queued 记录
    pub fn new(
        playbook_code: impl Into<String>,
        workspace_id: impl Into<String>,
        profile_id: impl Into<String>,
        backend: ExecutionBackend,
        locale: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            playbook_code: playbook_code.into(),
            workspace_id: workspace_id.into(),
            profile_id: profile_id.into(),
            project_id: None,
            backend,
            status: ExecutionStatus::Queued,
            conversation_history: Vec::new(),
            locale: locale.into(),
            variant: None,
            skip_steps: Vec::new(),
            checkpoint: None,
            gate_decisions: BTreeMap::new(),
            inputs: Map::new(),
            extracted_data: Map::new(),
            outputs: Map::new(),
            step_outputs: Map::new(),
            workflow_result: None,
            error: None,
            cancel_reason: None,
            rerun_of: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// 校验并执行状态迁移
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<(), EngineError> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                execution_id: self.execution_id.clone(),
                from,
                to,
            });
        }
        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if to == ExecutionStatus::Cancelled {
            self.cancelled_at = Some(now);
        }
        if to != ExecutionStatus::Paused {
            self.checkpoint = None;
        }
        tracing::info!(
            execution_id = %self.execution_id,
            from = %from,
            to = %to,
            "execution transition"
        );
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn conversation_snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_history: self.conversation_history.clone(),
            locale: self.locale.clone(),
            playbook_code: self.playbook_code.clone(),
            variant: self.variant.clone(),
            skip_steps: self.skip_steps.clone(),
            workspace_id: self.workspace_id.clone(),
            profile_id: self.profile_id.clone(),
        }
    }

    pub fn conversation_state(&self) -> ConversationState {
        ConversationState::from_snapshot(self.execution_id.clone(), self.conversation_snapshot())
    }

    /// 回写一回合后的对话历史
    pub fn store_conversation(&mut self, state: &ConversationState) {
        self.conversation_history = state.history.clone();
        self.touch();
    }

    /// 合并结构化产出：extracted_data 键（或整个对象）并入 extracted_data，对象本身成为 outputs
    pub fn absorb_structured_output(&mut self, output: &Map<String, Value>) {
        match output.get("extracted_data") {
            Some(Value::Object(data)) => {
                for (k, v) in data {
                    self.extracted_data.insert(k.clone(), v.clone());
                }
            }
            _ => {
                for (k, v) in output {
                    self.extracted_data.insert(k.clone(), v.clone());
                }
            }
        }
        self.outputs = output.clone();
        self.touch();
    }

    /// 对外暴露的执行上下文
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            status: self.status,
            checkpoint: self.checkpoint.clone(),
            inputs: self.inputs.clone(),
            gate_decisions: (!self.gate_decisions.is_empty()).then(|| self.gate_decisions.clone()),
            workflow_result: self.workflow_result.clone(),
            step_outputs: (!self.step_outputs.is_empty()).then(|| self.step_outputs.clone()),
            outputs: (!self.outputs.is_empty()).then(|| self.outputs.clone()),
            extracted_data: (!self.extracted_data.is_empty()).then(|| self.extracted_data.clone()),
            error: self.error.clone(),
            cancelled_at: self.cancelled_at,
        }
    }
}

/// 持久化的执行上下文（GetStatus 返回）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    pub inputs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_decisions: Option<BTreeMap<String, GateDecision>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_outputs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}
