//! 工作流类型定义
//!
//! playbook 中的结构化多步规格：步骤、依赖、闸门决定与一次运行的结果。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type StepId = String;

/// 工作流规格（playbook 的 `[workflow]` 段）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// 单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    #[serde(flatten)]
    pub kind: StepKind,
    /// 全部完成后本步才可执行
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

/// 步骤类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// 调用一个具体工具；参数中的字符串按模板渲染
    Tool {
        tool: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    /// 一次 LLM 补全，输出为文本
    Llm { prompt: String },
    /// 审批闸门：没有 approve 决定时暂停
    Gate {
        #[serde(default)]
        prompt: Option<String>,
    },
}

/// 闸门动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Approved,
    Rejected,
}

/// 某个闸门上的人工决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl GateDecision {
    pub fn approved(comment: Option<String>) -> Self {
        Self {
            action: GateAction::Approved,
            comment,
            decided_at: Utc::now(),
        }
    }
}

/// 一次工作流运行的输入
#[derive(Debug, Clone, Default)]
pub struct WorkflowRun {
    pub execution_id: String,
    pub workflow: WorkflowSpec,
    pub inputs: Map<String, Value>,
    /// 之前运行（或检查点）留下的步骤输出；其中的步骤不会重跑
    pub step_outputs: Map<String, Value>,
    pub gate_decisions: BTreeMap<StepId, GateDecision>,
}

/// 一次工作流运行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Completed {
        step_outputs: Map<String, Value>,
    },
    Paused {
        step_id: StepId,
        step_outputs: Map<String, Value>,
    },
    Failed {
        step_id: Option<StepId>,
        error: String,
        step_outputs: Map<String, Value>,
    },
    Cancelled {
        step_outputs: Map<String, Value>,
    },
}

impl WorkflowOutcome {
    pub fn step_outputs(&self) -> &Map<String, Value> {
        match self {
            WorkflowOutcome::Completed { step_outputs }
            | WorkflowOutcome::Paused { step_outputs, .. }
            | WorkflowOutcome::Failed { step_outputs, .. }
            | WorkflowOutcome::Cancelled { step_outputs } => step_outputs,
        }
    }

    /// 写入执行上下文 workflow_result 的摘要
    pub fn summary(&self) -> Value {
        match self {
            WorkflowOutcome::Completed { step_outputs } => serde_json::json!({
                "status": "completed",
                "steps_completed": step_outputs.len(),
            }),
            WorkflowOutcome::Paused { step_id, step_outputs } => serde_json::json!({
                "status": "paused",
                "paused_step_id": step_id,
                "steps_completed": step_outputs.len(),
            }),
            WorkflowOutcome::Failed { step_id, error, .. } => serde_json::json!({
                "status": "failed",
                "failed_step_id": step_id,
                "error": error,
            }),
            WorkflowOutcome::Cancelled { step_outputs } => serde_json::json!({
                "status": "cancelled",
                "steps_completed": step_outputs.len(),
            }),
        }
    }
}

/// 工作流规格错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(StepId),
    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: StepId, dependency: StepId },
    #[error("Cyclic dependency detected")]
    CyclicDependency,
    #[error("Template error in step {step}: {message}")]
    Template { step: StepId, message: String },
}
