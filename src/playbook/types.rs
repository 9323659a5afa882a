//! Playbook 定义

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowSpec;

/// 可执行的任务模板：指令、所需输入、工具槽位，以及可选的结构化工作流
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub code: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 对话式执行时的指令块
    pub instructions: String,
    /// 重跑时合并后的输入必须包含的键
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub tool_slots: Vec<ToolSlotSpec>,
    /// 槽位使用策略（原样写入 prompt）
    #[serde(default)]
    pub tool_policy: Option<String>,
    #[serde(default)]
    pub variants: Vec<PlaybookVariant>,
    #[serde(default)]
    pub workflow: Option<WorkflowSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Playbook {
    /// 最小定义，常用于测试与内置 playbook
    pub fn new(code: impl Into<String>, name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            version: default_version(),
            description: None,
            instructions: instructions.into(),
            required_inputs: Vec::new(),
            tool_slots: Vec::new(),
            tool_policy: None,
            variants: Vec::new(),
            workflow: None,
        }
    }

    pub fn variant(&self, name: &str) -> Option<&PlaybookVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn has_workflow(&self) -> bool {
        self.workflow.as_ref().is_some_and(|w| !w.steps.is_empty())
    }
}

/// 工具槽位：抽象能力名，由工作区绑定到具体工具
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSlotSpec {
    pub slot: String,
    #[serde(default)]
    pub description: String,
}

/// 变体：跳过部分步骤、附加检查清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookVariant {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    #[serde(default)]
    pub checklist: Vec<String>,
}
