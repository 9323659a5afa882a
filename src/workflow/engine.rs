//! 工作流引擎
//!
//! WorkflowBackend 是 runner 后端的协作接口；LocalWorkflowEngine 在当前进程内按拓扑序逐步执行：
//! 已有输出的步骤跳过（从检查点恢复），闸门没有 approve 决定时暂停，每步之间检查取消。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::conversation::Message;
use crate::llm::LlmClient;
use crate::tools::ToolInvoker;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::template::TemplateRenderer;
use crate::workflow::types::*;

/// 结构化工作流后端
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn run(&self, run: WorkflowRun, cancel: CancellationToken) -> WorkflowOutcome;
}

/// 进程内工作流引擎
pub struct LocalWorkflowEngine {
    tools: Arc<dyn ToolInvoker>,
    llm: Arc<dyn LlmClient>,
    renderer: TemplateRenderer,
}

enum StepResult {
    Output(Value),
    Pause,
    Fail(String),
    Cancelled,
}

impl LocalWorkflowEngine {
    pub fn new(tools: Arc<dyn ToolInvoker>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            tools,
            llm,
            renderer: TemplateRenderer::new(),
        }
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        run: &WorkflowRun,
        step_outputs: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> StepResult {
        match &step.kind {
            StepKind::Tool { tool, parameters } => {
                let rendered = match self.renderer.render_value(
                    &Value::Object(parameters.clone()),
                    &run.inputs,
                    step_outputs,
                ) {
                    Ok(Value::Object(params)) => params,
                    Ok(_) => Map::new(),
                    Err(e) => return StepResult::Fail(template_error(&step.id, e)),
                };
                tokio::select! {
                    _ = cancel.cancelled() => StepResult::Cancelled,
                    result = self.tools.invoke(tool, rendered) => {
                        if result.success {
                            StepResult::Output(result.result.unwrap_or(Value::Null))
                        } else {
                            StepResult::Fail(result.error.unwrap_or_else(|| "tool failed".to_string()))
                        }
                    }
                }
            }
            StepKind::Llm { prompt } => {
                let prompt = match self.renderer.render(prompt, &run.inputs, step_outputs) {
                    Ok(p) => p,
                    Err(e) => return StepResult::Fail(template_error(&step.id, e)),
                };
                let messages = [
                    Message::system(format!(
                        "You are executing step '{}' of an automated workflow. Reply with the step result only.",
                        step.id
                    )),
                    Message::user(prompt),
                ];
                tokio::select! {
                    _ = cancel.cancelled() => StepResult::Cancelled,
                    reply = self.llm.complete(&messages) => match reply {
                        Ok(text) => StepResult::Output(Value::String(text)),
                        Err(e) => StepResult::Fail(e.to_string()),
                    }
                }
            }
            StepKind::Gate { .. } => match run.gate_decisions.get(&step.id) {
                Some(decision) if decision.action == GateAction::Approved => {
                    StepResult::Output(serde_json::json!({
                        "approved": true,
                        "comment": decision.comment,
                    }))
                }
                Some(decision) => StepResult::Fail(
                    decision
                        .comment
                        .clone()
                        .unwrap_or_else(|| format!("rejected at gate {}", step.id)),
                ),
                None => StepResult::Pause,
            },
        }
    }
}

fn template_error(step_id: &str, e: minijinja::Error) -> String {
    WorkflowError::Template {
        step: step_id.to_string(),
        message: e.to_string(),
    }
    .to_string()
}

#[async_trait]
impl WorkflowBackend for LocalWorkflowEngine {
    async fn run(&self, run: WorkflowRun, cancel: CancellationToken) -> WorkflowOutcome {
        let mut step_outputs = run.step_outputs.clone();

        let order = match WorkflowGraph::new(&run.workflow).and_then(|g| g.execution_order()) {
            Ok(order) => order,
            Err(e) => {
                return WorkflowOutcome::Failed {
                    step_id: None,
                    error: e.to_string(),
                    step_outputs,
                }
            }
        };

        for step_id in order {
            if cancel.is_cancelled() {
                tracing::info!(execution_id = %run.execution_id, "workflow cancelled between steps");
                return WorkflowOutcome::Cancelled { step_outputs };
            }
            if step_outputs.contains_key(&step_id) {
                continue;
            }
            let Some(step) = run.workflow.steps.iter().find(|s| s.id == step_id) else {
                continue;
            };

            tracing::info!(execution_id = %run.execution_id, step_id = %step_id, "workflow step start");
            match self.run_step(step, &run, &step_outputs, &cancel).await {
                StepResult::Output(value) => {
                    step_outputs.insert(step_id, value);
                }
                StepResult::Pause => {
                    tracing::info!(execution_id = %run.execution_id, step_id = %step_id, "workflow paused at gate");
                    return WorkflowOutcome::Paused {
                        step_id,
                        step_outputs,
                    };
                }
                StepResult::Fail(error) => {
                    tracing::warn!(execution_id = %run.execution_id, step_id = %step_id, error = %error, "workflow step failed");
                    return WorkflowOutcome::Failed {
                        step_id: Some(step_id),
                        error,
                        step_outputs,
                    };
                }
                StepResult::Cancelled => return WorkflowOutcome::Cancelled { step_outputs },
            }
        }

        WorkflowOutcome::Completed { step_outputs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{builtin_registry, ToolExecutor};
    use serde_json::json;

    fn engine(dir: &std::path::Path, llm: ScriptedLlmClient) -> LocalWorkflowEngine {
        let tools = ToolExecutor::new(builtin_registry(dir), 5);
        LocalWorkflowEngine::new(Arc::new(tools), Arc::new(llm))
    }

    fn spec() -> WorkflowSpec {
        toml::from_str(
            r#"
            [[steps]]
            id = "draft"
            type = "llm"
            prompt = "Write about {{ inputs.topic }}"

            [[steps]]
            id = "approve"
            type = "gate"
            depends_on = ["draft"]

            [[steps]]
            id = "save"
            type = "tool"
            tool = "fs_write"
            parameters = { path = "out.md", content = "{{ steps.draft }}" }
            depends_on = ["approve"]
            "#,
        )
        .unwrap()
    }

    fn run_with(decisions: Decisions) -> WorkflowRun {
        WorkflowRun {
            execution_id: "exec-1".into(),
            workflow: spec(),
            inputs: json!({"topic": "rust"}).as_object().cloned().unwrap(),
            step_outputs: Map::new(),
            gate_decisions: decisions,
        }
    }

    type Decisions = std::collections::BTreeMap<StepId, GateDecision>;

    #[tokio::test]
    async fn test_pauses_at_gate_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlmClient::with_responses(vec!["Rust is fast."]);
        let engine = engine(dir.path(), llm);

        let outcome = engine.run(run_with(Decisions::new()), CancellationToken::new()).await;
        let WorkflowOutcome::Paused { step_id, step_outputs } = outcome else {
            panic!("expected pause, got {outcome:?}");
        };
        assert_eq!(step_id, "approve");
        assert_eq!(step_outputs.get("draft"), Some(&json!("Rust is fast.")));

        let mut decisions = Decisions::new();
        decisions.insert("approve".into(), GateDecision::approved(None));
        let mut resumed = run_with(decisions);
        resumed.step_outputs = step_outputs;
        let outcome = engine.run(resumed, CancellationToken::new()).await;
        assert!(matches!(outcome, WorkflowOutcome::Completed { .. }), "{outcome:?}");

        let written = std::fs::read_to_string(dir.path().join("out.md")).unwrap();
        assert_eq!(written, "Rust is fast.");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), ScriptedLlmClient::new());
        let token = CancellationToken::new();
        token.cancel();
        let outcome = engine.run(run_with(Decisions::new()), token).await;
        assert!(matches!(outcome, WorkflowOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_tool_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), ScriptedLlmClient::new());
        let run = WorkflowRun {
            execution_id: "exec-2".into(),
            workflow: WorkflowSpec {
                steps: vec![StepSpec {
                    id: "read".into(),
                    kind: StepKind::Tool {
                        tool: "fs_read".into(),
                        parameters: json!({"path": "missing.txt"}).as_object().cloned().unwrap(),
                    },
                    depends_on: vec![],
                }],
            },
            ..Default::default()
        };
        let outcome = engine.run(run, CancellationToken::new()).await;
        let WorkflowOutcome::Failed { step_id, error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(step_id.as_deref(), Some("read"));
        assert!(error.contains("not found"));
    }
}
