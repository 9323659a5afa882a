//! 执行路由
//!
//! 对外的六个操作：Start / Continue / GetStatus / Resume / Cancel / Rerun。
//! Start 先持久化一条 queued 记录，再按后端分流：对话式同步跑第一回合；工作流式派发后台任务立即返回。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationState, PromptContext, ToolCatalog, TurnOutcome, TurnRunner};
use crate::core::{DedupCache, EngineError};
use crate::execution::{
    BackendHint, CheckpointController, ContextSource, Execution, ExecutionBackend,
    ExecutionContext, ExecutionStatus, ExecutionStore, ExecutionTaskRegistry, ResumeAction,
    TaskHandle, TurnGuard,
};
use crate::llm::LlmClient;
use crate::playbook::{Playbook, PlaybookCatalog};
use crate::tools::ToolExecutor;
use crate::workflow::{WorkflowBackend, WorkflowOutcome, WorkflowRun};

/// inputs 中没有字符串 `message` 时的开场白
pub const KICKOFF_MESSAGE: &str = "Let's start. Follow the playbook instructions.";

/// 全局执行模式（auto 提示下生效）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    InProcess,
    Runner,
}

/// 路由行为参数
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub execution_mode: ExecutionMode,
    pub max_tool_rounds: usize,
    pub default_locale: String,
    pub auto_execute: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::InProcess,
            max_tool_rounds: crate::conversation::DEFAULT_MAX_TOOL_ROUNDS,
            default_locale: "en".to_string(),
            auto_execute: false,
        }
    }
}

/// 路由依赖的全部协作者
#[derive(Clone)]
pub struct RouterDeps {
    pub catalog: Arc<dyn PlaybookCatalog>,
    pub store: Arc<dyn ExecutionStore>,
    pub registry: Arc<ExecutionTaskRegistry>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolExecutor>,
    pub workflow: Arc<dyn WorkflowBackend>,
    pub context: Arc<dyn ContextSource>,
    pub dedup: Arc<DedupCache>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    pub playbook_code: String,
    pub profile_id: String,
    pub workspace_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub backend_hint: BackendHint,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl StartRequest {
    pub fn new(
        playbook_code: impl Into<String>,
        profile_id: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            playbook_code: playbook_code.into(),
            profile_id: profile_id.into(),
            workspace_id: workspace_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub backend: ExecutionBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_output: Option<String>,
    /// 首回合上游失败时的错误；执行保持 running，可继续 Continue / Cancel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinueResponse {
    pub execution_id: String,
    pub assistant_message: String,
    pub completed: bool,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub execution_id: String,
    pub playbook_code: String,
    pub backend: ExecutionBackend,
    pub status: ExecutionStatus,
    pub execution_context: ExecutionContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    pub action: ResumeAction,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RerunRequest {
    #[serde(default)]
    pub override_inputs: Map<String, Value>,
    #[serde(default)]
    pub backend_hint: BackendHint,
}

/// Resume / Cancel 的返回
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

pub struct ExecutionRouter {
    deps: RouterDeps,
    config: RouterConfig,
    controller: Arc<CheckpointController>,
    turn_guard: TurnGuard,
}

/// 后端选择：in_process 提示强制对话式；runner 提示或 auto + runner 模式，且 playbook 声明了工作流，才走工作流
pub fn resolve_backend(hint: BackendHint, mode: ExecutionMode, playbook: &Playbook) -> ExecutionBackend {
    let wants_runner = match hint {
        BackendHint::InProcess => false,
        BackendHint::Runner => true,
        BackendHint::Auto => mode == ExecutionMode::Runner,
    };
    if wants_runner && playbook.has_workflow() {
        ExecutionBackend::Runner
    } else {
        ExecutionBackend::InProcess
    }
}

impl ExecutionRouter {
    pub fn new(deps: RouterDeps, config: RouterConfig) -> Self {
        let controller = Arc::new(CheckpointController::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.registry),
        ));
        Self {
            deps,
            config,
            controller,
            turn_guard: TurnGuard::new(),
        }
    }

    pub fn controller(&self) -> &Arc<CheckpointController> {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<ExecutionTaskRegistry> {
        &self.deps.registry
    }

    async fn load(&self, execution_id: &str) -> Result<Execution, EngineError> {
        self.deps
            .store
            .get(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn playbook(&self, code: &str) -> Result<Playbook, EngineError> {
        self.deps
            .catalog
            .get(code)
            .await
            .ok_or_else(|| EngineError::PlaybookNotFound(code.to_string()))
    }

    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, EngineError> {
        self.start_inner(request, None).await
    }

    async fn start_inner(
        &self,
        request: StartRequest,
        rerun_of: Option<String>,
    ) -> Result<StartResponse, EngineError> {
        if request.playbook_code.trim().is_empty() {
            return Err(EngineError::InvalidRequest("playbook_code is required".to_string()));
        }

        if let Some(key) = &request.idempotency_key {
            if !self.deps.dedup.check_and_insert(key).await {
                return Err(EngineError::DuplicateRequest(key.clone()));
            }
        }

        let playbook = match self.playbook(&request.playbook_code).await {
            Ok(p) => p,
            Err(e) => {
                if let Some(key) = &request.idempotency_key {
                    self.deps.dedup.release(key).await;
                }
                return Err(e);
            }
        };

        let backend = resolve_backend(request.backend_hint, self.config.execution_mode, &playbook);
        let locale = request
            .locale
            .clone()
            .unwrap_or_else(|| self.config.default_locale.clone());
        let mut execution = Execution::new(
            &playbook.code,
            &request.workspace_id,
            &request.profile_id,
            backend,
            locale,
        );
        execution.project_id = request.project_id;
        execution.inputs = request.inputs;
        execution.variant = request.variant;
        execution.skip_steps = request.skip_steps;
        execution.rerun_of = rerun_of;
        self.deps.store.insert(&execution).await?;
        tracing::info!(
            execution_id = %execution.execution_id,
            playbook = %playbook.code,
            backend = ?backend,
            "execution created"
        );

        match backend {
            ExecutionBackend::InProcess => self.start_in_process(execution, &playbook).await,
            ExecutionBackend::Runner => self.start_runner(execution, &playbook).await,
        }
    }

    async fn start_in_process(
        &self,
        mut execution: Execution,
        playbook: &Playbook,
    ) -> Result<StartResponse, EngineError> {
        execution.transition(ExecutionStatus::Running)?;
        self.deps.store.update(&execution).await?;

        let opening = execution
            .inputs
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(KICKOFF_MESSAGE)
            .to_string();
        let execution_id = execution.execution_id.clone();
        let _permit = self.turn_guard.try_acquire(&execution_id)?;
        match self.run_turn(execution, playbook, &opening).await {
            Ok((outcome, status)) => Ok(StartResponse {
                execution_id,
                status,
                backend: ExecutionBackend::InProcess,
                initial_output: outcome.map(|o| o.assistant_message),
                error: None,
            }),
            // 记录已存在且已写入错误，把 id 交还调用方
            Err(e @ EngineError::Upstream(_)) => Ok(StartResponse {
                status: self.load(&execution_id).await?.status,
                execution_id,
                backend: ExecutionBackend::InProcess,
                initial_output: None,
                error: Some(e.to_string()),
            }),
            Err(e) => Err(e),
        }
    }

    async fn start_runner(
        &self,
        mut execution: Execution,
        playbook: &Playbook,
    ) -> Result<StartResponse, EngineError> {
        // 令牌在状态变为 running 之前登记，锁内完成，Cancel 必能找到它
        let token = {
            let _guard = self.controller.locks().lock(&execution.execution_id).await;
            execution.transition(ExecutionStatus::Running)?;
            let token = CancellationToken::new();
            self.deps
                .registry
                .register(execution.execution_id.clone(), TaskHandle::new(token.clone()))
                .await;
            if let Err(e) = self.deps.store.update(&execution).await {
                self.deps.registry.unregister(&execution.execution_id).await;
                return Err(e);
            }
            token
        };

        let run = WorkflowRun {
            execution_id: execution.execution_id.clone(),
            workflow: playbook.workflow.clone().unwrap_or_default(),
            inputs: execution.inputs.clone(),
            step_outputs: Map::new(),
            gate_decisions: Default::default(),
        };
        self.dispatch_workflow(run, token).await;

        Ok(StartResponse {
            execution_id: execution.execution_id,
            status: ExecutionStatus::Running,
            backend: ExecutionBackend::Runner,
            initial_output: None,
            error: None,
        })
    }

    /// 派发后台工作流任务
    ///
    /// `token` 须已在注册表中登记（状态翻成 running 时同锁内完成）；这里只补上 abort 句柄。
    /// 令牌已被取消时，工作流在第一个步骤前即退出。结束时先注销再写回结果。
    async fn dispatch_workflow(&self, run: WorkflowRun, token: CancellationToken) {
        let execution_id = run.execution_id.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let workflow = Arc::clone(&self.deps.workflow);
        let controller = Arc::clone(&self.controller);
        let registry = Arc::clone(&self.deps.registry);
        let run_token = token.child_token();
        let id = execution_id.clone();

        let handle = tokio::spawn(async move {
            let _ = ready_rx.await;
            let outcome = workflow.run(run, run_token).await;
            registry.unregister(&id).await;
            if let Err(e) = controller.apply_workflow_outcome(&id, outcome).await {
                tracing::error!(execution_id = %id, error = %e, "failed to record workflow outcome");
            }
        });

        self.deps
            .registry
            .attach_abort(&execution_id, handle.abort_handle())
            .await;
        let _ = ready_tx.send(());
        tracing::info!(execution_id = %execution_id, "workflow run dispatched");
    }

    /// 跑一回合并在执行锁内写回；执行已离开 running 时不写回
    async fn run_turn(
        &self,
        execution: Execution,
        playbook: &Playbook,
        message: &str,
    ) -> Result<(Option<TurnOutcome>, ExecutionStatus), EngineError> {
        let execution_id = execution.execution_id.clone();
        let ctx = self.prompt_context(playbook, &execution).await;
        let mut state = execution.conversation_state();

        let token = CancellationToken::new();
        self.deps
            .registry
            .register(execution_id.clone(), TaskHandle::new(token.clone()))
            .await;

        let result = TurnRunner::new(
            self.deps.llm.as_ref(),
            self.deps.tools.as_ref(),
            self.deps.tools.as_ref(),
        )
        .with_max_tool_rounds(self.config.max_tool_rounds)
        .run(&mut state, &ctx, message, &token)
        .await;

        self.deps.registry.unregister(&execution_id).await;
        self.finish_turn(&execution_id, &state, result).await
    }

    async fn finish_turn(
        &self,
        execution_id: &str,
        state: &ConversationState,
        result: Result<TurnOutcome, EngineError>,
    ) -> Result<(Option<TurnOutcome>, ExecutionStatus), EngineError> {
        let _guard = self.controller.locks().lock(execution_id).await;
        let mut current = self.load(execution_id).await?;

        if current.status != ExecutionStatus::Running {
            tracing::info!(
                execution_id = %execution_id,
                status = %current.status,
                "execution left running during turn; result not recorded"
            );
            return match result {
                Ok(outcome) => Ok((Some(outcome), current.status)),
                Err(EngineError::Cancelled) => Ok((None, current.status)),
                Err(e) => Err(e),
            };
        }

        current.store_conversation(state);
        match result {
            Ok(outcome) => {
                current.error = None;
                if let Some(output) = &outcome.structured_output {
                    current.absorb_structured_output(output);
                    current.transition(ExecutionStatus::Completed)?;
                }
                self.deps.store.update(&current).await?;
                Ok((Some(outcome), current.status))
            }
            Err(e) => {
                current.error = Some(e.to_string());
                self.deps.store.update(&current).await?;
                tracing::warn!(execution_id = %execution_id, error = %e, "turn failed");
                Err(e)
            }
        }
    }

    async fn prompt_context(&self, playbook: &Playbook, execution: &Execution) -> PromptContext {
        let profile = self.deps.context.profile(&execution.profile_id).await;
        let tools = if playbook.tool_slots.is_empty() {
            ToolCatalog::Flat(self.deps.tools.descriptors())
        } else {
            ToolCatalog::Slots {
                slots: playbook.tool_slots.clone(),
                bindings: self.deps.context.tool_bindings(&execution.workspace_id).await,
                policy: playbook.tool_policy.clone(),
            }
        };
        let auto_execute = execution
            .inputs
            .get("auto_execute")
            .and_then(Value::as_bool)
            .unwrap_or(self.config.auto_execute);
        PromptContext {
            playbook: playbook.clone(),
            profile,
            tools,
            auto_execute,
        }
    }

    pub async fn continue_execution(
        &self,
        execution_id: &str,
        user_message: &str,
    ) -> Result<ContinueResponse, EngineError> {
        let execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: execution.status,
                to: ExecutionStatus::Running,
            });
        }
        if execution.backend != ExecutionBackend::InProcess {
            return Err(EngineError::InvalidState {
                execution_id: execution_id.to_string(),
                operation: "continue",
                status: execution.status,
            });
        }

        let _permit = self.turn_guard.try_acquire(execution_id)?;
        // 拿到许可后重读，确保拿到上一回合写回的历史
        let execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidTransition {
                execution_id: execution_id.to_string(),
                from: execution.status,
                to: ExecutionStatus::Running,
            });
        }
        let playbook = self.playbook(&execution.playbook_code).await?;

        let (outcome, status) = self.run_turn(execution, &playbook, user_message).await?;
        match outcome {
            Some(outcome) => Ok(ContinueResponse {
                execution_id: execution_id.to_string(),
                completed: status == ExecutionStatus::Completed,
                structured_output: outcome.structured_output,
                assistant_message: outcome.assistant_message,
                status,
            }),
            None => Err(EngineError::Cancelled),
        }
    }

    pub async fn get_status(&self, execution_id: &str) -> Result<StatusResponse, EngineError> {
        let execution = self.load(execution_id).await?;
        Ok(StatusResponse {
            execution_id: execution.execution_id.clone(),
            playbook_code: execution.playbook_code.clone(),
            backend: execution.backend,
            status: execution.status,
            execution_context: execution.context(),
        })
    }

    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<StatusResponse>, EngineError> {
        Ok(self
            .deps
            .store
            .list(status)
            .await?
            .into_iter()
            .map(|e| StatusResponse {
                execution_id: e.execution_id.clone(),
                playbook_code: e.playbook_code.clone(),
                backend: e.backend,
                status: e.status,
                execution_context: e.context(),
            })
            .collect())
    }

    pub async fn resume(
        &self,
        execution_id: &str,
        request: ResumeRequest,
    ) -> Result<StatusChange, EngineError> {
        let outcome = self
            .controller
            .resume(
                execution_id,
                request.action,
                request.step_id.as_deref(),
                request.comment,
            )
            .await?;
        let execution = outcome.execution;

        if let (Some(checkpoint), Some(token)) = (outcome.checkpoint, outcome.run_token) {
            let playbook = match self.playbook(&execution.playbook_code).await {
                Ok(p) => p,
                Err(e) => {
                    self.deps.registry.unregister(execution_id).await;
                    let failed = WorkflowOutcome::Failed {
                        step_id: None,
                        error: e.to_string(),
                        step_outputs: execution.step_outputs.clone(),
                    };
                    self.controller.apply_workflow_outcome(execution_id, failed).await?;
                    return Err(e);
                }
            };
            let run = WorkflowRun {
                execution_id: execution.execution_id.clone(),
                workflow: playbook.workflow.unwrap_or_default(),
                inputs: execution.inputs.clone(),
                step_outputs: execution.step_outputs.clone(),
                gate_decisions: checkpoint.gate_decisions,
            };
            self.dispatch_workflow(run, token).await;
        }

        Ok(StatusChange {
            execution_id: execution.execution_id,
            status: execution.status,
        })
    }

    pub async fn cancel(
        &self,
        execution_id: &str,
        reason: Option<String>,
    ) -> Result<StatusChange, EngineError> {
        let status = self.controller.cancel(execution_id, reason).await?;
        Ok(StatusChange {
            execution_id: execution_id.to_string(),
            status,
        })
    }

    /// 以原执行的输入为底合并覆盖项，校验必填输入后用新 id 重新 Start；原执行不动
    pub async fn rerun(
        &self,
        execution_id: &str,
        request: RerunRequest,
    ) -> Result<StartResponse, EngineError> {
        let prior = self.load(execution_id).await?;
        let playbook = self.playbook(&prior.playbook_code).await?;

        let mut inputs = prior.inputs.clone();
        for (k, v) in request.override_inputs {
            inputs.insert(k, v);
        }
        for required in &playbook.required_inputs {
            let present = inputs.get(required).is_some_and(|v| !v.is_null());
            if !present {
                return Err(EngineError::MissingRequiredOverride {
                    playbook_code: playbook.code.clone(),
                    input: required.clone(),
                });
            }
        }

        let start = StartRequest {
            playbook_code: prior.playbook_code.clone(),
            profile_id: prior.profile_id.clone(),
            workspace_id: prior.workspace_id.clone(),
            project_id: prior.project_id.clone(),
            inputs,
            backend_hint: request.backend_hint,
            locale: Some(prior.locale.clone()),
            variant: prior.variant.clone(),
            skip_steps: prior.skip_steps.clone(),
            idempotency_key: None,
        };
        tracing::info!(execution_id = %execution_id, "rerun requested");
        self.start_inner(start, Some(prior.execution_id)).await
    }
}
