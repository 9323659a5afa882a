//! 执行流程集成测试：对话式与工作流式两条路径、闸门续跑、取消、重跑

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use playbook_engine::config::AppConfig;
use playbook_engine::conversation::{Message, Role};
use playbook_engine::core::{EngineBuilder, EngineError};
use playbook_engine::execution::{
    BackendHint, Execution, ExecutionBackend, ExecutionRouter, ExecutionStatus, ExecutionStore,
    InMemoryExecutionStore, RerunRequest, ResumeAction, ResumeRequest, StartRequest,
    StaticContextSource, StatusResponse,
};
use playbook_engine::llm::{LlmClient, LlmError, ScriptedLlmClient};
use playbook_engine::playbook::{parse_playbook, InMemoryPlaybookCatalog, Playbook, PlaybookCatalog};
use playbook_engine::tools::{builtin_registry, Tool, ToolRegistry};

const BRIEF: &str = r#"
    [playbook]
    code = "brief"
    name = "Brief"
    instructions = "Read the notes and summarise them."
    required_inputs = ["target"]
"#;

const SLOTTED: &str = r#"
    [playbook]
    code = "slotted"
    name = "Slotted"
    instructions = "Use the reader slot."

    [[playbook.tool_slots]]
    slot = "docs.reader"
    description = "Reads a document"

    [[playbook.tool_slots]]
    slot = "crm.lookup"
    description = "Unbound on purpose"
"#;

const GATED: &str = r#"
    [playbook]
    code = "gated"
    name = "Gated"
    instructions = "Collect, review, publish."

    [[workflow.steps]]
    id = "S1"
    type = "tool"
    tool = "echo"
    parameters = { text = "collected {{ inputs.target }}" }

    [[workflow.steps]]
    id = "S3"
    type = "gate"
    depends_on = ["S1"]

    [[workflow.steps]]
    id = "S4"
    type = "tool"
    tool = "echo"
    parameters = { text = "published {{ steps.S1 }}" }
    depends_on = ["S3"]
"#;

const STALLED: &str = r#"
    [playbook]
    code = "stalled"
    name = "Stalled"
    instructions = "Wait."

    [[workflow.steps]]
    id = "wait"
    type = "tool"
    tool = "sleep"
"#;

const COUNTED: &str = r#"
    [playbook]
    code = "counted"
    name = "Counted"
    instructions = "Prepare, review, then act."

    [[workflow.steps]]
    id = "S1"
    type = "tool"
    tool = "echo"
    parameters = { text = "prepared" }

    [[workflow.steps]]
    id = "S3"
    type = "gate"
    depends_on = ["S1"]

    [[workflow.steps]]
    id = "S4"
    type = "tool"
    tool = "count"
    depends_on = ["S3"]
"#;

/// 长时间不返回的工具，用来观察取消
struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleeps for a long time."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("woke".to_string())
    }
}

/// 记录被调用次数
struct CountTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountTool {
    fn name(&self) -> &str {
        "count"
    }

    fn description(&self) -> &str {
        "Counts its invocations."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n.to_string())
    }
}

/// 查找前先等一段时间的目录
struct SlowCatalog {
    inner: InMemoryPlaybookCatalog,
    delay: Duration,
}

#[async_trait]
impl PlaybookCatalog for SlowCatalog {
    async fn get(&self, code: &str) -> Option<Playbook> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(code).await
    }

    async fn codes(&self) -> Vec<String> {
        self.inner.codes().await
    }
}

/// 每次补全前先等一段时间
struct SlowLlm {
    delay: Duration,
}

#[async_trait]
impl LlmClient for SlowLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok("still thinking".to_string())
    }
}

struct Harness {
    router: Arc<ExecutionRouter>,
    store: Arc<InMemoryExecutionStore>,
    llm: Arc<ScriptedLlmClient>,
    tool_calls: Arc<AtomicUsize>,
    dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let llm = Arc::new(ScriptedLlmClient::new());
        Self::with_llm(llm.clone(), llm).await
    }

    async fn with_llm(llm: Arc<dyn LlmClient>, scripted: Arc<ScriptedLlmClient>) -> Self {
        Self::build(llm, scripted, None).await
    }

    /// 目录每次查找都延迟 `delay`
    async fn with_slow_catalog(delay: Duration) -> Self {
        let llm = Arc::new(ScriptedLlmClient::new());
        Self::build(llm.clone(), llm, Some(delay)).await
    }

    async fn build(
        llm: Arc<dyn LlmClient>,
        scripted: Arc<ScriptedLlmClient>,
        catalog_delay: Option<Duration>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello from a").unwrap();

        let tool_calls = Arc::new(AtomicUsize::new(0));
        let mut tools: ToolRegistry = builtin_registry(dir.path());
        tools.register(SleepTool);
        tools.register(CountTool {
            calls: tool_calls.clone(),
        });

        let playbooks = InMemoryPlaybookCatalog::with_playbooks(
            [BRIEF, SLOTTED, GATED, STALLED, COUNTED]
                .into_iter()
                .map(|s| parse_playbook(s).unwrap())
                .chain([Playbook::new("plain", "Plain", "Just chat.")]),
        );
        let catalog: Arc<dyn PlaybookCatalog> = match catalog_delay {
            Some(delay) => Arc::new(SlowCatalog {
                inner: playbooks,
                delay,
            }),
            None => Arc::new(playbooks),
        };
        let mut bindings = BTreeMap::new();
        bindings.insert("docs.reader".to_string(), "fs_read".to_string());
        let context = Arc::new(StaticContextSource::new().with_workspace_bindings("w1", bindings));
        let store = Arc::new(InMemoryExecutionStore::new());

        let router = EngineBuilder::new(AppConfig::default())
            .with_workspace(dir.path())
            .with_llm(llm)
            .with_catalog(catalog)
            .with_store(store.clone())
            .with_context(context)
            .with_tools(tools)
            .build()
            .await
            .unwrap();

        Self {
            router: Arc::new(router),
            store,
            llm: scripted,
            tool_calls,
            dir,
        }
    }

    async fn record(&self, id: &str) -> Execution {
        self.store.get(id).await.unwrap().unwrap()
    }

    async fn wait_for(&self, id: &str, status: ExecutionStatus) -> StatusResponse {
        for _ in 0..300 {
            let current = self.router.get_status(id).await.unwrap();
            if current.status == status {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {id} never reached {status}");
    }
}

fn start_request(code: &str) -> StartRequest {
    StartRequest::new(code, "u1", "w1")
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn last_system(record: &Execution) -> String {
    record
        .conversation_history
        .iter()
        .rev()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_in_process_turn_runs_fenced_tool_call_and_completes() {
    let h = Harness::new().await;
    h.llm.push_response(
        "Reading it.\n```json\n{\"tool_call\":{\"tool_name\":\"fs_read\",\"parameters\":{\"path\":\"a.txt\"}}}\n```",
    );
    h.llm
        .push_response(r#"{"structured_output": {"summary": "a.txt greets"}}"#);

    let mut request = start_request("brief");
    request.backend_hint = BackendHint::InProcess;
    request.inputs = inputs(json!({"target": "a"}));
    let started = h.router.start(request).await.unwrap();

    assert_eq!(started.backend, ExecutionBackend::InProcess);
    assert_eq!(started.status, ExecutionStatus::Completed);

    let record = h.record(&started.execution_id).await;
    assert!(last_system(&record).contains("hello from a"));
    assert_eq!(record.extracted_data.get("summary"), Some(&json!("a.txt greets")));
    assert!(record.completed_at.is_some());
    assert_eq!(h.llm.call_count(), 2);
}

#[tokio::test]
async fn test_call_syntax_fallback_reaches_tool() {
    let h = Harness::new().await;
    h.llm.push_response("fs_read('a.txt')");
    h.llm.push_response("Done reading.");

    let started = h.router.start(start_request("plain")).await.unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.initial_output.as_deref(), Some("Done reading."));

    let record = h.record(&started.execution_id).await;
    assert!(last_system(&record).contains("hello from a"));
}

#[tokio::test]
async fn test_continue_appends_to_history_until_completed() {
    let h = Harness::new().await;
    h.llm.push_response("What should I focus on?");
    h.llm.push_response("STRUCTURED_OUTPUT: {\"outputs\": {\"focus\": \"tone\"}}");

    let started = h.router.start(start_request("plain")).await.unwrap();
    let id = started.execution_id;
    let before = h.record(&id).await.conversation_history.len();

    let reply = h.router.continue_execution(&id, "Focus on tone").await.unwrap();
    assert!(reply.completed);
    assert_eq!(reply.status, ExecutionStatus::Completed);
    assert!(reply.structured_output.is_some());

    let record = h.record(&id).await;
    assert_eq!(record.conversation_history.len(), before + 2);
    assert!(record
        .conversation_history
        .iter()
        .any(|m| m.role == Role::User && m.content == "Focus on tone"));

    let err = h.router.continue_execution(&id, "again").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_slot_bindings_resolve_per_workspace() {
    let h = Harness::new().await;
    h.llm.push_response(
        r#"{"tool_call": {"tool_slot": "docs.reader", "parameters": {"path": "a.txt"}}}"#,
    );
    h.llm.push_response(r#"{"tool_call": {"tool_slot": "crm.lookup", "parameters": {}}}"#);
    h.llm.push_response("Finished.");

    let started = h.router.start(start_request("slotted")).await.unwrap();
    let record = h.record(&started.execution_id).await;
    let system: Vec<&str> = record
        .conversation_history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(system.len(), 2);
    assert!(system[0].contains("hello from a"));
    assert!(system[1].contains("not bound"));
}

#[tokio::test]
async fn test_upstream_failure_on_first_turn_keeps_record() {
    let h = Harness::new().await;
    h.llm.push_error(LlmError::Network("connection refused".into()));

    let started = h.router.start(start_request("plain")).await.unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);
    assert!(started.initial_output.is_none());
    assert!(started.error.as_deref().unwrap_or_default().contains("connection refused"));

    // 返回的 id 可直接用于后续操作
    let status = h.router.get_status(&started.execution_id).await.unwrap();
    assert_eq!(status.status, ExecutionStatus::Running);
    let record = h.record(&started.execution_id).await;
    assert!(record.error.as_deref().unwrap_or_default().contains("connection refused"));
    assert_eq!(h.store.list(None).await.unwrap().len(), 1);

    let changed = h.router.cancel(&started.execution_id, None).await.unwrap();
    assert_eq!(changed.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_upstream_failure_on_first_turn_can_be_continued() {
    let h = Harness::new().await;
    h.llm.push_error(LlmError::Network("connection refused".into()));
    let started = h.router.start(start_request("plain")).await.unwrap();
    assert!(started.error.is_some());

    h.llm.push_response("Back online.");
    let reply = h
        .router
        .continue_execution(&started.execution_id, "hello again")
        .await
        .unwrap();
    assert_eq!(reply.assistant_message, "Back online.");
    assert!(h.record(&started.execution_id).await.error.is_none());
}

#[tokio::test]
async fn test_unknown_playbook_and_duplicate_requests() {
    let h = Harness::new().await;

    let mut missing = start_request("nope");
    missing.idempotency_key = Some("k1".into());
    let err = h.router.start(missing).await.unwrap_err();
    assert!(matches!(err, EngineError::PlaybookNotFound(_)));
    assert!(h.store.list(None).await.unwrap().is_empty());

    // 目录里找不到时幂等键被释放
    let mut first = start_request("plain");
    first.idempotency_key = Some("k1".into());
    h.router.start(first.clone()).await.unwrap();

    let err = h.router.start(first).await.unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRequest(_)));
}

#[tokio::test]
async fn test_concurrent_continue_is_rejected_and_cancel_discards_turn() {
    let scripted = Arc::new(ScriptedLlmClient::new());
    let slow = Arc::new(SlowLlm {
        delay: Duration::from_millis(300),
    });
    let h = Harness::with_llm(slow, scripted).await;

    let started = h.router.start(start_request("plain")).await.unwrap();
    let id = started.execution_id.clone();
    let history_before = h.record(&id).await.conversation_history.len();

    let router = Arc::clone(&h.router);
    let turn_id = id.clone();
    let in_flight = tokio::spawn(async move { router.continue_execution(&turn_id, "first").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h.router.continue_execution(&id, "second").await.unwrap_err();
    assert!(matches!(err, EngineError::TurnInProgress(_)));

    let changed = h.router.cancel(&id, Some("user stop".into())).await.unwrap();
    assert_eq!(changed.status, ExecutionStatus::Cancelled);

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));

    let record = h.record(&id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.cancel_reason.as_deref(), Some("user stop"));
    assert_eq!(record.conversation_history.len(), history_before);
}

#[tokio::test]
async fn test_runner_pauses_at_gate_and_reject_fails() {
    let h = Harness::new().await;
    let mut request = start_request("gated");
    request.backend_hint = BackendHint::Runner;
    request.inputs = inputs(json!({"target": "docs"}));
    let started = h.router.start(request).await.unwrap();
    assert_eq!(started.backend, ExecutionBackend::Runner);
    assert!(started.initial_output.is_none());

    let paused = h.wait_for(&started.execution_id, ExecutionStatus::Paused).await;
    let checkpoint = paused.execution_context.checkpoint.unwrap();
    assert_eq!(checkpoint.paused_step_id, "S3");
    let outputs = paused.execution_context.step_outputs.unwrap();
    assert!(outputs.contains_key("S1"));
    assert!(!outputs.contains_key("S4"));

    let history_before = h.record(&started.execution_id).await.conversation_history;

    let err = h
        .router
        .resume(
            &started.execution_id,
            ResumeRequest {
                action: ResumeAction::Approve,
                step_id: Some("S4".into()),
                comment: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GateMismatch { .. }));

    let changed = h
        .router
        .resume(
            &started.execution_id,
            ResumeRequest {
                action: ResumeAction::Reject,
                step_id: Some("S3".into()),
                comment: Some("not ready".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(changed.status, ExecutionStatus::Failed);

    let record = h.record(&started.execution_id).await;
    assert_eq!(record.error.as_deref(), Some("not ready"));
    assert_eq!(record.conversation_history, history_before);
    assert!(record.checkpoint.is_none());
}

#[tokio::test]
async fn test_runner_approve_resumes_after_gate() {
    let h = Harness::new().await;
    let mut request = start_request("gated");
    request.backend_hint = BackendHint::Runner;
    request.inputs = inputs(json!({"target": "docs"}));
    let id = h.router.start(request).await.unwrap().execution_id;
    h.wait_for(&id, ExecutionStatus::Paused).await;

    let changed = h
        .router
        .resume(
            &id,
            ResumeRequest {
                action: ResumeAction::Approve,
                step_id: None,
                comment: Some("ship it".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(changed.status, ExecutionStatus::Running);

    let done = h.wait_for(&id, ExecutionStatus::Completed).await;
    let outputs = done.execution_context.step_outputs.unwrap();
    assert_eq!(outputs.get("S1"), Some(&json!("collected docs")));
    assert_eq!(outputs.get("S4"), Some(&json!("published collected docs")));
    let decisions = done.execution_context.gate_decisions.unwrap();
    assert_eq!(decisions["S3"].comment.as_deref(), Some("ship it"));
}

#[tokio::test]
async fn test_cancel_running_workflow_signals_task() {
    let h = Harness::new().await;
    let mut request = start_request("stalled");
    request.backend_hint = BackendHint::Runner;
    let id = h.router.start(request).await.unwrap().execution_id;

    for _ in 0..100 {
        if h.router.registry().has(&id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let changed = h.router.cancel(&id, None).await.unwrap();
    assert_eq!(changed.status, ExecutionStatus::Cancelled);

    for _ in 0..100 {
        if !h.router.registry().has(&id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.router.registry().has(&id).await);
    let record = h.record(&id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(record.cancelled_at.is_some());
}

#[tokio::test]
async fn test_cancel_right_after_approve_skips_remaining_steps() {
    let h = Arc::new(Harness::with_slow_catalog(Duration::from_millis(200)).await);
    let mut request = start_request("counted");
    request.backend_hint = BackendHint::Runner;
    let id = h.router.start(request).await.unwrap().execution_id;
    h.wait_for(&id, ExecutionStatus::Paused).await;

    // approve 已落库、续跑任务还在等目录时到达的 Cancel
    let resume = tokio::spawn({
        let h = h.clone();
        let id = id.clone();
        async move {
            h.router
                .resume(
                    &id,
                    ResumeRequest {
                        action: ResumeAction::Approve,
                        step_id: Some("S3".into()),
                        comment: None,
                    },
                )
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let changed = h.router.cancel(&id, Some("changed my mind".into())).await.unwrap();
    assert_eq!(changed.status, ExecutionStatus::Cancelled);

    resume.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.tool_calls.load(Ordering::SeqCst), 0);
    let record = h.record(&id).await;
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert!(!record.step_outputs.contains_key("S4"));
    assert!(!h.router.registry().has(&id).await);
}

#[tokio::test]
async fn test_cancel_on_completed_is_noop() {
    let h = Harness::new().await;
    h.llm.push_response(r#"{"final_output": {"ok": true}}"#);
    let id = h.router.start(start_request("plain")).await.unwrap().execution_id;
    let before = h.record(&id).await;
    assert_eq!(before.status, ExecutionStatus::Completed);

    let changed = h.router.cancel(&id, Some("late".into())).await.unwrap();
    assert_eq!(changed.status, ExecutionStatus::Completed);

    let after = h.record(&id).await;
    assert_eq!(after.status, ExecutionStatus::Completed);
    assert_eq!(after.completed_at, before.completed_at);
    assert!(after.cancelled_at.is_none());
    assert!(after.cancel_reason.is_none());
}

#[tokio::test]
async fn test_rerun_with_overrides_creates_new_execution() {
    let h = Harness::new().await;
    h.llm.push_response("first run");
    h.llm.push_response("second run");

    let mut request = start_request("brief");
    request.inputs = inputs(json!({"target": "a", "tone": "dry"}));
    let original = h.router.start(request).await.unwrap().execution_id;
    let original_before = h.record(&original).await;

    let rerun = h
        .router
        .rerun(
            &original,
            RerunRequest {
                override_inputs: inputs(json!({"target": "x"})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(rerun.execution_id, original);

    let fresh = h.record(&rerun.execution_id).await;
    assert_eq!(fresh.rerun_of.as_deref(), Some(original.as_str()));
    assert_eq!(fresh.inputs.get("target"), Some(&json!("x")));
    assert_eq!(fresh.inputs.get("tone"), Some(&json!("dry")));

    let original_after = h.record(&original).await;
    assert_eq!(original_after.inputs, original_before.inputs);
    assert_eq!(original_after.updated_at, original_before.updated_at);
}

#[tokio::test]
async fn test_rerun_requires_required_inputs() {
    let h = Harness::new().await;
    h.llm.push_response("started without a target");
    let id = h.router.start(start_request("brief")).await.unwrap().execution_id;

    let err = h.router.rerun(&id, RerunRequest::default()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::MissingRequiredOverride { ref input, .. } if input == "target"
    ));

    let err = h
        .router
        .rerun(
            &id,
            RerunRequest {
                override_inputs: inputs(json!({"target": null})),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingRequiredOverride { .. }));
}

#[tokio::test]
async fn test_status_of_unknown_execution() {
    let h = Harness::new().await;
    let err = h.router.get_status("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    assert!(h.dir.path().join("a.txt").exists());
}
