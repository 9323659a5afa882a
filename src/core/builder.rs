//! 引擎构建器：统一的引擎初始化逻辑
//!
//! CLI 与 HTTP 服务共用同一套装配：LLM 后端、工具注册表、执行存储、playbook 目录。
//! 各协作者均可通过 with_* 覆盖，测试中常用来注入脚本化 LLM 与内存目录。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::DedupCache;
use crate::execution::{
    ContextSource, ExecutionRouter, ExecutionStore, ExecutionTaskRegistry, InMemoryExecutionStore,
    RouterConfig, RouterDeps, SqliteExecutionStore, StaticContextSource,
};
use crate::llm::{LlmClient, OpenAiClient, RetryConfig, RetryingLlmClient, ScriptedLlmClient};
use crate::playbook::{InMemoryPlaybookCatalog, PlaybookCatalog, PlaybookLoader};
use crate::tools::{builtin_registry, ToolExecutor, ToolInvoker, ToolRegistry};
use crate::workflow::{LocalWorkflowEngine, WorkflowBackend};

/// 引擎构建器：按配置装配 ExecutionRouter 的全部依赖
pub struct EngineBuilder {
    config: AppConfig,
    workspace: Option<PathBuf>,
    llm: Option<Arc<dyn LlmClient>>,
    catalog: Option<Arc<dyn PlaybookCatalog>>,
    store: Option<Arc<dyn ExecutionStore>>,
    context: Option<Arc<dyn ContextSource>>,
    tools: Option<ToolRegistry>,
    workflow: Option<Arc<dyn WorkflowBackend>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            workspace: None,
            llm: None,
            catalog: None,
            store: None,
            context: None,
            tools: None,
            workflow: None,
        }
    }

    /// 覆盖文件工具的沙箱根目录
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定 playbook 目录；设置后不再从磁盘加载
    pub fn with_catalog(mut self, catalog: Arc<dyn PlaybookCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowBackend>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    fn workspace(&self) -> PathBuf {
        self.workspace
            .clone()
            .or_else(|| self.config.tools.filesystem_root.clone())
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    /// 构建工具注册表：未显式指定时使用内置文件工具 + echo
    pub fn build_tool_registry(&self) -> ToolRegistry {
        match &self.tools {
            Some(tools) => tools.clone(),
            None => builtin_registry(self.workspace()),
        }
    }

    /// 按 [llm] 段创建客户端；openai 后端包一层重试
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        if let Some(llm) = &self.llm {
            return Arc::clone(llm);
        }
        let cfg = &self.config.llm;
        match cfg.provider.to_lowercase().as_str() {
            "mock" => {
                tracing::warn!("Using scripted mock LLM");
                Arc::new(ScriptedLlmClient::new())
            }
            provider => {
                if provider != "openai" {
                    tracing::warn!(provider = %provider, "Unknown LLM provider, treating as OpenAI-compatible");
                }
                tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
                let inner: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
                    cfg.base_url.as_deref(),
                    &cfg.model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                    Duration::from_secs(cfg.timeouts.request),
                ));
                let retry = RetryConfig {
                    max_retries: cfg.retry.max_retries,
                    base_delay: Duration::from_millis(cfg.retry.base_delay_ms),
                    ..RetryConfig::default()
                };
                Arc::new(RetryingLlmClient::new(inner, retry))
            }
        }
    }

    /// 按 [storage] 段打开执行存储
    pub fn build_store(&self) -> anyhow::Result<Arc<dyn ExecutionStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let storage = &self.config.storage;
        match storage.backend.to_lowercase().as_str() {
            "sqlite" => {
                if let Some(parent) = storage.sqlite_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                tracing::info!(path = %storage.sqlite_path.display(), "Using SQLite execution store");
                Ok(Arc::new(SqliteExecutionStore::open(&storage.sqlite_path)?))
            }
            "memory" => Ok(Arc::new(InMemoryExecutionStore::new())),
            other => anyhow::bail!("unknown storage backend: {other}"),
        }
    }

    async fn build_catalog(&self) -> anyhow::Result<Arc<dyn PlaybookCatalog>> {
        if let Some(catalog) = &self.catalog {
            return Ok(Arc::clone(catalog));
        }
        let loader = match &self.config.playbooks.dir {
            Some(dir) => PlaybookLoader::new(dir),
            None => PlaybookLoader::from_default(),
        };
        let catalog = InMemoryPlaybookCatalog::new();
        let loaded = loader.load_into(&catalog).await?;
        tracing::info!(count = loaded, "Playbooks loaded");
        Ok(Arc::new(catalog))
    }

    fn router_config(&self) -> RouterConfig {
        let engine = &self.config.engine;
        RouterConfig {
            execution_mode: engine.execution_mode,
            max_tool_rounds: engine.max_tool_rounds,
            default_locale: engine.default_locale.clone(),
            auto_execute: engine.auto_execute,
        }
    }

    /// 装配全部组件，返回可直接使用的路由
    pub async fn build(self) -> anyhow::Result<ExecutionRouter> {
        let llm = self.build_llm();
        let tools = Arc::new(ToolExecutor::new(
            self.build_tool_registry(),
            self.config.tools.tool_timeout_secs,
        ));
        let store = self.build_store()?;
        let catalog = self.build_catalog().await?;
        let workflow: Arc<dyn WorkflowBackend> = match &self.workflow {
            Some(w) => Arc::clone(w),
            None => {
                let invoker: Arc<dyn ToolInvoker> = tools.clone();
                Arc::new(LocalWorkflowEngine::new(invoker, Arc::clone(&llm)))
            }
        };
        let context: Arc<dyn ContextSource> = match &self.context {
            Some(context) => Arc::clone(context),
            None => Arc::new(StaticContextSource::new()),
        };

        let deps = RouterDeps {
            catalog,
            store,
            registry: Arc::new(ExecutionTaskRegistry::new()),
            llm,
            tools,
            workflow,
            context,
            dedup: Arc::new(DedupCache::new(Duration::from_secs(
                self.config.engine.dedup_ttl_secs,
            ))),
        };
        Ok(ExecutionRouter::new(deps, self.router_config()))
    }
}
