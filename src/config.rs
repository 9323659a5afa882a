//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLAYBOOK__*` 覆盖（双下划线表示嵌套，如 `PLAYBOOK__ENGINE__EXECUTION_MODE=runner`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::execution::ExecutionMode;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
    pub playbooks: PlaybooksSection,
    pub server: ServerSection,
}

/// [engine] 段：执行模式、回合上限、默认语言
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// auto 提示下的后端：in_process / runner
    pub execution_mode: ExecutionMode,
    /// 单回合最多的工具往返次数
    pub max_tool_rounds: usize,
    pub default_locale: String,
    /// 自动执行：prompt 中要求 LLM 不再确认
    pub auto_execute: bool,
    /// 幂等键保留时间（秒）
    pub dedup_ttl_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::InProcess,
            max_tool_rounds: crate::conversation::DEFAULT_MAX_TOOL_ROUNDS,
            default_locale: "en".to_string(),
            auto_execute: false,
            dedup_ttl_secs: crate::core::dedup::DEFAULT_DEDUP_TTL_SECS,
        }
    }
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

/// [tools] 段：文件系统根、工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 沙箱根目录，未设置时用 ./workspace
    pub filesystem_root: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            filesystem_root: None,
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [storage] 段：执行记录存储
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// memory / sqlite
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/executions.db")
}

/// [playbooks] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlaybooksSection {
    /// playbook 目录，未设置时查找 config/playbooks
    pub dir: Option<PathBuf>,
}

/// [server] 段（playbook-server）
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// 从 config 目录加载配置，环境变量 PLAYBOOK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLAYBOOK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLAYBOOK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.execution_mode, ExecutionMode::InProcess);
        assert_eq!(cfg.engine.dedup_ttl_secs, 120);
        assert_eq!(cfg.storage.backend, "memory");
        assert_eq!(cfg.llm.retry.max_retries, 2);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "[engine]\nexecution_mode = \"runner\"\nmax_tool_rounds = 3\n\n[storage]\nbackend = \"sqlite\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.execution_mode, ExecutionMode::Runner);
        assert_eq!(cfg.engine.max_tool_rounds, 3);
        assert_eq!(cfg.engine.default_locale, "en");
        assert_eq!(cfg.storage.backend, "sqlite");
    }
}
