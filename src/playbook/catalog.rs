//! Playbook 目录
//!
//! 引擎只通过 PlaybookCatalog 按 code 查找；PlaybookLoader 从 config/playbooks/*.toml 加载到内存目录。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::playbook::Playbook;
use crate::workflow::WorkflowSpec;

/// 按 code 解析 playbook
#[async_trait]
pub trait PlaybookCatalog: Send + Sync {
    async fn get(&self, code: &str) -> Option<Playbook>;

    async fn codes(&self) -> Vec<String>;
}

/// 内存目录
#[derive(Default)]
pub struct InMemoryPlaybookCatalog {
    playbooks: RwLock<HashMap<String, Playbook>>,
}

impl InMemoryPlaybookCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playbooks(playbooks: impl IntoIterator<Item = Playbook>) -> Self {
        let map = playbooks
            .into_iter()
            .map(|p| (p.code.clone(), p))
            .collect();
        Self {
            playbooks: RwLock::new(map),
        }
    }

    pub async fn insert(&self, playbook: Playbook) {
        self.playbooks
            .write()
            .await
            .insert(playbook.code.clone(), playbook);
    }

    pub async fn len(&self) -> usize {
        self.playbooks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.playbooks.read().await.is_empty()
    }
}

#[async_trait]
impl PlaybookCatalog for InMemoryPlaybookCatalog {
    async fn get(&self, code: &str) -> Option<Playbook> {
        self.playbooks.read().await.get(code).cloned()
    }

    async fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.playbooks.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }
}

/// playbook 文件：`[playbook]` 段 + 可选 `[workflow]` 段
#[derive(Debug, Deserialize)]
struct PlaybookToml {
    playbook: Playbook,
    #[serde(default)]
    workflow: Option<WorkflowSpec>,
}

/// 解析单个 playbook 文件内容
pub fn parse_playbook(content: &str) -> Result<Playbook, toml::de::Error> {
    let file: PlaybookToml = toml::from_str(content)?;
    let mut playbook = file.playbook;
    if file.workflow.is_some() {
        playbook.workflow = file.workflow;
    }
    Ok(playbook)
}

/// 目录加载器
pub struct PlaybookLoader {
    dir: PathBuf,
}

impl PlaybookLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 从默认位置创建
    pub fn from_default() -> Self {
        let dirs = [
            PathBuf::from("config/playbooks"),
            PathBuf::from("../config/playbooks"),
        ];
        let dir = dirs
            .into_iter()
            .find(|d| d.exists())
            .unwrap_or_else(|| PathBuf::from("config/playbooks"));
        Self::new(dir)
    }

    /// 加载目录下全部 *.toml；单个文件解析失败只记警告
    pub async fn load_into(&self, catalog: &InMemoryPlaybookCatalog) -> anyhow::Result<usize> {
        if !self.dir.exists() {
            tracing::warn!(dir = %self.dir.display(), "playbook directory not found");
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match parse_playbook(&content) {
                Ok(playbook) => {
                    catalog.insert(playbook).await;
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping invalid playbook");
                }
            }
        }

        tracing::info!("Loaded {} playbooks", loaded);
        Ok(loaded)
    }
}
