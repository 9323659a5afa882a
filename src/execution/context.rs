//! 执行上下文来源
//!
//! 用户画像与工作区的槽位绑定表由外部系统维护；引擎在组装 prompt 前一次性预取。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::conversation::ProfileContext;

#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn profile(&self, profile_id: &str) -> Option<ProfileContext>;

    /// 工作区的 slot -> tool_name 绑定
    async fn tool_bindings(&self, workspace_id: &str) -> BTreeMap<String, String>;
}

/// 静态配置的上下文来源；未单独配置的工作区使用 default_bindings
#[derive(Debug, Clone, Default)]
pub struct StaticContextSource {
    profiles: HashMap<String, ProfileContext>,
    workspace_bindings: HashMap<String, BTreeMap<String, String>>,
    default_bindings: BTreeMap<String, String>,
}

impl StaticContextSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>, profile: ProfileContext) -> Self {
        self.profiles.insert(profile_id.into(), profile);
        self
    }

    pub fn with_workspace_bindings(
        mut self,
        workspace_id: impl Into<String>,
        bindings: BTreeMap<String, String>,
    ) -> Self {
        self.workspace_bindings.insert(workspace_id.into(), bindings);
        self
    }

    pub fn with_default_bindings(mut self, bindings: BTreeMap<String, String>) -> Self {
        self.default_bindings = bindings;
        self
    }
}

#[async_trait]
impl ContextSource for StaticContextSource {
    async fn profile(&self, profile_id: &str) -> Option<ProfileContext> {
        self.profiles.get(profile_id).cloned()
    }

    async fn tool_bindings(&self, workspace_id: &str) -> BTreeMap<String, String> {
        self.workspace_bindings
            .get(workspace_id)
            .cloned()
            .unwrap_or_else(|| self.default_bindings.clone())
    }
}
