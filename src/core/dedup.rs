//! 入站请求去重
//!
//! 内存中记录最近见过的幂等键，固定 TTL（默认 120 秒）内重复触发同一逻辑请求时拒绝。
//! 仅单进程有效，尽力而为；多进程部署不保证去重。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// 默认幂等键保留时间
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 120;

/// 幂等键缓存：key -> 首次出现时间
#[derive(Debug)]
pub struct DedupCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// 记录 key；TTL 内已存在返回 false（重复请求），否则返回 true
    pub async fn check_and_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        if seen.contains_key(key) {
            tracing::debug!(key = %key, "duplicate request rejected");
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// 主动释放 key（请求失败、允许调用方立即重试时使用）
    pub async fn release(&self, key: &str) {
        self.seen.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let seen = self.seen.lock().await;
        seen.values()
            .filter(|at| now.duration_since(**at) < self.ttl)
            .count()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DEDUP_TTL_SECS))
    }
}
