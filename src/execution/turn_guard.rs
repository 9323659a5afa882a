//! 回合互斥
//!
//! 同一执行同一时刻只允许一个回合在跑；第二个请求立即失败（TurnInProgress），不排队。
//! 许可在 drop 时释放。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::core::EngineError;

#[derive(Debug, Default, Clone)]
pub struct TurnGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// 回合许可
#[derive(Debug)]
pub struct TurnPermit {
    execution_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl TurnGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, execution_id: &str) -> Result<TurnPermit, EngineError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| EngineError::Storage("turn guard poisoned".to_string()))?;
        if !set.insert(execution_id.to_string()) {
            return Err(EngineError::TurnInProgress(execution_id.to_string()));
        }
        Ok(TurnPermit {
            execution_id: execution_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, execution_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(execution_id))
            .unwrap_or(false)
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.execution_id);
        }
    }
}
