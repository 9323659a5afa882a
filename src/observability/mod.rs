//! 可观测性：tracing 订阅者初始化
//!
//! 默认 info，RUST_LOG 覆盖。重复初始化（测试中常见）静默忽略。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
