//! 核心层：错误分类、请求去重、优雅关闭、引擎装配

pub mod builder;
pub mod dedup;
pub mod error;
pub mod shutdown;

pub use builder::EngineBuilder;
pub use dedup::DedupCache;
pub use error::{EngineError, ErrorKind};
pub use shutdown::{run_until_shutdown, ShutdownManager, ShutdownReason};
