//! 执行层：执行记录与状态机、存储、任务注册表、断点控制与对外路由

pub mod context;
pub mod controller;
pub mod registry;
pub mod router;
pub mod sqlite;
pub mod store;
pub mod turn_guard;
pub mod types;

pub use context::{ContextSource, StaticContextSource};
pub use controller::{CheckpointController, ExecutionLocks, ResumeAction, ResumeOutcome};
pub use registry::{ExecutionTaskRegistry, TaskHandle};
pub use router::{
    resolve_backend, ContinueResponse, ExecutionMode, ExecutionRouter, RerunRequest,
    ResumeRequest, RouterConfig, RouterDeps, StartRequest, StartResponse, StatusChange,
    StatusResponse, KICKOFF_MESSAGE,
};
pub use sqlite::SqliteExecutionStore;
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use turn_guard::{TurnGuard, TurnPermit};
pub use types::{
    BackendHint, Checkpoint, Execution, ExecutionBackend, ExecutionContext, ExecutionStatus,
};
