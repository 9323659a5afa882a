//! 结构化工作流后端：步骤规格、依赖图、参数模板与进程内执行引擎

pub mod engine;
pub mod graph;
pub mod template;
pub mod types;

pub use engine::{LocalWorkflowEngine, WorkflowBackend};
pub use graph::WorkflowGraph;
pub use template::TemplateRenderer;
pub use types::*;
