pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod invoker;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{FsListTool, FsReadTool, FsWriteTool, SafeFs};
pub use invoker::{NoSchemas, SchemaLookup, ToolInvocationResult, ToolInvoker};
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::{tool_call_example, tool_call_schema_json, CallForm};

use std::path::Path;

/// 内置工具集：沙箱文件系统三件套 + echo
pub fn builtin_registry(filesystem_root: impl AsRef<Path>) -> ToolRegistry {
    let root = filesystem_root.as_ref();
    let mut registry = ToolRegistry::new();
    registry.register(FsReadTool::new(root));
    registry.register(FsListTool::new(root));
    registry.register(FsWriteTool::new(root));
    registry.register(EchoTool);
    registry
}
