//! Playbook 执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 对话状态、提示词组装、单回合工具循环
//! - **core**: 错误分类、请求去重、优雅关闭、引擎装配
//! - **execution**: 执行记录、状态机、任务注册表、断点续跑、执行路由
//! - **extract**: 从 LLM 自由文本中抽取工具调用意图
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **playbook**: playbook 定义与目录
//! - **tools**: 工具箱（fs_read、fs_list、fs_write、echo）与执行器
//! - **workflow**: 声明式工作流（步骤图、模板、本地执行器）
//! - **web**: HTTP 接口（需 `web` feature）

pub mod config;
pub mod conversation;
pub mod core;
pub mod execution;
pub mod extract;
pub mod llm;
pub mod observability;
pub mod playbook;
pub mod tools;
#[cfg(feature = "web")]
pub mod web;
pub mod workflow;

pub use core::{EngineBuilder, EngineError};
pub use execution::ExecutionRouter;
