//! Waggle - 浏览器助手多智能体任务执行引擎
//!
//! 模块划分：
//! - **agents**: 协作者契约、计划维护、规则分类器、确定性协作者
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、执行状态机、会话监管、编排器入口
//! - **memory**: Token 受限的对话记忆、消息类型、计划模型
//! - **observability**: tracing 初始化
//! - **stream**: 原始流事件 -> 领域事件的适配
//! - **workflow**: 编排图（状态合并、边、构建器、节点、引擎）

pub mod agents;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod stream;
pub mod workflow;

pub use crate::core::{Orchestrator, RunReport};
