//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供图节点决定是降级、取消还是终止运行。

use crate::core::{AgentError, RecoveryAction};

/// 将协作者错误映射为节点可执行的动作（降级 / 取消 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Failed(msg) => RecoveryAction::Degrade(msg.clone()),
            AgentError::Cancelled => RecoveryAction::Cancel,
            AgentError::Memory(e) => RecoveryAction::Abort(e.to_string()),
        }
    }
}
