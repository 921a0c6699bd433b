//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：节点根据 AgentError 决定 Degrade / Cancel / Abort。
//! 预算耗尽（BudgetExhausted）属于致命错误，必须一路向上传播并中止本次运行。

use thiserror::Error;

use crate::core::state::ExecutionState;

/// 对话记忆错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// 裁剪后仍无法容纳最新消息
    #[error("Token budget exhausted: {total} tokens held, budget is {budget}")]
    BudgetExhausted { total: usize, budget: usize },

    #[error("Message index {index} out of range (len {len})")]
    IndexOutOfRange { index: isize, len: usize },
}

/// 协作者（classify / plan / browse / validate / productivity / answer）调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 普通失败，可降级为 `{success: false, error}`
    #[error("Agent failed: {0}")]
    Failed(String),

    /// 运行被取消（不作为失败上报）
    #[error("Cancelled")]
    Cancelled,

    /// 协作者写入对话记忆时触发的致命错误
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl AgentError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// 编排图执行错误（节点内的普通失败不会出现在这里）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Recursion limit of {0} node visits reached")]
    RecursionLimit(usize),

    #[error("Invalid graph configuration: {0}")]
    Misconfigured(String),
}

/// Orchestrator 对宿主暴露的错误
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("A run is already active (state: {0:?})")]
    AlreadyRunning(ExecutionState),

    #[error("Agent initialization failed: {0}")]
    Initialize(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ExecuteError {
    /// 取消不算错误，宿主据此决定是否向用户展示
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecuteError::Graph(GraphError::Cancelled))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录失败并合成一个降级结果，运行继续
    Degrade(String),
    /// 取消：干净退出，不上报错误
    Cancel,
    /// 终止当前运行（致命）
    Abort(String),
}
