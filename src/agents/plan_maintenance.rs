//! 计划维护协作者
//!
//! browse 协作者每执行完一步就调用它：在对话记忆中的计划上打勾（完成 / 跳过 / 失败），
//! 并返回重新标注后的完整计划。图节点通过 `get_previous_plan` 间接观察到结果。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{ConversationMemory, Message, Plan, StepStatus};

/// 步骤更新类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepUpdate {
    Completed,
    Skipped,
    Failed,
}

impl From<StepUpdate> for StepStatus {
    fn from(update: StepUpdate) -> Self {
        match update {
            StepUpdate::Completed => StepStatus::Done,
            StepUpdate::Skipped => StepStatus::Skipped,
            StepUpdate::Failed => StepStatus::Failed,
        }
    }
}

pub trait PlanMaintenance: Send + Sync {
    fn update_step(
        &self,
        memory: &mut ConversationMemory,
        step: &str,
        update: StepUpdate,
        reason: Option<&str>,
    ) -> Result<Plan, AgentError>;
}

/// 默认实现：直接读写对话记忆中的 plan 消息
#[derive(Debug, Default)]
pub struct PlanMaintainer;

impl PlanMaintainer {
    pub fn new() -> Self {
        Self
    }
}

impl PlanMaintenance for PlanMaintainer {
    fn update_step(
        &self,
        memory: &mut ConversationMemory,
        step: &str,
        update: StepUpdate,
        reason: Option<&str>,
    ) -> Result<Plan, AgentError> {
        let mut plan = memory
            .get_previous_plan()
            .ok_or_else(|| AgentError::failed("no plan in conversation memory"))?;

        if !plan.mark(step, update.into()) {
            return Err(AgentError::failed(format!("step not found in plan: {}", step)));
        }
        memory.update_plan_message(&plan)?;

        // 跳过 / 失败的原因留给 validate 参考
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            memory.add(Message::tool(format!(
                "Step '{}' marked {:?}: {}",
                step, update, reason
            )))?;
        }
        Ok(plan)
    }
}
