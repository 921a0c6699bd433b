//! 协作者契约中的数据类型：分类、计划、校验结果、步骤结果、调用参数

use serde::{Deserialize, Serialize};

use crate::memory::StepStatus;

/// 任务分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 直接的生产力动作（标签页 / 书签 / 历史 / 会话）
    Productivity,
    /// 计划 -> 浏览 -> 校验 循环
    Browse,
    /// 信息问答
    Answer,
}

/// classify 协作者的输出
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// planner 协作者的输出：`{"steps": [...]}` / `{"plan": [...]}` 或直接是字符串数组
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanOutput {
    Structured {
        #[serde(alias = "plan")]
        steps: Vec<String>,
        #[serde(default)]
        reasoning: Option<String>,
    },
    Lines(Vec<String>),
}

impl PlanOutput {
    pub fn into_steps(self) -> Vec<String> {
        match self {
            PlanOutput::Structured { steps, .. } => steps,
            PlanOutput::Lines(steps) => steps,
        }
    }
}

fn default_should_retry() -> bool {
    true
}

/// validate 协作者的输出
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// 校验失败时是否值得重新规划；缺省为 true
    #[serde(default = "default_should_retry")]
    pub should_retry: bool,
}

/// 浏览批次中某一步的执行结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    /// false 表示计划维护协作者没有标记该步骤，推进是被强制的
    pub verified: bool,
}

/// 浏览批次中的一步
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStep {
    pub index: usize,
    pub description: String,
}

/// 每个 agent 的结果槽位：`{success, result | error}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// 节点传给协作者的上下文参数
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentParams {
    pub task_type: Option<TaskType>,
    pub retry_count: u32,
    pub is_follow_up: bool,
    /// 重新规划或后续任务时的上一版计划
    pub previous_plan: Option<Vec<String>>,
    /// 重新规划时的校验反馈
    pub validation_feedback: Option<ValidationResult>,
    pub plan: Vec<String>,
    /// browse：本批次要执行的步骤
    pub steps: Vec<BatchStep>,
    pub step_results: Vec<StepResult>,
    pub last_browse_result: Option<serde_json::Value>,
}
