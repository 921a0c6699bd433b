//! 编排图类型定义
//!
//! GraphState 是单次运行的状态记录，只由图持有；节点返回 GraphPatch，
//! 由 `GraphState::merge` 合并：补丁中给出的字段覆盖，未给出的保留原值。

use serde::{Deserialize, Serialize};

use crate::agents::{AgentOutcome, Classification, StepResult, TaskType, ValidationResult};

/// 图的运行参数（配置文件 `[graph]` 段）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSettings {
    /// 校验失败后最多重新规划的次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 每次 browse 最多执行的步骤数
    #[serde(default = "default_max_steps_per_batch")]
    pub max_steps_per_batch: usize,
    /// 单次运行最多访问节点的次数
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_steps_per_batch() -> usize {
    3
}

fn default_recursion_limit() -> usize {
    64
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_steps_per_batch: default_max_steps_per_batch(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

/// 单次运行的状态
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphState {
    pub task: String,
    pub classification: Option<Classification>,

    pub productivity_result: Option<AgentOutcome>,
    pub answer_result: Option<AgentOutcome>,
    pub planner_result: Option<AgentOutcome>,
    pub browse_result: Option<AgentOutcome>,
    pub validation: Option<ValidationResult>,

    pub plan: Vec<String>,
    pub current_step_index: usize,
    pub step_results: Vec<StepResult>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_complete: bool,

    pub is_follow_up: bool,
    pub previous_task_type: Option<TaskType>,
    pub previous_plan: Option<Vec<String>>,
}

impl GraphState {
    pub fn new(task: impl Into<String>, max_retries: u32) -> Self {
        Self {
            task: task.into(),
            max_retries,
            ..Default::default()
        }
    }

    /// 后续任务：带上上一次运行的分类与计划
    pub fn follow_up(
        task: impl Into<String>,
        max_retries: u32,
        previous_task_type: Option<TaskType>,
        previous_plan: Option<Vec<String>>,
    ) -> Self {
        Self {
            is_follow_up: true,
            previous_task_type,
            previous_plan,
            ..Self::new(task, max_retries)
        }
    }

    pub fn task_type(&self) -> Option<TaskType> {
        self.classification.as_ref().map(|c| c.task_type)
    }

    /// 上一次校验是否失败（planner 据此判断是否为重新规划）
    pub fn validation_failed(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| !v.is_valid)
    }

    /// 合并补丁，返回新状态；self 不变
    pub fn merge(&self, patch: GraphPatch) -> GraphState {
        let prior = self.clone();
        GraphState {
            task: prior.task,
            classification: patch.classification.unwrap_or(prior.classification),
            productivity_result: patch.productivity_result.or(prior.productivity_result),
            answer_result: patch.answer_result.or(prior.answer_result),
            planner_result: patch.planner_result.or(prior.planner_result),
            browse_result: patch.browse_result.or(prior.browse_result),
            validation: patch.validation.unwrap_or(prior.validation),
            plan: patch.plan.unwrap_or(prior.plan),
            current_step_index: patch.current_step_index.unwrap_or(prior.current_step_index),
            step_results: patch.step_results.unwrap_or(prior.step_results),
            retry_count: patch.retry_count.unwrap_or(prior.retry_count),
            max_retries: prior.max_retries,
            is_complete: patch.is_complete.unwrap_or(prior.is_complete),
            is_follow_up: patch.is_follow_up.unwrap_or(prior.is_follow_up),
            previous_task_type: patch.previous_task_type.unwrap_or(prior.previous_task_type),
            previous_plan: patch.previous_plan.unwrap_or(prior.previous_plan),
        }
    }
}

/// 节点返回的部分更新；`Option<Option<T>>` 字段用 `Some(None)` 表示显式清空
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphPatch {
    pub classification: Option<Option<Classification>>,
    pub productivity_result: Option<AgentOutcome>,
    pub answer_result: Option<AgentOutcome>,
    pub planner_result: Option<AgentOutcome>,
    pub browse_result: Option<AgentOutcome>,
    pub validation: Option<Option<ValidationResult>>,
    pub plan: Option<Vec<String>>,
    pub current_step_index: Option<usize>,
    pub step_results: Option<Vec<StepResult>>,
    pub retry_count: Option<u32>,
    pub is_complete: Option<bool>,
    pub is_follow_up: Option<bool>,
    pub previous_task_type: Option<Option<TaskType>>,
    pub previous_plan: Option<Option<Vec<String>>>,
}
