//! 编排图的节点标识与边
//!
//! 静态边：START→classify、productivity→END、answer→END、planner→browse。
//! 条件边：classify 后按分类路由；browse 后直到计划执行完；validate 后决定重规划或结束。

use std::fmt;

use serde::Serialize;

use crate::agents::TaskType;
use crate::workflow::types::GraphState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Classify,
    Productivity,
    Answer,
    Planner,
    Browse,
    Validate,
}

impl NodeId {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::Classify => "classify",
            NodeId::Productivity => "productivity",
            NodeId::Answer => "answer",
            NodeId::Planner => "planner",
            NodeId::Browse => "browse",
            NodeId::Validate => "validate",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 边的目标
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    End,
}

/// 条件路由函数
pub type Router = fn(&GraphState) -> Target;

#[derive(Clone, Copy)]
pub enum Edge {
    Static(Target),
    Conditional {
        router: Router,
        /// 路由可能返回的目标，构建时用于校验
        targets: &'static [Target],
    },
}

impl Edge {
    pub fn next(&self, state: &GraphState) -> Target {
        match self {
            Edge::Static(t) => *t,
            Edge::Conditional { router, .. } => router(state),
        }
    }

    pub fn targets(&self) -> Vec<Target> {
        match self {
            Edge::Static(t) => vec![*t],
            Edge::Conditional { targets, .. } => targets.to_vec(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Static(t) => f.debug_tuple("Static").field(t).finish(),
            Edge::Conditional { targets, .. } => {
                f.debug_struct("Conditional").field("targets", targets).finish()
            }
        }
    }
}

/// classify 之后：缺失分类按 productivity 处理
pub fn route_after_classify(state: &GraphState) -> Target {
    match state.task_type() {
        Some(TaskType::Browse) => Target::Node(NodeId::Planner),
        Some(TaskType::Answer) => Target::Node(NodeId::Answer),
        Some(TaskType::Productivity) | None => Target::Node(NodeId::Productivity),
    }
}

pub const AFTER_CLASSIFY: &[Target] = &[
    Target::Node(NodeId::Productivity),
    Target::Node(NodeId::Planner),
    Target::Node(NodeId::Answer),
];

/// browse 之后：计划未执行完则继续 browse
pub fn route_after_browse(state: &GraphState) -> Target {
    if state.current_step_index < state.plan.len() {
        Target::Node(NodeId::Browse)
    } else {
        Target::Node(NodeId::Validate)
    }
}

pub const AFTER_BROWSE: &[Target] = &[Target::Node(NodeId::Browse), Target::Node(NodeId::Validate)];

/// validate 之后：已完成 / 无校验结果 / 校验通过 / 达到重试上限 → END；
/// 否则校验方要求重试 → planner，不要求 → END
pub fn route_after_validate(state: &GraphState) -> Target {
    if state.is_complete {
        return Target::End;
    }
    let Some(validation) = state.validation.as_ref() else {
        return Target::End;
    };
    if validation.is_valid || state.retry_count >= state.max_retries {
        return Target::End;
    }
    if validation.should_retry {
        Target::Node(NodeId::Planner)
    } else {
        Target::End
    }
}

pub const AFTER_VALIDATE: &[Target] = &[Target::Node(NodeId::Planner), Target::End];
