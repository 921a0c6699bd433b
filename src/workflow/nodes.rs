//! 图节点
//!
//! 每个节点调用一个协作者并返回 GraphPatch。协作者调用与运行的取消令牌 `select!`；
//! 普通失败经 RecoveryEngine 降级为 `{success: false}` 的补丁，取消与预算耗尽向上传播。

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{
    Agent, AgentContext, AgentOutcome, AgentParams, BatchStep, Classification, PlanOutput,
    StepResult, TaskType, ValidationResult,
};
use crate::core::{AgentError, GraphError, RecoveryAction, RecoveryEngine};
use crate::memory::{ConversationMemory, Message, Plan, StepStatus};
use crate::stream::EventSender;
use crate::workflow::graph::NodeId;
use crate::workflow::types::{GraphPatch, GraphState};

/// 节点执行时可用的运行资源
pub struct NodeContext<'a> {
    pub memory: &'a mut ConversationMemory,
    pub cancel: CancellationToken,
    pub events: Option<EventSender>,
}

/// 节点输出：补丁 + 协作者是否成功（用于 NodeEnd 事件）
#[derive(Debug, Default)]
pub struct NodeOutput {
    pub patch: GraphPatch,
    pub success: bool,
}

#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    fn agent(&self) -> &Arc<dyn Agent>;

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError>;
}

/// 调用协作者：注入 system prompt，与取消令牌竞争，结束后移除 prompt
async fn invoke_agent(
    agent: &dyn Agent,
    node: NodeId,
    instruction: &str,
    params: AgentParams,
    ctx: &mut NodeContext<'_>,
) -> Result<serde_json::Value, AgentError> {
    let prompt = agent.system_prompt();
    if let Some(p) = &prompt {
        ctx.memory.add_system_message(p.clone())?;
    }

    let cancel = ctx.cancel.clone();
    let agent_ctx = AgentContext {
        node: node.as_str(),
        memory: &mut *ctx.memory,
        params,
        cancel: cancel.clone(),
        events: ctx.events.clone(),
    };
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        r = agent.invoke(instruction, agent_ctx) => r,
    };

    if prompt.is_some() {
        ctx.memory.remove_system_message();
    }
    result
}

/// 协作者错误 -> 降级信息；取消与致命错误转为 GraphError
fn recover(node: NodeId, err: AgentError) -> Result<String, GraphError> {
    match RecoveryEngine::new().handle(&err) {
        RecoveryAction::Degrade(msg) => {
            warn!(node = %node, error = %msg, "Agent failed, degrading");
            Ok(msg)
        }
        RecoveryAction::Cancel => Err(GraphError::Cancelled),
        RecoveryAction::Abort(reason) => match err {
            AgentError::Memory(e) => Err(GraphError::Memory(e)),
            _ => Err(GraphError::Misconfigured(reason)),
        },
    }
}

fn parse<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("malformed agent output: {}", e))
}

/// 调用并把结果解析为 T；失败返回降级信息
async fn invoke_parsed<T: DeserializeOwned>(
    agent: &dyn Agent,
    node: NodeId,
    instruction: &str,
    params: AgentParams,
    ctx: &mut NodeContext<'_>,
) -> Result<(Result<T, String>, AgentOutcome), GraphError> {
    match invoke_agent(agent, node, instruction, params, ctx).await {
        Ok(value) => match parse::<T>(value.clone()) {
            Ok(parsed) => Ok((Ok(parsed), AgentOutcome::ok(value))),
            Err(msg) => {
                warn!(node = %node, error = %msg, "Agent output rejected, degrading");
                Ok((Err(msg.clone()), AgentOutcome::failed(msg)))
            }
        },
        Err(e) => {
            let msg = recover(node, e)?;
            Ok((Err(msg.clone()), AgentOutcome::failed(msg)))
        }
    }
}

// ---------------------------------------------------------------------------

pub struct ClassifyNode {
    agent: Arc<dyn Agent>,
}

impl ClassifyNode {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for ClassifyNode {
    fn id(&self) -> NodeId {
        NodeId::Classify
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError> {
        let params = AgentParams {
            is_follow_up: state.is_follow_up,
            task_type: state.previous_task_type,
            previous_plan: state.previous_plan.clone(),
            ..Default::default()
        };
        let (parsed, _) =
            invoke_parsed::<Classification>(self.agent.as_ref(), self.id(), &state.task, params, ctx)
                .await?;

        let success = parsed.is_ok();
        let classification = parsed.unwrap_or_else(|msg| Classification {
            task_type: TaskType::Productivity,
            reasoning: Some(format!("classification failed: {}", msg)),
        });
        info!(task_type = ?classification.task_type, "Task classified");

        let mut patch = GraphPatch {
            classification: Some(Some(classification.clone())),
            ..Default::default()
        };
        if state.is_follow_up
            && state
                .previous_task_type
                .is_some_and(|prev| prev != classification.task_type)
        {
            info!(
                previous = ?state.previous_task_type,
                current = ?classification.task_type,
                "Task type changed, dropping follow-up context"
            );
            patch.is_follow_up = Some(false);
            patch.previous_task_type = Some(None);
            patch.previous_plan = Some(None);
        }
        Ok(NodeOutput { patch, success })
    }
}

// ---------------------------------------------------------------------------

/// productivity / answer：调用一次并结束运行
pub struct TerminalNode {
    id: NodeId,
    agent: Arc<dyn Agent>,
}

impl TerminalNode {
    pub fn productivity(agent: Arc<dyn Agent>) -> Self {
        Self {
            id: NodeId::Productivity,
            agent,
        }
    }

    pub fn answer(agent: Arc<dyn Agent>) -> Self {
        Self {
            id: NodeId::Answer,
            agent,
        }
    }
}

#[async_trait]
impl Node for TerminalNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError> {
        let params = AgentParams {
            task_type: state.task_type(),
            is_follow_up: state.is_follow_up,
            previous_plan: state.previous_plan.clone(),
            ..Default::default()
        };
        let outcome = match invoke_agent(self.agent.as_ref(), self.id, &state.task, params, ctx).await
        {
            Ok(value) => AgentOutcome::ok(value),
            Err(e) => AgentOutcome::failed(recover(self.id, e)?),
        };
        let success = outcome.success;

        let mut patch = GraphPatch {
            is_complete: Some(true),
            ..Default::default()
        };
        if self.id == NodeId::Answer {
            patch.answer_result = Some(outcome);
        } else {
            patch.productivity_result = Some(outcome);
        }
        Ok(NodeOutput { patch, success })
    }
}

// ---------------------------------------------------------------------------

pub struct PlannerNode {
    agent: Arc<dyn Agent>,
}

impl PlannerNode {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for PlannerNode {
    fn id(&self) -> NodeId {
        NodeId::Planner
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError> {
        let replanning = state.validation_failed();
        let previous_plan = if replanning || state.is_follow_up {
            state.previous_plan.clone()
        } else {
            None
        };
        let params = AgentParams {
            task_type: state.task_type(),
            retry_count: state.retry_count,
            is_follow_up: state.is_follow_up,
            previous_plan,
            validation_feedback: if replanning { state.validation.clone() } else { None },
            step_results: state.step_results.clone(),
            ..Default::default()
        };

        let (parsed, outcome) =
            invoke_parsed::<PlanOutput>(self.agent.as_ref(), self.id(), &state.task, params, ctx)
                .await?;
        let success = parsed.is_ok();
        let plan = Plan::from_lines(parsed.map(PlanOutput::into_steps).unwrap_or_default());

        if plan.is_empty() {
            warn!(replanning, "Planner produced no steps");
            ctx.memory.remove_plan_message();
        } else {
            ctx.memory.update_plan_message(&plan)?;
        }
        debug!(steps = plan.len(), replanning, "Plan stored");

        let retry_count = if replanning {
            state.retry_count + 1
        } else {
            state.retry_count
        };
        let patch = GraphPatch {
            planner_result: Some(outcome),
            plan: Some(plan.descriptions()),
            current_step_index: Some(0),
            step_results: Some(Vec::new()),
            retry_count: Some(retry_count),
            ..Default::default()
        };
        Ok(NodeOutput { patch, success })
    }
}

// ---------------------------------------------------------------------------

pub struct BrowseNode {
    agent: Arc<dyn Agent>,
    max_steps_per_batch: usize,
}

impl BrowseNode {
    pub fn new(agent: Arc<dyn Agent>, max_steps_per_batch: usize) -> Self {
        Self {
            agent,
            max_steps_per_batch: max_steps_per_batch.max(1),
        }
    }
}

#[async_trait]
impl Node for BrowseNode {
    fn id(&self) -> NodeId {
        NodeId::Browse
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError> {
        let start = state.current_step_index;
        if start >= state.plan.len() {
            debug!(start, "No steps left to browse");
            return Ok(NodeOutput {
                patch: GraphPatch::default(),
                success: true,
            });
        }
        let end = (start + self.max_steps_per_batch).min(state.plan.len());
        let batch: Vec<BatchStep> = (start..end)
            .map(|index| BatchStep {
                index,
                description: state.plan[index].clone(),
            })
            .collect();

        let params = AgentParams {
            task_type: state.task_type(),
            retry_count: state.retry_count,
            plan: state.plan.clone(),
            steps: batch.clone(),
            step_results: state.step_results.clone(),
            ..Default::default()
        };
        let instruction = format!("Execute steps {}-{} of the plan", start + 1, end);
        let outcome =
            match invoke_agent(self.agent.as_ref(), self.id(), &instruction, params, ctx).await {
                Ok(value) => AgentOutcome::ok(value),
                Err(e) => AgentOutcome::failed(recover(self.id(), e)?),
            };
        let success = outcome.success;

        // 从对话记忆读回计划维护后的标记
        let plan = ctx.memory.get_previous_plan().unwrap_or_default();
        let settled = plan.settled_run_from(start).min(batch.len());
        let advance = settled.max(1);
        if settled == 0 {
            warn!(
                step = start,
                description = %batch[0].description,
                "Plan not updated after browse batch, forcing advance"
            );
        }

        let mut step_results = state.step_results.clone();
        step_results.extend(batch.iter().take(advance).map(|step| StepResult {
            index: step.index,
            description: step.description.clone(),
            status: plan
                .steps
                .get(step.index)
                .map(|s| s.status)
                .unwrap_or(StepStatus::Pending),
            verified: step.index < start + settled,
        }));

        let patch = GraphPatch {
            browse_result: Some(outcome),
            current_step_index: Some(start + advance),
            step_results: Some(step_results),
            ..Default::default()
        };
        Ok(NodeOutput { patch, success })
    }
}

// ---------------------------------------------------------------------------

pub struct ValidateNode {
    agent: Arc<dyn Agent>,
}

impl ValidateNode {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node for ValidateNode {
    fn id(&self) -> NodeId {
        NodeId::Validate
    }

    fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    async fn run(
        &self,
        state: &GraphState,
        ctx: &mut NodeContext<'_>,
    ) -> Result<NodeOutput, GraphError> {
        let params = AgentParams {
            task_type: state.task_type(),
            retry_count: state.retry_count,
            plan: state.plan.clone(),
            step_results: state.step_results.clone(),
            last_browse_result: state.browse_result.as_ref().and_then(|o| o.result.clone()),
            ..Default::default()
        };
        let (parsed, _) = invoke_parsed::<ValidationResult>(
            self.agent.as_ref(),
            self.id(),
            &state.task,
            params,
            ctx,
        )
        .await?;
        let success = parsed.is_ok();
        let validation = parsed.ok();

        let mut patch = GraphPatch::default();
        let passed = validation.as_ref().is_some_and(|v| v.is_valid);
        if let Some(v) = validation.as_ref().filter(|v| !v.is_valid) {
            ctx.memory
                .add(Message::validation_feedback(format!("Validation failed: {}", v.reason)))?;
            patch.previous_plan = Some(Some(state.plan.clone()));
        }

        let ceiling = state.retry_count >= state.max_retries;
        if !passed && ceiling && validation.is_some() {
            info!(retry_count = state.retry_count, "Retry ceiling reached, completing run");
        }
        patch.is_complete = Some(passed || ceiling);
        patch.validation = Some(validation);
        Ok(NodeOutput { patch, success })
    }
}
