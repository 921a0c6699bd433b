//! 编排器：宿主入口
//!
//! 负责：经执行状态机把关（同一时刻只有一次运行）、为每次运行创建对话记忆与取消令牌、
//! 驱动编排图、在后台任务中把原始流事件适配为 TaskEvent，并保存后续任务所需的上下文。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::agents::TaskType;
use crate::config::AppConfig;
use crate::core::{ExecuteError, ExecutionState, ExecutionStateManager, GraphError, SessionSupervisor};
use crate::memory::{ConversationMemory, Message, TokenBudget};
use crate::stream::{EventAdapter, TaskEvent};
use crate::workflow::{AgentSet, CleanupReport, GraphBuilder, GraphState, TaskGraph};

/// 一次运行的结果摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub task_type: Option<TaskType>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// 失败原因或校验反馈
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub retry_count: u32,
    pub plan: Vec<String>,
    pub state: ExecutionState,
}

/// 上一次完成的运行留下的上下文
#[derive(Debug, Clone, Default)]
struct FollowUpContext {
    task_type: Option<TaskType>,
    plan: Option<Vec<String>>,
}

pub struct Orchestrator {
    graph: TaskGraph,
    budget: TokenBudget,
    state: Arc<ExecutionStateManager>,
    supervisor: SessionSupervisor,
    follow_up: Mutex<FollowUpContext>,
    event_sink: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl Orchestrator {
    pub fn new(graph: TaskGraph, budget: TokenBudget) -> Self {
        Self {
            graph,
            budget,
            state: Arc::new(ExecutionStateManager::new()),
            supervisor: SessionSupervisor::new(),
            follow_up: Mutex::new(FollowUpContext::default()),
            event_sink: None,
        }
    }

    /// 按配置构建标准图
    pub fn from_config(cfg: &AppConfig, agents: AgentSet) -> Result<Self, GraphError> {
        let graph = GraphBuilder::standard(agents, &cfg.graph)?;
        Ok(Self::new(graph, cfg.memory.clone()))
    }

    /// 每次运行的领域事件写入该通道
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<TaskEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state.state()
    }

    /// 状态管理器（注册观察者 / 订阅广播）
    pub fn state_manager(&self) -> Arc<ExecutionStateManager> {
        Arc::clone(&self.state)
    }

    pub async fn execute(&self, instruction: &str) -> Result<RunReport, ExecuteError> {
        self.run(instruction, false).await
    }

    /// 后续任务：沿用上一次运行的分类与计划
    pub async fn execute_follow_up(&self, instruction: &str) -> Result<RunReport, ExecuteError> {
        self.run(instruction, true).await
    }

    /// 取消当前运行；不可取消时返回 false
    pub fn cancel(&self) -> bool {
        if !self.state.is_cancellable() || !self.state.set_state(ExecutionState::Aborting) {
            return false;
        }
        self.supervisor.cancel();
        info!("Run cancellation requested");
        true
    }

    /// 取消进行中的运行并清理所有协作者
    pub async fn shutdown(&self) -> CleanupReport {
        self.cancel();
        self.supervisor.shutdown();
        let report = self.graph.cleanup().await;
        info!(
            cleaned = report.cleaned,
            failed = report.failures.len(),
            "Orchestrator shut down"
        );
        report
    }

    async fn run(&self, instruction: &str, follow_up: bool) -> Result<RunReport, ExecuteError> {
        if !self.state.set_state(ExecutionState::Starting) {
            return Err(ExecuteError::AlreadyRunning(self.state.state()));
        }
        let run_id = format!("run_{}", uuid::Uuid::new_v4());
        info!(run_id = %run_id, follow_up, "Run started");

        let result = self.run_inner(&run_id, instruction, follow_up).await;
        self.supervisor.finish_run();

        match &result {
            Ok(report) => info!(run_id = %run_id, success = report.success, "Run completed"),
            Err(e) if e.is_cancelled() => info!(run_id = %run_id, "Run aborted"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Run failed"),
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: &str,
        instruction: &str,
        follow_up: bool,
    ) -> Result<RunReport, ExecuteError> {
        let cancel = self.supervisor.begin_run();

        let mut memory = ConversationMemory::new(self.budget.clone());
        if let Err(e) = memory.add(Message::task(instruction)) {
            return Err(self.fail(GraphError::Memory(e).into()));
        }
        if let Err(e) = self.graph.initialize().await {
            return Err(self.fail(ExecuteError::Initialize(e.to_string())));
        }
        if !self.state.set_state(ExecutionState::Running) {
            // 启动期间已被取消
            self.finish_aborted();
            return Err(GraphError::Cancelled.into());
        }

        let initial = if follow_up {
            let ctx = self.follow_up_context();
            GraphState::follow_up(instruction, self.graph.max_retries(), ctx.task_type, ctx.plan)
        } else {
            GraphState::new(instruction, self.graph.max_retries())
        };

        let (raw_tx, pump) = self.spawn_event_pump();
        let result = self.graph.run(initial, &mut memory, cancel, raw_tx).await;
        if let Some(pump) = pump {
            // 图结束时原始发送端已全部释放，pump 会在读完剩余事件后退出
            let _ = pump.await;
        }

        // 计划与浏览器快照只在运行期间有效
        memory.remove_plan_message();
        memory.remove_browser_state_messages();

        match result {
            Ok(final_state) => {
                self.store_follow_up(&final_state);
                if !self.state.set_state(ExecutionState::Completed) {
                    // 图已结束但取消请求先到达
                    self.finish_aborted();
                    return Err(GraphError::Cancelled.into());
                }
                Ok(build_report(run_id, &final_state, ExecutionState::Completed))
            }
            Err(GraphError::Cancelled) => {
                self.finish_aborted();
                Err(GraphError::Cancelled.into())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// 致命错误 -> ERROR；若取消已在进行，则以 ABORTED 结束
    fn fail(&self, err: ExecuteError) -> ExecuteError {
        if !self.state.set_state(ExecutionState::Error) {
            self.finish_aborted();
        }
        err
    }

    fn finish_aborted(&self) {
        if self.state.state() != ExecutionState::Aborting {
            self.state.set_state(ExecutionState::Aborting);
        }
        self.state.set_state(ExecutionState::Aborted);
    }

    fn spawn_event_pump(
        &self,
    ) -> (
        Option<crate::stream::EventSender>,
        Option<JoinHandle<usize>>,
    ) {
        match &self.event_sink {
            Some(sink) => {
                let sink = sink.clone();
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = tokio::spawn(async move {
                    EventAdapter::new().pump(UnboundedReceiverStream::new(rx), &sink).await
                });
                (Some(tx), Some(handle))
            }
            None => (None, None),
        }
    }

    fn follow_up_context(&self) -> FollowUpContext {
        self.follow_up
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_follow_up(&self, state: &GraphState) {
        let ctx = FollowUpContext {
            task_type: state.task_type(),
            plan: (!state.plan.is_empty()).then(|| state.plan.clone()),
        };
        *self.follow_up.lock().unwrap_or_else(|e| e.into_inner()) = ctx;
    }
}

fn build_report(run_id: &str, state: &GraphState, exec_state: ExecutionState) -> RunReport {
    let task_type = state.task_type();
    let (success, result, feedback) = match task_type {
        Some(TaskType::Browse) => match &state.validation {
            Some(v) => (
                v.is_valid,
                v.answer
                    .clone()
                    .map(serde_json::Value::String)
                    .or_else(|| state.browse_result.as_ref().and_then(|o| o.result.clone())),
                (!v.is_valid).then(|| v.reason.clone()),
            ),
            None => (
                false,
                state.browse_result.as_ref().and_then(|o| o.result.clone()),
                Some("no usable validation result".to_string()),
            ),
        },
        Some(TaskType::Answer) => outcome_parts(state.answer_result.as_ref()),
        Some(TaskType::Productivity) | None => outcome_parts(state.productivity_result.as_ref()),
    };

    RunReport {
        run_id: run_id.to_string(),
        task_type,
        success,
        result,
        feedback,
        retry_count: state.retry_count,
        plan: state.plan.clone(),
        state: exec_state,
    }
}

fn outcome_parts(
    outcome: Option<&crate::agents::AgentOutcome>,
) -> (bool, Option<serde_json::Value>, Option<String>) {
    match outcome {
        Some(o) => (o.success, o.result.clone(), o.error.clone()),
        None => (false, None, Some("agent produced no result".to_string())),
    }
}
