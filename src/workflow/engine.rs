//! 编排图引擎
//!
//! 顺序执行节点：START → entry → … → END。每次节点访问前检查取消与递归上限，
//! 节点前后写入 NodeStart / NodeEnd / NodeError 原始事件。协作者的初始化与清理由图负责。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::Agent;
use crate::core::{AgentError, GraphError};
use crate::memory::ConversationMemory;
use crate::stream::{send_event, EventSender, StreamEvent};
use crate::workflow::graph::{Edge, NodeId, Target};
use crate::workflow::nodes::{Node, NodeContext};
use crate::workflow::types::GraphState;

/// 清理结果：失败只记录，不作为错误返回
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub cleaned: usize,
    /// (协作者名, 错误信息)
    pub failures: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct TaskGraph {
    nodes: Vec<Arc<dyn Node>>,
    edges: HashMap<NodeId, Edge>,
    entry: NodeId,
    recursion_limit: usize,
    max_retries: u32,
}

impl TaskGraph {
    pub(crate) fn new(
        nodes: Vec<Arc<dyn Node>>,
        edges: HashMap<NodeId, Edge>,
        entry: NodeId,
        recursion_limit: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            nodes,
            edges,
            entry,
            recursion_limit,
            max_retries,
        }
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn node(&self, id: NodeId) -> Result<&Arc<dyn Node>, GraphError> {
        self.nodes
            .iter()
            .find(|n| n.id() == id)
            .ok_or_else(|| GraphError::Misconfigured(format!("node '{}' is not declared", id)))
    }

    /// 按声明顺序去重后的协作者
    fn agents(&self) -> Vec<Arc<dyn Agent>> {
        let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
        for node in &self.nodes {
            let agent = node.agent();
            if !agents
                .iter()
                .any(|a| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(agent)))
            {
                agents.push(Arc::clone(agent));
            }
        }
        agents
    }

    /// 依次初始化所有协作者；任一失败即返回
    pub async fn initialize(&self) -> Result<(), AgentError> {
        for agent in self.agents() {
            agent.initialize().await.map_err(|e| {
                AgentError::failed(format!("{} failed to initialize: {}", agent.name(), e))
            })?;
            debug!(agent = agent.name(), "Agent initialized");
        }
        Ok(())
    }

    /// 执行一次运行，返回最终状态
    pub async fn run(
        &self,
        mut state: GraphState,
        memory: &mut ConversationMemory,
        cancel: CancellationToken,
        events: Option<EventSender>,
    ) -> Result<GraphState, GraphError> {
        let mut current = Target::Node(self.entry);
        let mut visits = 0usize;

        while let Target::Node(id) = current {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            visits += 1;
            if visits > self.recursion_limit {
                warn!(limit = self.recursion_limit, node = %id, "Recursion limit reached");
                return Err(GraphError::RecursionLimit(self.recursion_limit));
            }

            let node = self.node(id)?;
            debug!(node = %id, visit = visits, "Node start");
            send_event(
                events.as_ref(),
                StreamEvent::NodeStart {
                    node: id.to_string(),
                },
            );

            let mut ctx = NodeContext {
                memory: &mut *memory,
                cancel: cancel.clone(),
                events: events.clone(),
            };
            match node.run(&state, &mut ctx).await {
                Ok(output) => {
                    state = state.merge(output.patch);
                    send_event(
                        events.as_ref(),
                        StreamEvent::NodeEnd {
                            node: id.to_string(),
                            success: output.success,
                        },
                    );
                }
                Err(e) => {
                    send_event(
                        events.as_ref(),
                        StreamEvent::NodeError {
                            node: id.to_string(),
                            error: e.to_string(),
                            cancelled: matches!(e, GraphError::Cancelled),
                        },
                    );
                    return Err(e);
                }
            }

            let edge = self.edges.get(&id).ok_or_else(|| {
                GraphError::Misconfigured(format!("node '{}' has no outgoing edge", id))
            })?;
            current = edge.next(&state);
        }

        info!(
            visits,
            retry_count = state.retry_count,
            complete = state.is_complete,
            "Graph run finished"
        );
        Ok(state)
    }

    /// 并行清理所有协作者
    pub async fn cleanup(&self) -> CleanupReport {
        let agents = self.agents();
        let results = join_all(agents.iter().map(|agent| async move {
            (agent.name().to_string(), agent.cleanup().await)
        }))
        .await;

        let mut report = CleanupReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.cleaned += 1,
                Err(e) => {
                    warn!(agent = %name, error = %e, "Agent cleanup failed");
                    report.failures.push((name, e.to_string()));
                }
            }
        }
        report
    }
}
