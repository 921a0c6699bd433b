//! 编排图构建器
//!
//! 声明节点与边，`build` 时校验：入口已声明、每个节点恰有一条出边、每条边的目标都已声明。

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::Agent;
use crate::core::GraphError;
use crate::workflow::engine::TaskGraph;
use crate::workflow::graph::{
    route_after_browse, route_after_classify, route_after_validate, Edge, NodeId, Target,
    AFTER_BROWSE, AFTER_CLASSIFY, AFTER_VALIDATE,
};
use crate::workflow::nodes::{
    BrowseNode, ClassifyNode, Node, PlannerNode, TerminalNode, ValidateNode,
};
use crate::workflow::types::GraphSettings;

/// 标准图所需的六个协作者
#[derive(Clone)]
pub struct AgentSet {
    pub classifier: Arc<dyn Agent>,
    pub productivity: Arc<dyn Agent>,
    pub answer: Arc<dyn Agent>,
    pub planner: Arc<dyn Agent>,
    pub browser: Arc<dyn Agent>,
    pub validator: Arc<dyn Agent>,
}

pub struct GraphBuilder {
    nodes: Vec<Arc<dyn Node>>,
    edges: HashMap<NodeId, Edge>,
    entry: Option<NodeId>,
    recursion_limit: usize,
    max_retries: u32,
    problems: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        let defaults = GraphSettings::default();
        Self {
            nodes: Vec::new(),
            edges: HashMap::new(),
            entry: None,
            recursion_limit: defaults.recursion_limit,
            max_retries: defaults.max_retries,
            problems: Vec::new(),
        }
    }

    /// 添加节点
    pub fn node(mut self, node: impl Node + 'static) -> Self {
        let id = node.id();
        if self.nodes.iter().any(|n| n.id() == id) {
            self.problems.push(format!("node '{}' declared twice", id));
        } else {
            self.nodes.push(Arc::new(node));
        }
        self
    }

    pub fn edge(mut self, from: NodeId, edge: Edge) -> Self {
        if self.edges.insert(from, edge).is_some() {
            self.problems
                .push(format!("node '{}' has more than one outgoing edge", from));
        }
        self
    }

    pub fn static_edge(self, from: NodeId, to: Target) -> Self {
        self.edge(from, Edge::Static(to))
    }

    pub fn entry(mut self, id: NodeId) -> Self {
        self.entry = Some(id);
        self
    }

    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 校验并构建
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        if let Some(problem) = self.problems.first() {
            return Err(GraphError::Misconfigured(problem.clone()));
        }
        let declared = |id: NodeId| self.nodes.iter().any(|n| n.id() == id);

        let entry = self
            .entry
            .ok_or_else(|| GraphError::Misconfigured("entry node not set".into()))?;
        if !declared(entry) {
            return Err(GraphError::Misconfigured(format!(
                "entry node '{}' is not declared",
                entry
            )));
        }
        if self.recursion_limit == 0 {
            return Err(GraphError::Misconfigured("recursion limit must be positive".into()));
        }

        for node in &self.nodes {
            if !self.edges.contains_key(&node.id()) {
                return Err(GraphError::Misconfigured(format!(
                    "node '{}' has no outgoing edge",
                    node.id()
                )));
            }
        }
        for (from, edge) in &self.edges {
            if !declared(*from) {
                return Err(GraphError::Misconfigured(format!(
                    "edge from undeclared node '{}'",
                    from
                )));
            }
            for target in edge.targets() {
                if let Target::Node(to) = target {
                    if !declared(to) {
                        return Err(GraphError::Misconfigured(format!(
                            "edge '{}' -> '{}' targets an undeclared node",
                            from, to
                        )));
                    }
                }
            }
        }

        Ok(TaskGraph::new(
            self.nodes,
            self.edges,
            entry,
            self.recursion_limit,
            self.max_retries,
        ))
    }

    /// classify → {productivity | planner → browse ⟲ → validate ⟲ planner | answer}
    pub fn standard(agents: AgentSet, settings: &GraphSettings) -> Result<TaskGraph, GraphError> {
        GraphBuilder::new()
            .recursion_limit(settings.recursion_limit)
            .max_retries(settings.max_retries)
            .node(ClassifyNode::new(agents.classifier))
            .node(TerminalNode::productivity(agents.productivity))
            .node(TerminalNode::answer(agents.answer))
            .node(PlannerNode::new(agents.planner))
            .node(BrowseNode::new(agents.browser, settings.max_steps_per_batch))
            .node(ValidateNode::new(agents.validator))
            .entry(NodeId::Classify)
            .edge(
                NodeId::Classify,
                Edge::Conditional {
                    router: route_after_classify,
                    targets: AFTER_CLASSIFY,
                },
            )
            .static_edge(NodeId::Productivity, Target::End)
            .static_edge(NodeId::Answer, Target::End)
            .static_edge(NodeId::Planner, Target::Node(NodeId::Browse))
            .edge(
                NodeId::Browse,
                Edge::Conditional {
                    router: route_after_browse,
                    targets: AFTER_BROWSE,
                },
            )
            .edge(
                NodeId::Validate,
                Edge::Conditional {
                    router: route_after_validate,
                    targets: AFTER_VALIDATE,
                },
            )
            .build()
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
