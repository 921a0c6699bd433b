//! 流式事件：原始事件（引擎 / 模型 / 工具）与面向观察者的领域事件

use serde::Serialize;
use tokio::sync::mpsc;

/// 引擎与协作者产生的原始事件，按发生顺序写入通道
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    NodeStart { node: String },
    /// 模型输出的一小段 token
    ModelChunk { node: String, text: String },
    ModelEnd { node: String },
    ToolStart {
        node: String,
        tool: String,
        input: serde_json::Value,
    },
    ToolEnd {
        node: String,
        tool: String,
        output: String,
    },
    NodeEnd { node: String, success: bool },
    NodeError {
        node: String,
        error: String,
        cancelled: bool,
    },
}

impl StreamEvent {
    pub fn node(&self) -> &str {
        match self {
            StreamEvent::NodeStart { node }
            | StreamEvent::ModelChunk { node, .. }
            | StreamEvent::ModelEnd { node }
            | StreamEvent::ToolStart { node, .. }
            | StreamEvent::ToolEnd { node, .. }
            | StreamEvent::NodeEnd { node, .. }
            | StreamEvent::NodeError { node, .. } => node,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<StreamEvent>;

/// 发送原始事件；接收端已关闭时忽略
pub fn send_event(tx: Option<&EventSender>, ev: StreamEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 领域事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    AgentStarted { agent: String },
    /// 回复的一小段（流式输出）
    MessageChunk { agent: String, text: String },
    MessageDone { agent: String },
    ToolCall {
        agent: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        agent: String,
        tool: String,
        preview: String,
    },
    AgentCompleted { agent: String, success: bool },
    Error { agent: String, text: String },
}
