//! 流式事件适配器：原始 StreamEvent -> 有序 TaskEvent
//!
//! 规则：
//! - 按到达顺序输出；
//! - 某节点的消息流在其下一次工具调用、节点结束或输入结束前以 MessageDone 关闭；
//! - 未开始节点的事件隐含一次 AgentStarted；
//! - 空 chunk 丢弃，Observation 预览截断；
//! - 取消导致的节点错误不上报 Error。

use std::collections::HashSet;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::stream::events::{StreamEvent, TaskEvent};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Default)]
pub struct EventAdapter {
    /// 正在执行的节点
    active: HashSet<String>,
    /// 有未关闭消息流的节点（按打开顺序）
    open_messages: Vec<String>,
}

impl EventAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_started(&mut self, node: &str, out: &mut Vec<TaskEvent>) {
        if self.active.insert(node.to_string()) {
            out.push(TaskEvent::AgentStarted {
                agent: node.to_string(),
            });
        }
    }

    fn close_message(&mut self, node: &str, out: &mut Vec<TaskEvent>) {
        if let Some(pos) = self.open_messages.iter().position(|n| n == node) {
            self.open_messages.remove(pos);
            out.push(TaskEvent::MessageDone {
                agent: node.to_string(),
            });
        }
    }

    /// 处理一个原始事件，返回应输出的领域事件
    pub fn process(&mut self, raw: StreamEvent) -> Vec<TaskEvent> {
        let mut out = Vec::new();
        match raw {
            StreamEvent::NodeStart { node } => {
                self.ensure_started(&node, &mut out);
            }
            StreamEvent::ModelChunk { node, text } => {
                if text.is_empty() {
                    return out;
                }
                self.ensure_started(&node, &mut out);
                if !self.open_messages.contains(&node) {
                    self.open_messages.push(node.clone());
                }
                out.push(TaskEvent::MessageChunk { agent: node, text });
            }
            StreamEvent::ModelEnd { node } => {
                self.close_message(&node, &mut out);
            }
            StreamEvent::ToolStart { node, tool, input } => {
                self.ensure_started(&node, &mut out);
                self.close_message(&node, &mut out);
                out.push(TaskEvent::ToolCall {
                    agent: node,
                    tool,
                    args: input,
                });
            }
            StreamEvent::ToolEnd { node, tool, output } => {
                self.ensure_started(&node, &mut out);
                out.push(TaskEvent::Observation {
                    agent: node,
                    tool,
                    preview: preview(&output),
                });
            }
            StreamEvent::NodeEnd { node, success } => {
                self.ensure_started(&node, &mut out);
                self.close_message(&node, &mut out);
                self.active.remove(&node);
                out.push(TaskEvent::AgentCompleted {
                    agent: node,
                    success,
                });
            }
            StreamEvent::NodeError {
                node,
                error,
                cancelled,
            } => {
                self.ensure_started(&node, &mut out);
                self.close_message(&node, &mut out);
                self.active.remove(&node);
                if !cancelled {
                    out.push(TaskEvent::Error {
                        agent: node.clone(),
                        text: error,
                    });
                }
                out.push(TaskEvent::AgentCompleted {
                    agent: node,
                    success: false,
                });
            }
        }
        out
    }

    /// 输入结束：关闭所有未关闭的消息流
    pub fn finish(&mut self) -> Vec<TaskEvent> {
        self.active.clear();
        self.open_messages
            .drain(..)
            .map(|agent| TaskEvent::MessageDone { agent })
            .collect()
    }

    /// 消费原始事件流直到结束，把领域事件写入 sink；返回成功投递的事件数
    pub async fn pump<S>(mut self, mut stream: S, sink: &mpsc::UnboundedSender<TaskEvent>) -> usize
    where
        S: Stream<Item = StreamEvent> + Unpin,
    {
        let mut delivered = 0;
        while let Some(raw) = stream.next().await {
            for ev in self.process(raw) {
                if sink.send(ev).is_ok() {
                    delivered += 1;
                }
            }
        }
        for ev in self.finish() {
            if sink.send(ev).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        let head: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
