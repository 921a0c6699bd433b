//! 协作者抽象
//!
//! classify / planner / browse / validate / productivity / answer 都实现 Agent：
//! initialize（幂等）、invoke（返回 JSON 结果或 AgentError）、cleanup（幂等）。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::types::AgentParams;
use crate::core::AgentError;
use crate::memory::ConversationMemory;
use crate::stream::{send_event, EventSender, StreamEvent};

/// 单次调用的上下文：本次运行的对话记忆、节点参数、取消令牌、可选事件通道
pub struct AgentContext<'a> {
    pub node: &'static str,
    pub memory: &'a mut ConversationMemory,
    pub params: AgentParams,
    pub cancel: CancellationToken,
    pub events: Option<EventSender>,
}

impl AgentContext<'_> {
    /// 推送原始流事件（无订阅者时忽略）
    pub fn emit(&self, ev: StreamEvent) {
        send_event(self.events.as_ref(), ev);
    }

    pub fn emit_chunk(&self, text: impl Into<String>) {
        self.emit(StreamEvent::ModelChunk {
            node: self.node.to_string(),
            text: text.into(),
        });
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// 调用前由节点注入、调用后移除的 system prompt
    fn system_prompt(&self) -> Option<String> {
        None
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn invoke(
        &self,
        instruction: &str,
        ctx: AgentContext<'_>,
    ) -> Result<serde_json::Value, AgentError>;

    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}
