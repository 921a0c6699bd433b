//! 消息模型：带类型标签的消息与被跟踪的消息
//!
//! 消息类型在构造时显式确定（`Message::human` / `Message::ai` / ...），不从内容形状推断。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息类型标签
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    System,
    Human,
    Ai,
    Tool,
    Plan,
    BrowserState,
    ValidationFeedback,
    Task,
}

impl MessageType {
    /// 映射到 LLM API 的角色
    pub fn role(self) -> Role {
        match self {
            MessageType::System => Role::System,
            MessageType::Ai | MessageType::Plan => Role::Assistant,
            MessageType::Tool => Role::Tool,
            MessageType::Human
            | MessageType::BrowserState
            | MessageType::ValidationFeedback
            | MessageType::Task => Role::User,
        }
    }
}

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 图片内容（base64）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    pub mime_type: String,
    pub data: String,
}

impl ImageContent {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data: data.into(),
        }
    }
}

/// 附加在 ai 消息上的结构化工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCallPayload {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 待写入对话记忆的消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPayload>,
}

impl Message {
    pub fn new(kind: MessageType, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageType::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(MessageType::Human, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(MessageType::Ai, text)
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(MessageType::Tool, text)
    }

    pub fn task(text: impl Into<String>) -> Self {
        Self::new(MessageType::Task, text)
    }

    pub fn browser_state(text: impl Into<String>) -> Self {
        Self::new(MessageType::BrowserState, text)
    }

    pub fn validation_feedback(text: impl Into<String>) -> Self {
        Self::new(MessageType::ValidationFeedback, text)
    }

    pub fn with_image(mut self, image: ImageContent) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_tool_call(mut self, call: ToolCallPayload) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// 覆盖类型标签
    pub fn with_type(mut self, kind: MessageType) -> Self {
        self.kind = kind;
        self
    }
}

/// 对话记忆内部持有的消息：附带关联 id、记录的 token 开销与时间戳
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedMessage {
    pub(crate) id: u64,
    pub(crate) message: Message,
    pub(crate) token_count: usize,
    pub(crate) timestamp: DateTime<Utc>,
}

impl TrackedMessage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> MessageType {
        self.message.kind
    }

    pub fn text(&self) -> &str {
        &self.message.text
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// 写入时记录的开销（移除时按此值扣减，不重新计算）
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn has_images(&self) -> bool {
        !self.message.images.is_empty()
    }
}

/// 供 LLM 调用的精简消息
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}
