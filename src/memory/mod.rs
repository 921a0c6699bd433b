//! 记忆层：带 token 预算的对话记忆、消息模型、计划模型

pub mod conversation;
pub mod message;
pub mod plan;
pub mod token_budget;

pub use conversation::{ConversationMemory, TargetFormat};
pub use message::{
    ChatMessage, ImageContent, Message, MessageType, Role, ToolCallPayload, TrackedMessage,
};
pub use plan::{Plan, PlanStep, StepStatus};
pub use token_budget::TokenBudget;
