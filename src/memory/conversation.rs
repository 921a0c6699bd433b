//! 对话记忆：带类型标签、按 token 计费、受硬预算约束的有序消息日志
//!
//! 不变量：
//! - `total_tokens` 始终等于所持消息记录开销之和（移除时按记录值扣减，不重新估算）；
//! - 任何一次成功的 `add` 之后 `total_tokens <= max_input_tokens`；
//! - 至多一条 system 消息、至多一条 browser_state 消息、至多一条 plan 消息。
//!
//! 超预算时的裁剪只在 `add` / `insert` 内同步进行，且不会移除刚加入的消息：
//! 1. 最新消息带图片时逐张剥离图片，退回图片附加开销；
//! 2. 从最旧开始移除 tool / ai 消息（从不移除 system）；
//! 3. 仍超出时从最旧开始移除其它非 system、非 plan 消息；
//! 4. 仍超出则返回 `MemoryError::BudgetExhausted`，调用方必须中止本次运行。

use chrono::Utc;

use crate::core::MemoryError;
use crate::memory::message::{ChatMessage, Message, MessageType, TrackedMessage};
use crate::memory::plan::Plan;
use crate::memory::token_budget::TokenBudget;

/// `get_messages` 的目标格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetFormat {
    /// 原样返回
    Standard,
    /// 目标不接受开头的 system 角色：system 消息在副本中转为 human
    NoSystemRole,
}

#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<TrackedMessage>,
    total_tokens: usize,
    /// 单调递增的关联 id 计数器（clear 不重置）
    next_id: u64,
    budget: TokenBudget,
}

impl ConversationMemory {
    pub fn new(budget: TokenBudget) -> Self {
        Self {
            messages: Vec::new(),
            total_tokens: 0,
            next_id: 0,
            budget,
        }
    }

    /// 追加一条消息，超预算时同步裁剪；返回消息 id
    pub fn add(&mut self, message: Message) -> Result<u64, MemoryError> {
        let position = self.messages.len();
        self.insert(message, position)
    }

    /// 在指定位置插入（超出长度时追加）
    pub fn insert(&mut self, message: Message, position: usize) -> Result<u64, MemoryError> {
        let token_count = self.budget.message_cost(&message);
        let id = self.next_id;
        self.next_id += 1;

        let position = position.min(self.messages.len());
        self.messages.insert(
            position,
            TrackedMessage {
                id,
                message,
                token_count,
                timestamp: Utc::now(),
            },
        );
        self.total_tokens += token_count;

        if self.is_over_budget() {
            self.trim(id)?;
        }
        Ok(id)
    }

    fn trim(&mut self, new_id: u64) -> Result<(), MemoryError> {
        let before = self.total_tokens;
        let max = self.budget.max_input_tokens;

        // 1. 剥离最新消息上的图片
        let surcharge = self.budget.image_token_surcharge;
        if let Some(latest) = self.messages.iter_mut().find(|m| m.id == new_id) {
            while self.total_tokens > max && !latest.message.images.is_empty() {
                latest.message.images.pop();
                let credit = surcharge.min(latest.token_count);
                latest.token_count -= credit;
                self.total_tokens -= credit;
            }
        }

        // 2. 从最旧开始移除 tool / ai
        self.evict_oldest_while_over(|m| {
            m.id != new_id && matches!(m.kind(), MessageType::Tool | MessageType::Ai)
        });

        // 3. 其它非 system / 非 plan 消息
        self.evict_oldest_while_over(|m| {
            m.id != new_id && !matches!(m.kind(), MessageType::System | MessageType::Plan)
        });

        if self.total_tokens > max {
            // 撤回新消息，保持记忆在预算内；错误照常上抛
            if let Some(idx) = self.messages.iter().position(|m| m.id == new_id) {
                self.remove_at(idx);
            }
            tracing::warn!(
                "Token budget exhausted: cannot fit message {} within {} tokens",
                new_id,
                max
            );
            return Err(MemoryError::BudgetExhausted {
                total: self.total_tokens,
                budget: max,
            });
        }

        tracing::debug!(
            "Trimmed conversation memory from {} to {} tokens",
            before,
            self.total_tokens
        );
        Ok(())
    }

    fn evict_oldest_while_over<F>(&mut self, evictable: F)
    where
        F: Fn(&TrackedMessage) -> bool,
    {
        let mut i = 0;
        while self.is_over_budget() && i < self.messages.len() {
            if evictable(&self.messages[i]) {
                self.remove_at(i);
            } else {
                i += 1;
            }
        }
    }

    fn remove_at(&mut self, index: usize) -> TrackedMessage {
        let removed = self.messages.remove(index);
        self.total_tokens -= removed.token_count;
        removed
    }

    /// 移除指定位置的消息；负数表示从末尾数起（-1 为最后一条）
    pub fn remove(&mut self, index: isize) -> Result<TrackedMessage, MemoryError> {
        let len = self.messages.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize).filter(|i| *i < len)
        };
        match resolved {
            Some(i) => Ok(self.remove_at(i)),
            None => Err(MemoryError::IndexOutOfRange { index, len }),
        }
    }

    pub fn remove_oldest_non_system_message(&mut self) -> Option<TrackedMessage> {
        let idx = self
            .messages
            .iter()
            .position(|m| m.kind() != MessageType::System)?;
        Some(self.remove_at(idx))
    }

    pub fn remove_last_user_message(&mut self) -> Option<TrackedMessage> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.kind() == MessageType::Human)?;
        Some(self.remove_at(idx))
    }

    fn remove_all_of(&mut self, kind: MessageType) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.messages.len() {
            if self.messages[i].kind() == kind {
                self.remove_at(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// 设置唯一的 system 消息（置于开头）
    pub fn add_system_message(&mut self, text: impl Into<String>) -> Result<u64, MemoryError> {
        self.remove_system_message();
        self.insert(Message::system(text), 0)
    }

    /// 移除 system 消息；返回是否有消息被移除（幂等）
    pub fn remove_system_message(&mut self) -> bool {
        self.remove_all_of(MessageType::System) > 0
    }

    /// 设置唯一的浏览器状态快照
    pub fn add_browser_state_message(&mut self, message: Message) -> Result<u64, MemoryError> {
        self.remove_browser_state_messages();
        self.add(message.with_type(MessageType::BrowserState))
    }

    pub fn remove_browser_state_messages(&mut self) -> usize {
        self.remove_all_of(MessageType::BrowserState)
    }

    /// 不含浏览器状态的视图（供规划使用，prompt 大小稳定）
    pub fn messages_without_state(&self) -> Vec<TrackedMessage> {
        self.messages
            .iter()
            .filter(|m| m.kind() != MessageType::BrowserState)
            .cloned()
            .collect()
    }

    /// 写入计划（替换已有计划）
    pub fn add_plan_message(&mut self, plan: &Plan) -> Result<u64, MemoryError> {
        self.remove_all_of(MessageType::Plan);
        self.add(Message::new(MessageType::Plan, plan.to_message_text()))
    }

    /// 更新计划 = 先删后加
    pub fn update_plan_message(&mut self, plan: &Plan) -> Result<u64, MemoryError> {
        self.add_plan_message(plan)
    }

    pub fn remove_plan_message(&mut self) -> bool {
        self.remove_all_of(MessageType::Plan) > 0
    }

    /// 读回当前计划（结构化解析，失败退化为按行拆分）
    pub fn get_previous_plan(&self) -> Option<Plan> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind() == MessageType::Plan)
            .map(|m| Plan::from_message_text(m.text()))
    }

    /// 返回消息副本；存储的日志不受目标格式影响
    pub fn get_messages(&self, format: TargetFormat) -> Vec<TrackedMessage> {
        self.messages
            .iter()
            .cloned()
            .map(|mut m| {
                if format == TargetFormat::NoSystemRole && m.kind() == MessageType::System {
                    m.message.kind = MessageType::Human;
                }
                m
            })
            .collect()
    }

    pub fn to_chat_messages(&self, format: TargetFormat) -> Vec<ChatMessage> {
        self.get_messages(format)
            .into_iter()
            .map(|m| ChatMessage {
                role: m.kind().role(),
                content: m.message.text,
            })
            .collect()
    }

    pub fn messages(&self) -> &[TrackedMessage] {
        &self.messages
    }

    pub fn latest_message(&self) -> Option<&TrackedMessage> {
        self.messages.last()
    }

    pub fn count_of(&self, kind: MessageType) -> usize {
        self.messages.iter().filter(|m| m.kind() == kind).count()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_tokens > self.budget.max_input_tokens
    }

    pub fn remaining(&self) -> usize {
        self.budget.max_input_tokens.saturating_sub(self.total_tokens)
    }

    /// 不裁剪的前提下能否容纳该消息
    pub fn can_fit(&self, message: &Message) -> bool {
        self.budget.message_cost(message) <= self.remaining()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_tokens = 0;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
