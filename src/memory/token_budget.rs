//! Token 预算与估算
//!
//! 文本按「字符数 / 每 token 字符数」向上取整；每张图片固定附加；
//! 工具调用负载按其 JSON 序列化长度折算。

use serde::Deserialize;

use crate::memory::message::Message;

/// [memory] 段：对话记忆的 token 预算
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    /// 对话记忆可持有的最大 token 数
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub estimated_characters_per_token: usize,
    /// 每张图片的固定 token 开销
    #[serde(default = "default_image_token_surcharge")]
    pub image_token_surcharge: usize,
}

fn default_max_input_tokens() -> usize {
    128_000
}

fn default_chars_per_token() -> usize {
    3
}

fn default_image_token_surcharge() -> usize {
    800
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            estimated_characters_per_token: default_chars_per_token(),
            image_token_surcharge: default_image_token_surcharge(),
        }
    }
}

impl TokenBudget {
    pub fn new(max_input_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            ..Self::default()
        }
    }

    pub fn with_chars_per_token(mut self, chars: usize) -> Self {
        self.estimated_characters_per_token = chars;
        self
    }

    pub fn with_image_surcharge(mut self, tokens: usize) -> Self {
        self.image_token_surcharge = tokens;
        self
    }

    /// 估算纯文本 token 数
    pub fn text_tokens(&self, text: &str) -> usize {
        let per_token = self.estimated_characters_per_token.max(1);
        text.chars().count().div_ceil(per_token)
    }

    /// 估算一条消息的总开销
    pub fn message_cost(&self, message: &Message) -> usize {
        let text = self.text_tokens(&message.text);
        let images = message.images.len() * self.image_token_surcharge;
        let tool_calls = if message.tool_calls.is_empty() {
            0
        } else {
            // 序列化失败时按 0 计，不影响文本部分
            serde_json::to_string(&message.tool_calls)
                .map(|s| self.text_tokens(&s))
                .unwrap_or(0)
        };
        text + images + tool_calls
    }
}
