//! 规则分类器
//!
//! 不调用模型的快速匹配：
//! - 含 URL 或「打开 / 访问 / go to」之类 → browse
//! - 标签页 / 书签 / 历史 / 会话相关 → productivity
//! - 疑问句 → answer
//! - 其余 → browse

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::traits::{Agent, AgentContext};
use crate::agents::types::{Classification, TaskType};
use crate::core::AgentError;

const PRODUCTIVITY_WORDS: &[&str] = &[
    "tab", "tabs", "bookmark", "bookmarks", "history", "session", "sessions", "标签页", "书签",
    "历史记录", "会话",
];

const BROWSE_PREFIXES: &[&str] = &["open ", "go to ", "visit ", "navigate ", "打开", "访问"];

const QUESTION_PREFIXES: &[&str] = &[
    "what", "who", "why", "how", "when", "where", "which", "is ", "are ", "can ", "does ", "explain",
    "什么", "为什么", "怎么", "如何", "谁",
];

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:https?://|www\.)\S+|\b[a-z0-9-]+\.(?:com|org|net|io|dev|cn)\b")
            .unwrap_or_else(|e| panic!("invalid url pattern: {}", e))
    })
}

#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, input: &str) -> Classification {
        let lower = input.trim().to_lowercase();

        if url_regex().is_match(&lower) || BROWSE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return Classification {
                task_type: TaskType::Browse,
                reasoning: Some("navigation target".into()),
            };
        }

        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if PRODUCTIVITY_WORDS
            .iter()
            .any(|k| words.contains(k) || (!k.is_ascii() && lower.contains(k)))
        {
            return Classification {
                task_type: TaskType::Productivity,
                reasoning: Some("browser housekeeping".into()),
            };
        }

        if lower.ends_with('?')
            || lower.ends_with('？')
            || QUESTION_PREFIXES.iter().any(|p| lower.starts_with(p))
        {
            return Classification {
                task_type: TaskType::Answer,
                reasoning: Some("question".into()),
            };
        }

        Classification {
            task_type: TaskType::Browse,
            reasoning: None,
        }
    }
}

#[async_trait]
impl Agent for KeywordClassifier {
    fn name(&self) -> &str {
        "classifier"
    }

    async fn invoke(
        &self,
        instruction: &str,
        ctx: AgentContext<'_>,
    ) -> Result<serde_json::Value, AgentError> {
        let result = self.classify(instruction);
        ctx.emit_chunk(format!("{:?}", result.task_type));
        serde_json::to_value(result).map_err(|e| AgentError::failed(e.to_string()))
    }
}
