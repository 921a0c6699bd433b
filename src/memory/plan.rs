//! 计划模型：带勾选标记的有序步骤
//!
//! 每个步骤形如 `[x] 打开设置页`：`[ ]` 待执行、`[x]` 完成、`[-]` 跳过、`[!]` 失败。
//! 写入对话记忆时序列化为 JSON 字符串数组；读回时优先解析结构化形式，失败则按行拆分。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 步骤完成状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Done,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn marker(self) -> &'static str {
        match self {
            StepStatus::Pending => "[ ]",
            StepStatus::Done => "[x]",
            StepStatus::Skipped => "[-]",
            StepStatus::Failed => "[!]",
        }
    }

    fn from_marker(c: &str) -> Self {
        match c {
            "x" | "X" => StepStatus::Done,
            "-" => StepStatus::Skipped,
            "!" => StepStatus::Failed,
            _ => StepStatus::Pending,
        }
    }

    /// 完成或跳过都视为「已处理」，计划可继续推进
    pub fn is_settled(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }
}

/// 步骤行：可选的列表符号 / 编号 + 可选的勾选标记 + 描述
fn step_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*+]|\d+[.)])?\s*(?:\[([ xX!-])\])?\s*(.*?)\s*$")
            .unwrap_or_else(|e| panic!("invalid step regex: {e}"))
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
        }
    }

    /// 解析一行步骤文本；没有标记时视为待执行
    pub fn parse(line: &str) -> Self {
        match step_line_re().captures(line) {
            Some(caps) => Self {
                description: caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
                status: caps
                    .get(1)
                    .map(|m| StepStatus::from_marker(m.as_str()))
                    .unwrap_or(StepStatus::Pending),
            },
            None => Self::new(line.trim()),
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.marker(), self.description)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// `{"steps": [...]}` 或 `{"plan": [...]}` 形式
#[derive(Deserialize)]
struct PlanObject {
    #[serde(alias = "plan")]
    steps: Vec<String>,
}

impl Plan {
    /// 从步骤字符串构造（已有的勾选标记会保留）
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            steps: lines
                .into_iter()
                .map(|l| PlanStep::parse(l.as_ref()))
                .filter(|s| !s.description.is_empty())
                .collect(),
        }
    }

    /// 解析计划消息文本：JSON 数组 / JSON 对象，失败则按行拆分
    pub fn from_message_text(text: &str) -> Self {
        if let Ok(lines) = serde_json::from_str::<Vec<String>>(text) {
            return Self::from_lines(lines);
        }
        if let Ok(obj) = serde_json::from_str::<PlanObject>(text) {
            return Self::from_lines(obj.steps);
        }
        Self::from_lines(text.lines())
    }

    pub fn to_message_text(&self) -> String {
        serde_json::to_string(&self.lines()).unwrap_or_else(|_| self.lines().join("\n"))
    }

    /// 带标记的步骤行
    pub fn lines(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.description.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 标记某个步骤；先精确匹配描述（忽略大小写），再退化为包含匹配。
    /// 描述重复时优先命中第一个未完成的步骤。
    pub fn mark(&mut self, description: &str, status: StepStatus) -> bool {
        let needle = description.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        let exact = |s: &PlanStep| s.description.to_lowercase() == needle;
        let partial = |s: &PlanStep| s.description.to_lowercase().contains(&needle);
        let pending = |s: &PlanStep| s.status == StepStatus::Pending;
        let idx = self
            .steps
            .iter()
            .position(|s| pending(s) && exact(s))
            .or_else(|| self.steps.iter().position(|s| pending(s) && partial(s)))
            .or_else(|| self.steps.iter().position(exact))
            .or_else(|| self.steps.iter().position(partial));
        match idx {
            Some(i) => {
                self.steps[i].status = status;
                true
            }
            None => false,
        }
    }

    /// 从 start 开始连续「完成/跳过」的步骤数
    pub fn settled_run_from(&self, start: usize) -> usize {
        self.steps
            .iter()
            .skip(start)
            .take_while(|s| s.status.is_settled())
            .count()
    }
}
