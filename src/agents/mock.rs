//! 确定性协作者（用于演示与测试，无需模型）
//!
//! - `ScriptedAgent`：按队列依次返回预设结果，记录每次调用
//! - `PlanFollowingBrowser`：按批次执行步骤，并通过 PlanMaintenance 在计划上打勾

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::plan_maintenance::{PlanMaintainer, PlanMaintenance, StepUpdate};
use crate::agents::traits::{Agent, AgentContext};
use crate::agents::types::{AgentParams, BatchStep};
use crate::core::AgentError;
use crate::memory::{Message, MessageType};
use crate::stream::StreamEvent;

/// 一次调用的记录
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub instruction: String,
    pub params: AgentParams,
    /// 调用时对话记忆中的 system prompt
    pub system_prompt: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ScriptedAgent {
    name: String,
    responses: Mutex<VecDeque<Result<serde_json::Value, String>>>,
    /// 队列耗尽后的返回值；None 表示失败
    fallback: Option<serde_json::Value>,
    system_prompt: Option<String>,
    delay: Option<Duration>,
    fail_initialize: bool,
    fail_cleanup: bool,
    calls: Mutex<Vec<RecordedCall>>,
    initialized: AtomicUsize,
    cleaned_up: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            fallback: None,
            system_prompt: None,
            delay: None,
            fail_initialize: false,
            fail_cleanup: false,
            calls: Mutex::new(Vec::new()),
            initialized: AtomicUsize::new(0),
            cleaned_up: AtomicUsize::new(0),
        }
    }

    pub fn respond(self, value: serde_json::Value) -> Self {
        lock(&self.responses).push_back(Ok(value));
        self
    }

    pub fn fail(self, error: impl Into<String>) -> Self {
        lock(&self.responses).push_back(Err(error.into()));
        self
    }

    pub fn with_fallback(mut self, value: serde_json::Value) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 每次调用前等待；等待期间响应取消
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn initialize_count(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn system_prompt(&self) -> Option<String> {
        self.system_prompt.clone()
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        if self.fail_initialize {
            return Err(AgentError::failed(format!("{} could not start", self.name)));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(
        &self,
        instruction: &str,
        ctx: AgentContext<'_>,
    ) -> Result<serde_json::Value, AgentError> {
        let system_prompt = ctx
            .memory
            .messages()
            .iter()
            .find(|m| m.kind() == MessageType::System)
            .map(|m| m.text().to_string());
        lock(&self.calls).push(RecordedCall {
            instruction: instruction.to_string(),
            params: ctx.params.clone(),
            system_prompt,
        });

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let next = lock(&self.responses).pop_front();
        let value = match next {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Err(AgentError::Failed(e)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::failed(format!("{} has no scripted response", self.name)))?,
        };

        ctx.emit_chunk(value.to_string());
        ctx.emit(StreamEvent::ModelEnd {
            node: ctx.node.to_string(),
        });
        Ok(value)
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(AgentError::failed(format!("{} cleanup failed", self.name)));
        }
        Ok(())
    }
}

/// 浏览器模拟的执行策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrowseBehaviour {
    /// 批次内每一步都打勾
    CompleteAll,
    /// 只完成批次内前 n 步
    CompleteFirst(usize),
    /// 什么都不标记（模拟计划维护失效）
    CompleteNone,
}

/// 按批次「执行」步骤的浏览器协作者
pub struct PlanFollowingBrowser {
    behaviour: BrowseBehaviour,
    maintainer: Arc<dyn PlanMaintenance>,
    batches: Mutex<Vec<Vec<BatchStep>>>,
    cleaned_up: AtomicUsize,
}

impl PlanFollowingBrowser {
    pub fn new(behaviour: BrowseBehaviour) -> Self {
        Self::with_maintainer(behaviour, Arc::new(PlanMaintainer::new()))
    }

    pub fn with_maintainer(behaviour: BrowseBehaviour, maintainer: Arc<dyn PlanMaintenance>) -> Self {
        Self {
            behaviour,
            maintainer,
            batches: Mutex::new(Vec::new()),
            cleaned_up: AtomicUsize::new(0),
        }
    }

    /// 每次调用收到的批次
    pub fn batches(&self) -> Vec<Vec<BatchStep>> {
        lock(&self.batches).clone()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for PlanFollowingBrowser {
    fn name(&self) -> &str {
        "browser"
    }

    async fn invoke(
        &self,
        _instruction: &str,
        ctx: AgentContext<'_>,
    ) -> Result<serde_json::Value, AgentError> {
        let steps = ctx.params.steps.clone();
        lock(&self.batches).push(steps.clone());

        let to_complete = match self.behaviour {
            BrowseBehaviour::CompleteAll => steps.len(),
            BrowseBehaviour::CompleteFirst(n) => n.min(steps.len()),
            BrowseBehaviour::CompleteNone => 0,
        };

        let mut executed = Vec::new();
        for step in steps.iter().take(to_complete) {
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            ctx.emit(StreamEvent::ToolStart {
                node: ctx.node.to_string(),
                tool: "browser_action".into(),
                input: json!({ "step": step.description }),
            });
            self.maintainer
                .update_step(ctx.memory, &step.description, StepUpdate::Completed, None)?;
            ctx.memory.add_browser_state_message(Message::browser_state(format!(
                "after step {}: {}",
                step.index, step.description
            )))?;
            ctx.emit(StreamEvent::ToolEnd {
                node: ctx.node.to_string(),
                tool: "browser_action".into(),
                output: format!("done: {}", step.description),
            });
            executed.push(step.description.clone());
        }

        Ok(json!({ "executed": executed }))
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ConversationMemory, Plan, TokenBudget};
    use tokio_util::sync::CancellationToken;

    fn ctx<'a>(memory: &'a mut ConversationMemory, params: AgentParams) -> AgentContext<'a> {
        AgentContext {
            node: "test",
            memory,
            params,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_agent_queue_then_fallback() {
        let agent = ScriptedAgent::new("validator")
            .respond(json!({"is_valid": false}))
            .fail("model unavailable")
            .with_fallback(json!({"is_valid": true}));
        let mut memory = ConversationMemory::new(TokenBudget::new(1000));

        let first = agent.invoke("check", ctx(&mut memory, AgentParams::default())).await;
        assert_eq!(first.unwrap(), json!({"is_valid": false}));
        let second = agent.invoke("check", ctx(&mut memory, AgentParams::default())).await;
        assert!(matches!(second, Err(AgentError::Failed(_))));
        let third = agent.invoke("check", ctx(&mut memory, AgentParams::default())).await;
        assert_eq!(third.unwrap(), json!({"is_valid": true}));
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_agent_delay_observes_cancel() {
        let agent = ScriptedAgent::new("slow")
            .with_delay(Duration::from_secs(30))
            .with_fallback(json!({}));
        let mut memory = ConversationMemory::new(TokenBudget::new(1000));
        let mut c = ctx(&mut memory, AgentParams::default());
        let token = CancellationToken::new();
        c.cancel = token.clone();
        token.cancel();
        assert_eq!(agent.invoke("x", c).await, Err(AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_browser_marks_first_steps() {
        let browser = PlanFollowingBrowser::new(BrowseBehaviour::CompleteFirst(1));
        let mut memory = ConversationMemory::new(TokenBudget::new(10_000));
        memory
            .add_plan_message(&Plan::from_lines(["a", "b", "c"]))
            .unwrap();
        let params = AgentParams {
            steps: vec![
                BatchStep { index: 0, description: "a".into() },
                BatchStep { index: 1, description: "b".into() },
            ],
            ..Default::default()
        };

        browser.invoke("run batch", ctx(&mut memory, params)).await.unwrap();

        let plan = memory.get_previous_plan().unwrap();
        assert_eq!(plan.settled_run_from(0), 1);
        assert_eq!(memory.count_of(MessageType::BrowserState), 1);
        assert_eq!(browser.batches().len(), 1);
    }
}
