//! 编排图集成测试：分类路由、计划/浏览/校验循环、重试上限、后续任务

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use waggle::agents::{BrowseBehaviour, PlanFollowingBrowser, ScriptedAgent, TaskType};
use waggle::core::{GraphError, MemoryError};
use waggle::memory::{ConversationMemory, MessageType, TokenBudget};
use waggle::workflow::{AgentSet, GraphBuilder, GraphSettings, GraphState, TaskGraph};

const FIVE_STEPS: [&str; 5] = [
    "Open the store homepage",
    "Search for the laptop model",
    "Open the product page",
    "Read the listed price",
    "Check the shipping cost",
];

struct Harness {
    classifier: Arc<ScriptedAgent>,
    productivity: Arc<ScriptedAgent>,
    answer: Arc<ScriptedAgent>,
    planner: Arc<ScriptedAgent>,
    browser: Arc<PlanFollowingBrowser>,
    validator: Arc<ScriptedAgent>,
}

impl Harness {
    fn new(
        classifier: ScriptedAgent,
        planner: ScriptedAgent,
        browser: PlanFollowingBrowser,
        validator: ScriptedAgent,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            productivity: Arc::new(
                ScriptedAgent::new("productivity").with_fallback(json!({"status": "done"})),
            ),
            answer: Arc::new(ScriptedAgent::new("answer").with_fallback(json!({"answer": "42"}))),
            planner: Arc::new(planner),
            browser: Arc::new(browser),
            validator: Arc::new(validator),
        }
    }

    fn graph(&self) -> TaskGraph {
        let agents = AgentSet {
            classifier: self.classifier.clone(),
            productivity: self.productivity.clone(),
            answer: self.answer.clone(),
            planner: self.planner.clone(),
            browser: self.browser.clone(),
            validator: self.validator.clone(),
        };
        GraphBuilder::standard(agents, &GraphSettings::default()).unwrap()
    }
}

fn classify_as(task_type: &str) -> ScriptedAgent {
    ScriptedAgent::new("classifier").with_fallback(json!({ "task_type": task_type }))
}

fn memory() -> ConversationMemory {
    ConversationMemory::new(TokenBudget::new(100_000))
}

async fn run(graph: &TaskGraph, state: GraphState, memory: &mut ConversationMemory) -> GraphState {
    graph
        .run(state, memory, CancellationToken::new(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failed_validation_replans_with_previous_plan() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner")
            .respond(json!({ "steps": FIVE_STEPS }))
            .with_fallback(json!(["Open the vendor site", "Read the price"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator")
            .respond(json!({"is_valid": false, "reason": "shipping cost missing"}))
            .respond(json!({"is_valid": true, "reason": "ok", "answer": "$999"})),
    );
    let graph = h.graph();
    let mut memory = memory();

    let state = run(&graph, GraphState::new("price of the laptop", 2), &mut memory).await;

    // 第一轮：步骤 1-3，再 4-5
    let batches = h.browser.batches();
    let first: Vec<usize> = batches[0].iter().map(|s| s.index).collect();
    let second: Vec<usize> = batches[1].iter().map(|s| s.index).collect();
    assert_eq!(first, vec![0, 1, 2]);
    assert_eq!(second, vec![3, 4]);

    let calls = h.planner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].params.previous_plan, None);
    let replanned = &calls[1].params;
    assert_eq!(
        replanned.previous_plan.as_deref(),
        Some(&FIVE_STEPS.map(String::from)[..])
    );
    assert_eq!(
        replanned.validation_feedback.as_ref().map(|v| v.reason.as_str()),
        Some("shipping cost missing")
    );
    assert_eq!(replanned.retry_count, 0);

    assert_eq!(state.retry_count, 1);
    assert!(state.is_complete);
    assert_eq!(state.plan.len(), 2);
    assert_eq!(memory.count_of(MessageType::ValidationFeedback), 1);
}

#[tokio::test]
async fn test_first_validation_passes_without_replan() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!({ "steps": FIVE_STEPS })),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true, "reason": "ok"})),
    );
    let graph = h.graph();
    let mut memory = memory();

    let state = run(&graph, GraphState::new("price of the laptop", 2), &mut memory).await;

    assert_eq!(state.retry_count, 0);
    assert!(state.is_complete);
    assert_eq!(h.planner.call_count(), 1);
    assert_eq!(h.validator.call_count(), 1);
    assert_eq!(state.step_results.len(), 5);
    assert!(state.step_results.iter().all(|r| r.verified));
}

#[tokio::test]
async fn test_retry_ceiling_forces_completion() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!({ "steps": ["Open site", "Read"] })),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator")
            .with_fallback(json!({"is_valid": false, "reason": "still wrong"})),
    );
    let graph = h.graph();
    let mut memory = memory();

    let state = run(&graph, GraphState::new("impossible task", 2), &mut memory).await;

    assert_eq!(state.retry_count, 2);
    assert!(state.is_complete);
    assert_eq!(state.validation.as_ref().map(|v| v.is_valid), Some(false));
    assert_eq!(h.planner.call_count(), 3);
    assert_eq!(h.validator.call_count(), 3);
}

#[tokio::test]
async fn test_validator_declining_retry_ends_run() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!({ "steps": ["Open site"] })),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator").with_fallback(
            json!({"is_valid": false, "reason": "site is down", "should_retry": false}),
        ),
    );
    let graph = h.graph();
    let mut memory = memory();

    let state = run(&graph, GraphState::new("task", 2), &mut memory).await;

    assert_eq!(h.planner.call_count(), 1);
    assert_eq!(state.retry_count, 0);
    assert!(!state.is_complete);
}

#[tokio::test]
async fn test_classification_failure_defaults_to_productivity() {
    let h = Harness::new(
        ScriptedAgent::new("classifier").fail("model unavailable"),
        ScriptedAgent::new("planner"),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = h.graph();
    let mut memory = memory();

    let state = run(&graph, GraphState::new("group my tabs", 2), &mut memory).await;

    assert_eq!(state.task_type(), Some(TaskType::Productivity));
    assert!(state.is_complete);
    assert_eq!(h.productivity.call_count(), 1);
    assert_eq!(h.planner.call_count(), 0);
    assert!(state.productivity_result.unwrap().success);
}

#[tokio::test]
async fn test_malformed_classification_defaults_to_productivity() {
    let h = Harness::new(
        ScriptedAgent::new("classifier").with_fallback(json!({"kind": "browse"})),
        ScriptedAgent::new("planner"),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = h.graph();
    let state = run(&graph, GraphState::new("x", 2), &mut memory()).await;
    assert_eq!(state.task_type(), Some(TaskType::Productivity));
    assert!(state.is_complete);
}

#[tokio::test]
async fn test_terminal_failure_is_degraded() {
    let h = Harness::new(
        classify_as("answer"),
        ScriptedAgent::new("planner"),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = GraphBuilder::standard(
        AgentSet {
            classifier: h.classifier.clone(),
            productivity: h.productivity.clone(),
            answer: Arc::new(ScriptedAgent::new("answer").fail("rate limited")),
            planner: h.planner.clone(),
            browser: h.browser.clone(),
            validator: h.validator.clone(),
        },
        &GraphSettings::default(),
    )
    .unwrap();

    let state = run(&graph, GraphState::new("what is rust?", 2), &mut memory()).await;

    let outcome = state.answer_result.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("rate limited"));
    assert!(state.is_complete);
}

#[tokio::test]
async fn test_browse_advances_without_plan_updates() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!(["Open site", "Read page"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteNone),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true})),
    );
    let graph = h.graph();

    let state = run(&graph, GraphState::new("task", 2), &mut memory()).await;

    // 每次 browse 至少推进一步
    assert_eq!(h.browser.batches().len(), 2);
    assert_eq!(state.current_step_index, 2);
    assert_eq!(state.step_results.len(), 2);
    assert!(state.step_results.iter().all(|r| !r.verified));
}

#[tokio::test]
async fn test_browse_advances_by_settled_prefix() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!(["a1", "b2", "c3", "d4"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteFirst(1)),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true})),
    );
    let graph = h.graph();

    run(&graph, GraphState::new("task", 2), &mut memory()).await;

    let starts: Vec<usize> = h.browser.batches().iter().map(|b| b[0].index).collect();
    assert_eq!(starts, vec![0, 1, 2, 3]);
    assert_eq!(h.browser.batches()[0].len(), 3);
}

#[tokio::test]
async fn test_repeated_step_descriptions_are_all_verified() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner")
            .with_fallback(json!(["Open form", "Click Next", "Click Next", "Submit"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true})),
    );
    let graph = h.graph();

    let state = run(&graph, GraphState::new("fill in the form", 2), &mut memory()).await;

    let starts: Vec<usize> = h.browser.batches().iter().map(|b| b[0].index).collect();
    assert_eq!(starts, vec![0, 3]);
    assert_eq!(state.step_results.len(), 4);
    assert!(state.step_results.iter().all(|r| r.verified));
}

#[tokio::test]
async fn test_follow_up_with_new_task_type_drops_context() {
    let h = Harness::new(
        classify_as("answer"),
        ScriptedAgent::new("planner"),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = h.graph();
    let initial = GraphState::follow_up(
        "what does that page say?",
        2,
        Some(TaskType::Browse),
        Some(vec!["Open site".into()]),
    );

    let state = run(&graph, initial, &mut memory()).await;

    assert!(!state.is_follow_up);
    assert_eq!(state.previous_plan, None);
    assert_eq!(state.previous_task_type, None);
    let call = &h.answer.calls()[0];
    assert!(!call.params.is_follow_up);
    assert_eq!(call.params.previous_plan, None);
}

#[tokio::test]
async fn test_follow_up_with_same_task_type_keeps_plan() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!(["Open site", "Compare prices"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true})),
    );
    let graph = h.graph();
    let initial = GraphState::follow_up(
        "now compare with the other store",
        2,
        Some(TaskType::Browse),
        Some(vec!["Open site".into()]),
    );

    run(&graph, initial, &mut memory()).await;

    let call = &h.planner.calls()[0];
    assert!(call.params.is_follow_up);
    assert_eq!(call.params.previous_plan, Some(vec!["Open site".to_string()]));
}

#[tokio::test]
async fn test_system_prompt_is_scoped_to_the_call() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner")
            .with_system_prompt("You plan browser tasks.")
            .with_fallback(json!(["Open site"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": true})),
    );
    let graph = h.graph();
    let mut memory = memory();

    run(&graph, GraphState::new("task", 2), &mut memory).await;

    assert_eq!(
        h.planner.calls()[0].system_prompt.as_deref(),
        Some("You plan browser tasks.")
    );
    assert_eq!(h.validator.calls()[0].system_prompt, None);
    assert_eq!(memory.count_of(MessageType::System), 0);
}

#[tokio::test]
async fn test_plan_exceeding_budget_aborts_run() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner").with_fallback(json!([
            "Open the travel site and accept the cookie banner",
            "Search for return flights from Lisbon to Berlin",
        ])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = h.graph();
    let mut memory = ConversationMemory::new(TokenBudget::new(20));

    let err = graph
        .run(GraphState::new("flights", 2), &mut memory, CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, GraphError::Memory(MemoryError::BudgetExhausted { .. })));
    assert!(memory.total_tokens() <= 20);
}

#[tokio::test]
async fn test_cancellation_interrupts_running_agent() {
    let h = Harness::new(
        classify_as("browse"),
        ScriptedAgent::new("planner")
            .with_delay(Duration::from_secs(30))
            .with_fallback(json!(["Open site"])),
        PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll),
        ScriptedAgent::new("validator"),
    );
    let graph = h.graph();
    let mut memory = memory();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = graph
        .run(GraphState::new("task", 2), &mut memory, cancel, None)
        .await
        .unwrap_err();
    assert_eq!(err, GraphError::Cancelled);
    assert_eq!(h.validator.call_count(), 0);
}
