//! 编排器集成测试：执行状态机生命周期、取消、致命错误、事件流、后续任务、关闭清理

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use waggle::agents::{BrowseBehaviour, PlanFollowingBrowser, ScriptedAgent, TaskType};
use waggle::core::{ExecuteError, ExecutionState, GraphError, MemoryError};
use waggle::memory::TokenBudget;
use waggle::stream::TaskEvent;
use waggle::workflow::{AgentSet, GraphBuilder, GraphSettings};
use waggle::Orchestrator;

struct Agents {
    classifier: Arc<ScriptedAgent>,
    answer: Arc<ScriptedAgent>,
    planner: Arc<ScriptedAgent>,
    validator: Arc<ScriptedAgent>,
    productivity: Arc<ScriptedAgent>,
}

impl Agents {
    fn browse() -> Self {
        Self {
            classifier: Arc::new(
                ScriptedAgent::new("classifier").with_fallback(json!({"task_type": "browse"})),
            ),
            answer: Arc::new(ScriptedAgent::new("answer").with_fallback(json!({"answer": "42"}))),
            planner: Arc::new(
                ScriptedAgent::new("planner").with_fallback(json!(["Open site", "Read price"])),
            ),
            validator: Arc::new(ScriptedAgent::new("validator").with_fallback(
                json!({"is_valid": true, "reason": "ok", "answer": "$999"}),
            )),
            productivity: Arc::new(
                ScriptedAgent::new("productivity").with_fallback(json!({"status": "done"})),
            ),
        }
    }

    fn with_classifier(mut self, classifier: ScriptedAgent) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    fn with_planner(mut self, planner: ScriptedAgent) -> Self {
        self.planner = Arc::new(planner);
        self
    }

    fn with_validator(mut self, validator: ScriptedAgent) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    fn with_productivity(mut self, productivity: ScriptedAgent) -> Self {
        self.productivity = Arc::new(productivity);
        self
    }

    fn set(&self) -> AgentSet {
        AgentSet {
            classifier: self.classifier.clone(),
            productivity: self.productivity.clone(),
            answer: self.answer.clone(),
            planner: self.planner.clone(),
            browser: Arc::new(PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll)),
            validator: self.validator.clone(),
        }
    }

    fn orchestrator(&self, budget: TokenBudget) -> Orchestrator {
        let graph = GraphBuilder::standard(self.set(), &GraphSettings::default()).unwrap();
        Orchestrator::new(graph, budget)
    }
}

fn record_transitions(orchestrator: &Orchestrator) -> Arc<Mutex<Vec<(ExecutionState, ExecutionState)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator
        .state_manager()
        .add_observer(move |change| sink.lock().unwrap().push((change.from, change.to)));
    seen
}

async fn wait_for_state(orchestrator: &Orchestrator, target: ExecutionState) {
    for _ in 0..200 {
        if orchestrator.state() == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("state never reached {:?}", target);
}

#[tokio::test]
async fn test_successful_run_lifecycle() {
    let agents = Agents::browse();
    let orchestrator = agents.orchestrator(TokenBudget::default());
    let seen = record_transitions(&orchestrator);

    let report = orchestrator.execute("price of the laptop").await.unwrap();

    assert!(report.success);
    assert!(report.run_id.starts_with("run_"));
    assert_eq!(report.task_type, Some(TaskType::Browse));
    assert_eq!(report.result, Some(json!("$999")));
    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(orchestrator.state(), ExecutionState::Completed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (ExecutionState::Idle, ExecutionState::Starting),
            (ExecutionState::Starting, ExecutionState::Running),
            (ExecutionState::Running, ExecutionState::Completed),
        ]
    );

    // 终态之后可以开始新的运行
    orchestrator.execute("again").await.unwrap();
    assert!(agents.classifier.initialize_count() >= 1);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_active() {
    let agents = Agents::browse().with_planner(
        ScriptedAgent::new("planner")
            .with_delay(Duration::from_secs(30))
            .with_fallback(json!(["Open site"])),
    );
    let orchestrator = Arc::new(agents.orchestrator(TokenBudget::default()));

    let running = orchestrator.clone();
    let first = tokio::spawn(async move { running.execute("slow task").await });
    wait_for_state(&orchestrator, ExecutionState::Running).await;

    let err = orchestrator.execute("another task").await.unwrap_err();
    assert!(matches!(err, ExecuteError::AlreadyRunning(ExecutionState::Running)));

    assert!(orchestrator.cancel());
    let outcome = first.await.unwrap();
    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(orchestrator.state(), ExecutionState::Aborted);
}

#[tokio::test]
async fn test_cancel_goes_through_aborting() {
    let agents = Agents::browse().with_validator(
        ScriptedAgent::new("validator")
            .with_delay(Duration::from_secs(30))
            .with_fallback(json!({"is_valid": true})),
    );
    let orchestrator = Arc::new(agents.orchestrator(TokenBudget::default()));
    let seen = record_transitions(&orchestrator);

    assert!(!orchestrator.cancel(), "nothing to cancel while idle");

    let running = orchestrator.clone();
    let run = tokio::spawn(async move { running.execute("task").await });
    wait_for_state(&orchestrator, ExecutionState::Running).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orchestrator.cancel());

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ExecuteError::Graph(GraphError::Cancelled)));
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        &seen[seen.len() - 2..],
        &[
            (ExecutionState::Running, ExecutionState::Aborting),
            (ExecutionState::Aborting, ExecutionState::Aborted),
        ]
    );
    assert!(!seen.iter().any(|(_, to)| *to == ExecutionState::Error));
}

#[tokio::test]
async fn test_budget_exhaustion_ends_in_error() {
    let agents = Agents::browse();
    let orchestrator = agents.orchestrator(TokenBudget::new(5));

    let err = orchestrator
        .execute("an instruction far too long for a five token budget")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecuteError::Graph(GraphError::Memory(MemoryError::BudgetExhausted { .. }))
    ));
    assert_eq!(orchestrator.state(), ExecutionState::Error);

    // ERROR 之后仍可重新开始
    let again = orchestrator.execute("tiny").await;
    assert!(!matches!(again, Err(ExecuteError::AlreadyRunning(_))));
}

#[tokio::test]
async fn test_initialization_failure_ends_in_error() {
    let agents =
        Agents::browse().with_productivity(ScriptedAgent::new("productivity").failing_initialize());
    let orchestrator = agents.orchestrator(TokenBudget::default());

    let err = orchestrator.execute("group my tabs").await.unwrap_err();

    assert!(matches!(err, ExecuteError::Initialize(msg) if msg.contains("productivity")));
    assert_eq!(orchestrator.state(), ExecutionState::Error);
    assert_eq!(agents.classifier.call_count(), 0);
}

#[tokio::test]
async fn test_forced_completion_reports_failure_with_feedback() {
    let agents = Agents::browse().with_validator(
        ScriptedAgent::new("validator").with_fallback(json!({"is_valid": false, "reason": "price not found"})),
    );
    let orchestrator = agents.orchestrator(TokenBudget::default());

    let report = orchestrator.execute("price of the laptop").await.unwrap();

    assert!(!report.success);
    assert_eq!(report.retry_count, 2);
    assert_eq!(report.feedback.as_deref(), Some("price not found"));
    assert_eq!(report.state, ExecutionState::Completed);
}

#[tokio::test]
async fn test_event_stream_is_ordered() {
    let agents =
        Agents::browse().with_classifier(ScriptedAgent::new("classifier").with_fallback(json!({"task_type": "answer"})));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = agents.orchestrator(TokenBudget::default()).with_event_sink(tx);

    orchestrator.execute("what is a monad?").await.unwrap();

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    assert_eq!(events.first(), Some(&TaskEvent::AgentStarted { agent: "classify".into() }));
    assert_eq!(
        events.last(),
        Some(&TaskEvent::AgentCompleted { agent: "answer".into(), success: true })
    );

    let chunk = events
        .iter()
        .position(|e| matches!(e, TaskEvent::MessageChunk { agent, .. } if agent == "answer"))
        .unwrap();
    let done = events
        .iter()
        .position(|e| matches!(e, TaskEvent::MessageDone { agent } if agent == "answer"))
        .unwrap();
    assert!(chunk < done);
    assert!(!events.iter().any(|e| matches!(e, TaskEvent::Error { .. })));
}

#[tokio::test]
async fn test_follow_up_reuses_previous_plan() {
    let agents = Agents::browse();
    let orchestrator = agents.orchestrator(TokenBudget::default());

    orchestrator.execute("price of the laptop").await.unwrap();
    orchestrator.execute_follow_up("and the shipping cost?").await.unwrap();

    let calls = agents.planner.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].params.is_follow_up);
    assert!(calls[1].params.is_follow_up);
    assert_eq!(
        calls[1].params.previous_plan,
        Some(vec!["Open site".to_string(), "Read price".to_string()])
    );
}

#[tokio::test]
async fn test_shutdown_aggregates_cleanup_failures() {
    let agents = Agents::browse()
        .with_productivity(ScriptedAgent::new("productivity").failing_cleanup());
    let orchestrator = agents.orchestrator(TokenBudget::default());

    let report = orchestrator.shutdown().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "productivity");
    assert_eq!(report.cleaned, 5);
    assert_eq!(agents.classifier.cleanup_count(), 1);
}
