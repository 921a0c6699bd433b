//! Waggle 演示入口
//!
//! 用内置的规则分类器与确定性协作者跑一条指令，逐行输出领域事件，最后输出运行报告（JSON）。
//! Ctrl-C 取消当前运行。

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::sync::mpsc;
use waggle::agents::{BrowseBehaviour, KeywordClassifier, PlanFollowingBrowser, ScriptedAgent};
use waggle::config::{load_config, AppConfig};
use waggle::workflow::AgentSet;
use waggle::Orchestrator;

fn demo_agents(instruction: &str) -> AgentSet {
    AgentSet {
        classifier: Arc::new(KeywordClassifier::new()),
        productivity: Arc::new(
            ScriptedAgent::new("productivity")
                .with_fallback(json!({ "status": "done", "action": instruction })),
        ),
        answer: Arc::new(
            ScriptedAgent::new("answer")
                .with_system_prompt("Answer the user's question concisely.")
                .with_fallback(json!({ "answer": format!("(demo answer for: {})", instruction) })),
        ),
        planner: Arc::new(
            ScriptedAgent::new("planner")
                .with_system_prompt("Break the task into short browser steps.")
                .with_fallback(json!({
                    "steps": [
                        "Open a new tab",
                        "Navigate to the target page",
                        "Read the relevant section",
                        "Summarise the findings",
                    ]
                })),
        ),
        browser: Arc::new(PlanFollowingBrowser::new(BrowseBehaviour::CompleteAll)),
        validator: Arc::new(ScriptedAgent::new("validator").with_fallback(json!({
            "is_valid": true,
            "reason": "all plan steps completed",
            "answer": format!("(demo result for: {})", instruction),
        }))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    waggle::observability::init();

    let instruction = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let instruction = if instruction.trim().is_empty() {
        "find the latest tokio release notes".to_string()
    } else {
        instruction
    };

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::from_config(&cfg, demo_agents(&instruction))
        .context("Failed to build orchestration graph")?
        .with_event_sink(event_tx);

    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{}", line);
            }
        }
    });

    let outcome = {
        let run = orchestrator.execute(&instruction);
        tokio::pin!(run);
        loop {
            tokio::select! {
                r = &mut run => break r,
                Ok(()) = tokio::signal::ctrl_c() => {
                    orchestrator.cancel();
                }
            }
        }
    };
    orchestrator.shutdown().await;
    // 释放事件发送端，让打印任务退出
    drop(orchestrator);
    let _ = printer.await;

    let report = match outcome {
        Ok(report) => report,
        Err(e) if e.is_cancelled() => {
            eprintln!("Run cancelled");
            return Ok(());
        }
        Err(e) => return Err(e).context("Run failed"),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}
