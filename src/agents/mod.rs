//! 协作者层：契约（Agent trait）、契约数据类型、计划维护、规则分类器、确定性协作者

pub mod classifier;
pub mod mock;
pub mod plan_maintenance;
pub mod traits;
pub mod types;

pub use classifier::KeywordClassifier;
pub use mock::{BrowseBehaviour, PlanFollowingBrowser, RecordedCall, ScriptedAgent};
pub use plan_maintenance::{PlanMaintainer, PlanMaintenance, StepUpdate};
pub use traits::{Agent, AgentContext};
pub use types::{
    AgentOutcome, AgentParams, BatchStep, Classification, PlanOutput, StepResult, TaskType,
    ValidationResult,
};
