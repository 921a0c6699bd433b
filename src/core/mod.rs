//! 核心编排层：错误与恢复、执行状态机、会话监管、主控入口

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, ExecuteError, GraphError, MemoryError, RecoveryAction};
pub use orchestrator::{Orchestrator, RunReport};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{ExecutionState, ExecutionStateManager, ObserverId, StateChange};
