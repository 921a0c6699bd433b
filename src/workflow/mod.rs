pub mod builder;
pub mod engine;
pub mod graph;
pub mod nodes;
pub mod types;

pub use builder::{AgentSet, GraphBuilder};
pub use engine::{CleanupReport, TaskGraph};
pub use graph::{Edge, NodeId, Target};
pub use nodes::{Node, NodeContext, NodeOutput};
pub use types::{GraphPatch, GraphSettings, GraphState};
