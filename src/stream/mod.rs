//! 流式事件层：原始事件类型、领域事件类型与适配器

pub mod adapter;
pub mod events;

pub use adapter::EventAdapter;
pub use events::{send_event, EventSender, StreamEvent, TaskEvent};
