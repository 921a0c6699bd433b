//! 执行状态机：单次运行的生命周期
//!
//! 所有状态变更都经由 `set_state`：非法转换只记 warn 并保持原状态；
//! 合法转换先同步通知进程内观察者，再尽力而为地广播（无订阅者时发送失败被忽略）。
//! 观察者 panic 会被隔离并记 warn，`set_state` 本身不会 panic。

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// 广播通道容量；慢订阅者会丢失旧事件，但不影响内部状态
const BROADCAST_CAPACITY: usize = 32;

/// 执行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Idle,
    Starting,
    Running,
    Aborting,
    Completed,
    Aborted,
    Error,
}

impl ExecutionState {
    pub fn all() -> [ExecutionState; 7] {
        [
            ExecutionState::Idle,
            ExecutionState::Starting,
            ExecutionState::Running,
            ExecutionState::Aborting,
            ExecutionState::Completed,
            ExecutionState::Aborted,
            ExecutionState::Error,
        ]
    }

    /// 转换表（没有隐式边）
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running | Error | Aborting)
                | (Running, Completed | Error | Aborting)
                | (Aborting, Aborted)
                | (Completed | Aborted | Error, Idle | Starting)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Aborted | ExecutionState::Error
        )
    }
}

/// 一次已接受的状态转换
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub at: DateTime<Utc>,
}

/// 观察者句柄，用于注销
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&StateChange) + Send + Sync>;

struct Inner {
    state: ExecutionState,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

/// 状态管理器：持有当前状态、观察者注册表与外部广播通道
pub struct ExecutionStateManager {
    inner: Mutex<Inner>,
    broadcast_tx: broadcast::Sender<StateChange>,
}

impl ExecutionStateManager {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                state: ExecutionState::Idle,
                observers: Vec::new(),
                next_observer_id: 0,
            }),
            broadcast_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 观察者在锁外调用，锁内不会 panic；中毒时直接取回数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// 唯一的状态转换入口；返回是否接受
    pub fn set_state(&self, next: ExecutionState) -> bool {
        let (change, observers) = {
            let mut inner = self.lock();
            let from = inner.state;
            if !from.can_transition_to(next) {
                tracing::warn!("Rejected invalid state transition {:?} -> {:?}", from, next);
                return false;
            }
            inner.state = next;
            let change = StateChange {
                from,
                to: next,
                at: Utc::now(),
            };
            let observers: Vec<Observer> =
                inner.observers.iter().map(|(_, o)| Arc::clone(o)).collect();
            (change, observers)
        };

        tracing::debug!("Execution state {:?} -> {:?}", change.from, change.to);

        // 单个观察者 panic 不影响其余观察者与广播
        for observer in &observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&change))).is_err() {
                tracing::warn!(
                    "State observer panicked on {:?} -> {:?}",
                    change.from,
                    change.to
                );
            }
        }

        // 尽力广播：没有订阅者时 send 返回 Err，忽略
        let _ = self.broadcast_tx.send(change);
        true
    }

    /// 注册进程内观察者（同步回调）
    pub fn add_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_observer_id);
        inner.next_observer_id += 1;
        inner.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    /// 订阅外部广播
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.broadcast_tx.subscribe()
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.state(),
            ExecutionState::Starting | ExecutionState::Running
        )
    }

    pub fn is_executing(&self) -> bool {
        matches!(
            self.state(),
            ExecutionState::Starting | ExecutionState::Running | ExecutionState::Aborting
        )
    }
}

impl Default for ExecutionStateManager {
    fn default() -> Self {
        Self::new()
    }
}
