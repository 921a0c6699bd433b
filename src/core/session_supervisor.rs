//! 会话监管：运行级取消令牌
//!
//! 每次运行开始时从根 token 派生子 token，取消只作用于当前运行；
//! 根 token 被取消（如进程关闭）时所有运行一并取消。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    /// 进程级取消（关闭）
    root: CancellationToken,
    /// 当前运行的 token
    current: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// 为新运行创建子 token 并记为当前
    pub fn begin_run(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        token
    }

    /// 运行结束，清除当前 token
    pub fn finish_run(&self) {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// 取消当前运行；没有运行时返回 false
    pub fn cancel(&self) -> bool {
        match self.current.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消所有运行（关闭）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
