//! 流式调用的状态机：`Created → Invoking → {Completed | Failed | Cancelled}`。

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallState {
    Created = 0,
    Invoking = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CallState::Created,
            1 => CallState::Invoking,
            2 => CallState::Completed,
            3 => CallState::Failed,
            _ => CallState::Cancelled,
        }
    }
}

/// 调用状态的原子存储。
///
/// # 教案式说明
/// - **契约 (What)**：只允许 `Created → Invoking` 与 `Invoking → 终态` 两类迁移，
///   终态之后的任何迁移都被拒绝；
/// - **逻辑 (How)**：以 `compare_exchange` 校验迁移起点，并发的重复迁移只有一个成功。
#[derive(Debug)]
pub(crate) struct CallStatus {
    raw: AtomicU8,
}

impl CallStatus {
    pub(crate) fn new() -> Self {
        Self {
            raw: AtomicU8::new(CallState::Created as u8),
        }
    }

    pub(crate) fn load(&self) -> CallState {
        CallState::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// 尝试迁移到 `next`，非法迁移返回 `false`。
    pub(crate) fn advance(&self, next: CallState) -> bool {
        let from = match next {
            CallState::Created => return false,
            CallState::Invoking => CallState::Created,
            _ => CallState::Invoking,
        };
        self.raw
            .compare_exchange(from as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
