//! 斐波那契退避。
//!
//! # 教案式说明
//! - **意图 (Why)**：监听端口被占用或短暂失效时，以逐步拉长的间隔重试，
//!   避免紧密循环打满日志与 CPU；
//! - **契约 (What)**：第 `n` 次重试前等待 `min(fib(n) * first, max)`，`fib` 从 `1, 1, 2, 3` 起步；
//!   设置了重试上限时，用尽后迭代器返回 `None`；
//! - **逻辑 (How)**：以迭代器形式暴露，调用方在每次失败后取下一个延迟，成功后调用
//!   [`FibonacciBackoff::reset`] 归零。

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FibonacciBackoff {
    first: Duration,
    max: Duration,
    max_retries: Option<u32>,
    attempt: u32,
    previous: u32,
    current: u32,
}

impl FibonacciBackoff {
    pub fn new(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max: max.max(first),
            max_retries: None,
            attempt: 0,
            previous: 0,
            current: 1,
        }
    }

    /// 限制最多重试的次数。
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// 已经产出的延迟个数。
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.previous = 0;
        self.current = 1;
    }
}

impl Iterator for FibonacciBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| self.attempt >= max) {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        let factor = self.current;
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        Some(self.first.saturating_mul(factor).min(self.max))
    }
}
