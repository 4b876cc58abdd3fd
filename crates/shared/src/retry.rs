//! 指数退避
//!
//! outbox 分发器与消费端延迟重投共用。两者都不设重试上限，
//! 这里只负责回答"第 N 次失败后该等多久"。

use std::time::Duration;

/// 退避策略
///
/// 第 `attempt` 次失败（从 0 计）后等待 `initial_delay * multiplier^attempt`，
/// 不超过 `max_delay`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 500ms 起步，上限 30 秒
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// 倍数为 2 的无上限退避
    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
