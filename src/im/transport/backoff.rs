use std::time::Duration;

/// 重连 / 重试退避策略：指数增长，封顶
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// 第一次重试前的等待
    pub initial: Duration,
    /// 单次等待上限
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// 第 `attempt` 次（从 0 开始）重试前的等待：initial * 2^attempt，不超过 max
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}
