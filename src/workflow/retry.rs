//! exec 阶段的重试策略
//!
//! 重试只作用于 exec；prep / post 不重试。max_attempts 为总尝试次数（含首次），最少 1 次。

use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// 只尝试一次
    None,
    /// 固定间隔
    Fixed {
        max_attempts: usize,
        wait: Duration,
    },
    /// 指数退避：第 n 次重试前等待 initial * multiplier^n，不超过 max_wait
    Exponential {
        max_attempts: usize,
        initial_wait: Duration,
        max_wait: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy::None
    }

    pub fn fixed(max_attempts: usize, wait: Duration) -> Self {
        RetryPolicy::Fixed { max_attempts, wait }
    }

    pub fn exponential(
        max_attempts: usize,
        initial_wait: Duration,
        max_wait: Duration,
        multiplier: f64,
    ) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_wait,
            max_wait,
            multiplier,
        }
    }

    /// 总尝试次数（至少 1）
    pub fn max_attempts(&self) -> usize {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { max_attempts, .. } => (*max_attempts).max(1),
            RetryPolicy::Exponential { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    /// 第 `attempt` 次尝试（从 1 计）失败后是否还能再试
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts()
    }

    /// 第 `attempt` 次尝试（从 1 计）失败后、下一次尝试前的等待时间
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { wait, .. } => *wait,
            RetryPolicy::Exponential {
                initial_wait,
                max_wait,
                multiplier,
                ..
            } => {
                let exp = attempt.saturating_sub(1) as i32;
                let secs = initial_wait.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs < 0.0 || secs >= max_wait.as_secs_f64() {
                    *max_wait
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
        assert_eq!(policy.delay(1), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(50));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(50));
    }

    #[test]
    fn test_retry_policy_fixed_zero_means_one_attempt() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_exponential_with_cap() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
        );
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
    }
}
