// ==========================================
// 配件目录同步 - 写入重试（指数退避）
// ==========================================
// 用途: 原子写入 / 快照恢复遇到瞬时错误（数据库忙、锁竞争）时重试
// 约束: 每次尝试都是完整事务，失败即整体回滚，因此重试不会产生部分写入
// ==========================================

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试（测试 / 诊断用）
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 attempt 次失败后的等待时长（attempt 从 1 开始）
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// true: 瞬时错误但已用尽重试次数；false: 非瞬时错误，立即放弃
    pub exhausted: bool,
}

/// 按策略执行操作，仅对 is_retryable 判定为瞬时的错误重试
pub async fn retry_with_backoff<T, E, Fut, Op, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: Op,
) -> Result<RetryOutcome<T>, RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) => {
                let retryable = is_retryable(&error);
                if !retryable || attempt >= max_attempts {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: retryable,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "瞬时错误，准备重试"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(10), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(3), |_: &String| true, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("busy".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<RetryOutcome<()>, _> =
            retry_with_backoff(&fast_policy(5), |_: &String| false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("constraint".to_string()) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let result: Result<RetryOutcome<()>, _> =
            retry_with_backoff(&fast_policy(2), |_: &String| true, |_| async {
                Err("locked".to_string())
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(failure.exhausted);
    }
}
