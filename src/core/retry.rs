use crate::core::error::RemoteError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// 远程调用的重试策略：仅重试 Transient 错误，指数退避
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 首次失败后的额外尝试次数
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// 第 attempt 次重试前的等待时间：base * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} 失败，{}ms 后重试 ({}/{}): {}",
                        what,
                        delay.as_millis(),
                        attempt + 1,
                        self.attempts,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!("{} 最终失败 (已重试{}次): {}", what, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy
            .run("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::transient("timeout"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::transient("503"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::auth("401"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
