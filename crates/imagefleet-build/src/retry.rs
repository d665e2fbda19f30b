//! 一時的な失敗に対する再試行
//!
//! レジストリへのプッシュや外部ツールはネットワーク起因で失敗することがあるため、
//! 上限付きの指数バックオフで再試行する。ビルド自体は再試行しない。

use crate::error::BuildResult;
use std::future::Future;
use std::time::Duration;

/// 再試行ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む、1以上）
    pub max_attempts: u32,

    /// 初回再試行までの待機時間
    pub initial_delay: Duration,

    /// 待機時間の上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 再試行しないポリシー
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// `attempt` 回目の失敗後に待つ時間（attempt は1始まり）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 操作を実行し、一時的なエラーなら再試行する
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> BuildResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BuildResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
