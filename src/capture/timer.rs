// 可取消的等待
//
// 截屏间隔期间等待定时器或取消令牌，先到者为准

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// 等满了整个时长
    Elapsed,
    /// 等待期间收到取消
    Cancelled,
}

/// 等待 `duration`，令牌被取消时立即返回
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> SleepOutcome {
    if token.is_cancelled() {
        return SleepOutcome::Cancelled;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => SleepOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
    }
}
