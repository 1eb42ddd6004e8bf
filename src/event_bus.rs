// 事件总线 - 截屏循环与展示层之间的解耦通信
//
// 调度器只依赖 CaptureObserver，EventBus 把通知转成广播事件
// 使用 tokio::sync::broadcast 实现事件分发

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::{CaptureArtifact, CaptureState, RunSummary, ERROR_THRESHOLD};
use crate::storage::RetentionReport;

/// 单次截屏的结果
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// 截图已保存并完成清理
    Saved {
        artifact: CaptureArtifact,
        retention: RetentionReport,
    },
    /// 截屏失败
    Failed { error: String },
}

/// 截屏循环观察者
///
/// 在调度器任务中同步调用，返回后才会开始下一次截屏
pub trait CaptureObserver: Send + Sync {
    /// 每次截屏后调用，携带更新后的状态快照
    fn on_tick(&self, state: &CaptureState, outcome: &TickOutcome);

    /// 循环结束后调用
    fn on_stop(&self, summary: &RunSummary);
}

/// 应用事件枚举
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// 截图已保存
    ScreenshotCaptured {
        artifact: CaptureArtifact,
        captures_taken: u32,
        removed: usize,
    },

    /// 截屏失败
    CaptureFailed {
        error: String,
        consecutive_errors: u32,
    },

    /// 清理时有文件删除失败
    RetentionFailed { failed: Vec<(String, String)> },

    /// 截屏循环结束
    CaptureStopped { summary: RunSummary },
}

/// 事件总线
///
/// 使用 broadcast channel 实现发布/订阅模式
/// 支持多个订阅者同时接收事件
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小,建议 100-1000
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者,事件会被丢弃(这是正常的)
    pub fn publish(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl CaptureObserver for EventBus {
    fn on_tick(&self, state: &CaptureState, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Saved {
                artifact,
                retention,
            } => {
                self.publish(AppEvent::ScreenshotCaptured {
                    artifact: artifact.clone(),
                    captures_taken: state.captures_taken,
                    removed: retention.removed.len(),
                });
                if !retention.is_clean() {
                    self.publish(AppEvent::RetentionFailed {
                        failed: retention.failed.clone(),
                    });
                }
            }
            TickOutcome::Failed { error } => {
                self.publish(AppEvent::CaptureFailed {
                    error: error.clone(),
                    consecutive_errors: state.consecutive_errors,
                });
            }
        }
    }

    fn on_stop(&self, summary: &RunSummary) {
        self.publish(AppEvent::CaptureStopped {
            summary: summary.clone(),
        });
    }
}

/// 启动控制台报告任务，把事件写入日志
///
/// 所有发送端被释放后任务自动结束
pub fn spawn_console_reporter(mut receiver: broadcast::Receiver<AppEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => report_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("控制台报告落后，跳过 {} 条事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn report_event(event: &AppEvent) {
    match event {
        AppEvent::ScreenshotCaptured {
            artifact,
            captures_taken,
            removed,
        } => {
            info!("Screenshot {} saved: {}", captures_taken, artifact.file_name);
            if *removed > 0 {
                info!("已清理 {} 张旧截图", removed);
            }
        }
        AppEvent::CaptureFailed {
            error,
            consecutive_errors,
        } => {
            error!(
                "Error taking screenshot: {} (errors: {}/{})",
                error, consecutive_errors, ERROR_THRESHOLD
            );
        }
        AppEvent::RetentionFailed { failed } => {
            for (name, err) in failed {
                warn!("清理失败 {}: {}", name, err);
            }
        }
        AppEvent::CaptureStopped { summary } => {
            info!(
                "截屏已停止 ({})。共 {} 张截图保存在 {:?}",
                summary.reason, summary.state.captures_taken, summary.output_dir
            );
        }
    }
}
