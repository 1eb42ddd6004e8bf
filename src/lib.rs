// 定时截屏工具 - 主库

// 声明模块
pub mod app;
pub mod capture;
pub mod error;
pub mod event_bus;
pub mod logger;
pub mod models;
pub mod settings;
pub mod storage;
pub mod utils;

// 重新导出主要类型
pub use capture::{scheduler::CaptureScheduler, CaptureSource, ScreenCapture};
pub use error::{CaptureError, ConfigError};
pub use event_bus::{CaptureObserver, EventBus, TickOutcome};
pub use models::{CaptureConfig, CaptureRegion, CaptureState, RunSummary, StopReason};
pub use storage::{ArtifactStore, RetentionManager, RetentionReport};
