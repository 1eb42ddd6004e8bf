// 错误类型定义
//
// 配置错误在启动前报告并终止进程；截屏错误只计入状态，由调度器吸收

use std::path::PathBuf;

/// 配置错误 - 在循环启动之前检测
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("截屏间隔必须为正数: {0}")]
    InvalidInterval(f64),

    #[error("最大截屏数量必须为正数")]
    InvalidMaxCount,

    #[error("保留数量必须为正数")]
    InvalidKeep,

    #[error("选区太小: {width}x{height}，宽高都必须大于 {min}")]
    RegionTooSmall { width: u32, height: u32, min: u32 },

    #[error("无效的选区格式 `{0}`，应为 LEFT,TOP,WIDTH,HEIGHT")]
    InvalidRegion(String),

    #[error("显示器 #{0} 不存在")]
    UnknownMonitor(usize),

    #[error("读取配置文件 {path:?} 失败: {reason}")]
    SettingsFile { path: PathBuf, reason: String },
}

/// 单次截屏失败
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("未找到可用屏幕")]
    NoScreens,

    #[error("选区 ({0}, {1}) 不在任何屏幕内")]
    ScreenNotFound(i32, i32),

    #[error("截屏失败: {0}")]
    Capture(String),

    #[error("PNG 编码失败: {0}")]
    Encode(String),

    #[error("文件写入失败: {0}")]
    Io(#[from] std::io::Error),
}
