// 数据模型模块 - 定义所有的数据结构

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::utils::validation::{
    validate_interval, validate_keep, validate_max_count, validate_region_size,
};

/// 连续失败达到该次数后自动停止
pub const ERROR_THRESHOLD: u32 = 5;

/// 截屏选区（虚拟屏幕坐标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// 创建选区，宽高必须大于最小尺寸
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Result<Self, ConfigError> {
        validate_region_size(width, height)?;
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// 由拖拽手势生成选区
    ///
    /// `start`/`end` 是相对于所选显示器的坐标，`origin` 是该显示器在虚拟屏幕中的左上角。
    /// 任意方向拖拽都会被规整为左上角 + 正宽高
    pub fn from_drag(
        start: (i32, i32),
        end: (i32, i32),
        origin: (i32, i32),
    ) -> Result<Self, ConfigError> {
        let overflow = || {
            ConfigError::InvalidRegion(format!(
                "拖拽 {:?} -> {:?} 加原点 {:?} 超出坐标范围",
                start, end, origin
            ))
        };

        let x1 = start.0.min(end.0).checked_add(origin.0).ok_or_else(overflow)?;
        let y1 = start.1.min(end.1).checked_add(origin.1).ok_or_else(overflow)?;
        let x2 = start.0.max(end.0).checked_add(origin.0).ok_or_else(overflow)?;
        let y2 = start.1.max(end.1).checked_add(origin.1).ok_or_else(overflow)?;

        Self::new(x1, y1, x2.abs_diff(x1), y2.abs_diff(y1))
    }

    /// 解析 `LEFT,TOP,WIDTH,HEIGHT` 格式
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRegion(text.to_string());

        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(invalid());
        }

        let left = parts[0].parse::<i32>().map_err(|_| invalid())?;
        let top = parts[1].parse::<i32>().map_err(|_| invalid())?;
        let width = parts[2].parse::<u32>().map_err(|_| invalid())?;
        let height = parts[3].parse::<u32>().map_err(|_| invalid())?;

        Self::new(left, top, width, height)
    }

    /// 平移选区（用于把显示器内坐标换算为虚拟屏幕坐标）
    pub fn offset_by(self, dx: i32, dy: i32) -> Result<Self, ConfigError> {
        match (self.left.checked_add(dx), self.top.checked_add(dy)) {
            (Some(left), Some(top)) => Ok(Self { left, top, ..self }),
            _ => Err(ConfigError::InvalidRegion(format!(
                "{} 偏移 ({}, {}) 超出坐标范围",
                self, dx, dy
            ))),
        }
    }
}

impl fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ ({}, {})",
            self.width, self.height, self.left, self.top
        )
    }
}

/// 截屏运行参数
///
/// 构造时完成验证，运行期间不可变
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    interval: Duration,
    max_count: Option<u32>,
    keep: usize,
    region: Option<CaptureRegion>,
}

impl CaptureConfig {
    pub fn new(
        interval_secs: f64,
        max_count: Option<u32>,
        keep: usize,
        region: Option<CaptureRegion>,
    ) -> Result<Self, ConfigError> {
        validate_interval(interval_secs)?;
        validate_max_count(max_count)?;
        validate_keep(keep)?;
        if let Some(region) = &region {
            validate_region_size(region.width, region.height)?;
        }

        let interval = Duration::try_from_secs_f64(interval_secs)
            .map_err(|_| ConfigError::InvalidInterval(interval_secs))?;

        Ok(Self {
            interval,
            max_count,
            keep,
            region,
        })
    }

    /// 截屏间隔
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 最大截屏数量，`None` 表示不限
    pub fn max_count(&self) -> Option<u32> {
        self.max_count
    }

    /// 保留的截图数量
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// 截屏选区，`None` 表示整个虚拟屏幕
    pub fn region(&self) -> Option<CaptureRegion> {
        self.region
    }

    /// 是否已达到最大数量
    pub fn limit_reached(&self, captures_taken: u32) -> bool {
        self.max_count
            .map(|max| captures_taken >= max)
            .unwrap_or(false)
    }
}

/// 一张已保存的截图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureArtifact {
    /// 文件名
    pub file_name: String,
    /// 文件路径
    pub path: PathBuf,
    /// 截屏时间
    pub captured_at: DateTime<Local>,
}

/// 运行状态快照
///
/// 只由调度器任务写入，其他地方只能拿到快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureState {
    /// 已成功截屏次数
    pub captures_taken: u32,
    /// 连续失败次数，成功后清零
    pub consecutive_errors: u32,
    /// 循环是否正在运行
    pub running: bool,
    /// 最近一次错误
    pub last_error: Option<String>,
    /// 最近一次保存的截图
    pub last_artifact: Option<CaptureArtifact>,
}

impl CaptureState {
    /// 记录一次成功截屏
    pub fn record_success(&mut self, artifact: CaptureArtifact) {
        self.captures_taken += 1;
        self.consecutive_errors = 0;
        self.last_error = None;
        self.last_artifact = Some(artifact);
    }

    /// 记录一次失败，返回是否达到连续失败阈值
    pub fn record_failure(&mut self, error: String) -> bool {
        self.consecutive_errors += 1;
        self.last_error = Some(error);
        self.consecutive_errors >= ERROR_THRESHOLD
    }
}

/// 循环停止原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// 已达到最大截屏数量
    MaximumReached,
    /// 连续失败次数过多
    TooManyConsecutiveErrors(u32),
    /// 外部请求停止（用户中断等）
    Requested(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaximumReached => write!(f, "maximum reached"),
            Self::TooManyConsecutiveErrors(count) => {
                write!(f, "too many consecutive errors ({})", count)
            }
            Self::Requested(reason) => write!(f, "stopped: {}", reason),
        }
    }
}

/// 一次运行结束后的汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// 运行ID
    pub run_id: Uuid,
    /// 最终状态
    pub state: CaptureState,
    /// 停止原因
    pub reason: StopReason,
    /// 输出目录
    pub output_dir: PathBuf,
}
