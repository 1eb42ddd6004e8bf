//! 输入验证工具函数
//!
//! 在截屏循环启动之前验证用户输入，无效配置不会进入循环

use crate::error::ConfigError;

/// 选区宽高的下限（不含）
pub const MIN_REGION_SIZE: u32 = 10;

/// 验证截屏间隔（秒）
///
/// # 返回
/// - `Ok(())`: 验证通过
/// - `Err(ConfigError)`: 间隔为零、负数或非有限值
pub fn validate_interval(interval: f64) -> Result<(), ConfigError> {
    if !interval.is_finite() || interval <= 0.0 {
        return Err(ConfigError::InvalidInterval(interval));
    }
    Ok(())
}

/// 验证最大截屏数量，`None` 表示不限
pub fn validate_max_count(max_count: Option<u32>) -> Result<(), ConfigError> {
    match max_count {
        Some(0) => Err(ConfigError::InvalidMaxCount),
        _ => Ok(()),
    }
}

/// 验证保留数量
pub fn validate_keep(keep: usize) -> Result<(), ConfigError> {
    if keep == 0 {
        return Err(ConfigError::InvalidKeep);
    }
    Ok(())
}

/// 验证选区尺寸
pub fn validate_region_size(width: u32, height: u32) -> Result<(), ConfigError> {
    if width <= MIN_REGION_SIZE || height <= MIN_REGION_SIZE {
        return Err(ConfigError::RegionTooSmall {
            width,
            height,
            min: MIN_REGION_SIZE,
        });
    }
    Ok(())
}
