use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::models::CaptureRegion;

/// 默认截屏间隔（秒）
pub const DEFAULT_INTERVAL_SECS: f64 = 5.0;
/// 默认保留数量
pub const DEFAULT_KEEP: usize = 100;

/// 可持久化的截屏设置
///
/// 所有字段都可缺省：命令行参数覆盖配置文件，未设置的再取默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// 截屏间隔（秒）
    pub interval: Option<f64>,
    /// 最大截屏数量
    pub max_count: Option<u32>,
    /// 保留数量
    pub keep: Option<usize>,
    /// 截屏选区
    pub region: Option<CaptureRegion>,
    /// 选区所在的显示器
    pub monitor: Option<usize>,
    /// 输出目录
    pub output_dir: Option<PathBuf>,
}

impl CaptureSettings {
    /// 用 `over` 中已设置的字段覆盖当前值
    pub fn overlay(self, over: CaptureSettings) -> Self {
        Self {
            interval: over.interval.or(self.interval),
            max_count: over.max_count.or(self.max_count),
            keep: over.keep.or(self.keep),
            region: over.region.or(self.region),
            monitor: over.monitor.or(self.monitor),
            output_dir: over.output_dir.or(self.output_dir),
        }
    }

    pub fn interval_or_default(&self) -> f64 {
        self.interval.unwrap_or(DEFAULT_INTERVAL_SECS)
    }

    pub fn keep_or_default(&self) -> usize {
        self.keep.unwrap_or(DEFAULT_KEEP)
    }

    pub fn output_dir_or_default(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::storage::DEFAULT_OUTPUT_DIR))
    }
}

pub struct SettingsManager {
    path: PathBuf,
    data: RwLock<CaptureSettings>,
}

impl SettingsManager {
    /// 读取配置文件，不存在时写入一份空配置
    ///
    /// 空文件视为默认配置，其他读取错误返回 `ConfigError::SettingsFile`
    pub async fn new(path: PathBuf) -> Result<Self, ConfigError> {
        let fail = |reason: String| ConfigError::SettingsFile {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice::<CaptureSettings>(&bytes)
                .map_err(|e| fail(e.to_string()))?,
            Ok(_) => CaptureSettings::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let default = CaptureSettings::default();
                let json =
                    serde_json::to_string_pretty(&default).map_err(|e| fail(e.to_string()))?;
                tokio::fs::write(&path, json)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                default
            }
            // 文件存在但无法读取时不能覆盖用户的配置
            Err(e) => return Err(fail(e.to_string())),
        };

        Ok(Self {
            path,
            data: RwLock::new(initial),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> CaptureSettings {
        self.data.read().await.clone()
    }

    /// 合并更新并写回文件
    pub async fn update(&self, update: CaptureSettings) -> Result<CaptureSettings, ConfigError> {
        let mut settings = self.data.write().await;
        *settings = settings.clone().overlay(update);

        self.save(&settings).await?;
        Ok(settings.clone())
    }

    async fn save(&self, settings: &CaptureSettings) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::SettingsFile {
            path: self.path.clone(),
            reason,
        };
        let json = serde_json::to_string_pretty(settings).map_err(|e| fail(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(())
    }
}
