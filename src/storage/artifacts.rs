// 截图文件存储 - 负责文件命名与写入

use chrono::{DateTime, Local};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::error::CaptureError;
use crate::models::CaptureArtifact;
use crate::utils::file_system::ensure_dir;

/// 截图文件名前缀
pub const ARTIFACT_PREFIX: &str = "screenshot_";
/// 最新截图的固定文件名
pub const LATEST_FILE_NAME: &str = "latest.png";
/// 默认输出目录
pub const DEFAULT_OUTPUT_DIR: &str = "screenshots";

/// 根据截屏时间生成文件名，精度为秒
pub fn artifact_file_name(at: DateTime<Local>) -> String {
    format!("{}{}.png", ARTIFACT_PREFIX, at.format("%Y%m%d_%H%M%S"))
}

/// 截图存储
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    /// 输出目录
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 输出目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `latest.png` 的路径
    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST_FILE_NAME)
    }

    /// 确保输出目录存在
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        ensure_dir(&self.dir).await
    }

    /// 保存截图：写入带时间戳的文件，并用相同内容替换 `latest.png`
    ///
    /// 同一秒内的重名文件会被直接覆盖
    pub async fn save(
        &self,
        image: RgbaImage,
        at: DateTime<Local>,
    ) -> Result<CaptureArtifact, CaptureError> {
        let bytes = tokio::task::spawn_blocking(move || encode_png(&image))
            .await
            .map_err(|e| CaptureError::Encode(e.to_string()))??;

        self.ensure_dir().await?;

        let file_name = artifact_file_name(at);
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;

        // 先写临时文件再改名，读取方不会看到写了一半的 latest.png
        let latest = self.latest_path();
        let staging = self.dir.join(format!("{}.tmp", LATEST_FILE_NAME));
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &latest).await?;

        trace!("截图保存成功: {:?} ({} 字节)", path, bytes.len());

        Ok(CaptureArtifact {
            file_name,
            path,
            captured_at: at,
        })
    }
}

/// 把 RGBA 图像编码为 PNG
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgba8,
        )
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(bytes)
}
