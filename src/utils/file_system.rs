//! 文件系统操作工具
//!
//! 提供输出目录创建、日志目录访问等功能

use std::path::{Path, PathBuf};
use tracing::info;

/// 应用名，用于日志目录
const APP_NAME: &str = "screen-keeper";

/// 确保目录存在，不存在则创建
///
/// 路径已被普通文件占用时返回错误
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("路径已存在但不是目录: {}", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(path).await?;
            info!("已创建目录: {:?}", path);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// 获取日志目录路径（跨平台）
///
/// - macOS: ~/Library/Logs/screen-keeper
/// - Windows: %APPDATA%/screen-keeper/logs
/// - Linux: ~/.local/share/screen-keeper/logs
pub fn get_log_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join("Library/Logs").join(APP_NAME)
    } else if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join(APP_NAME).join("logs")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".local/share")
            .join(APP_NAME)
            .join("logs")
    }
}
