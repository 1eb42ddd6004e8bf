// 截屏模块 - 负责捕获整个虚拟屏幕或指定选区

use async_trait::async_trait;
use image::RgbaImage;
#[cfg(not(target_os = "macos"))]
use image::imageops;
use screenshots::Screen;
use serde::Serialize;
use tracing::{info, trace};
#[cfg(not(target_os = "macos"))]
use tracing::warn;

use crate::error::{CaptureError, ConfigError};
use crate::models::CaptureRegion;

pub mod scheduler;
pub mod timer;

/// 单次截屏能力，由调度器注入调用
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// 执行一次截屏，返回原始 RGBA 图像
    async fn capture(&self) -> Result<RgbaImage, CaptureError>;
}

/// 显示器信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySummary {
    pub index: usize,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    pub is_primary: bool,
}

impl DisplaySummary {
    /// 显示器左上角在虚拟屏幕中的坐标
    pub fn origin(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// 整个显示器作为选区
    pub fn as_region(&self) -> Result<CaptureRegion, ConfigError> {
        CaptureRegion::new(self.x, self.y, self.width, self.height)
    }

    #[cfg_attr(target_os = "macos", allow(dead_code))]
    fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as i64) < self.x as i64 + self.width as i64
            && (y as i64) < self.y as i64 + self.height as i64
    }
}

/// 列出所有显示器
pub fn list_displays() -> Result<Vec<DisplaySummary>, CaptureError> {
    let screens = Screen::all().map_err(|e| CaptureError::Capture(e.to_string()))?;
    Ok(summarize(&screens))
}

fn summarize(screens: &[Screen]) -> Vec<DisplaySummary> {
    screens
        .iter()
        .enumerate()
        .map(|(index, screen)| {
            let info = screen.display_info;
            DisplaySummary {
                index,
                x: info.x,
                y: info.y,
                width: info.width,
                height: info.height,
                scale_factor: info.scale_factor,
                is_primary: info.is_primary,
            }
        })
        .collect()
}

/// 在显示器列表中按序号查找
pub fn find_display(
    displays: &[DisplaySummary],
    index: usize,
) -> Result<DisplaySummary, ConfigError> {
    displays
        .iter()
        .find(|d| d.index == index)
        .copied()
        .ok_or(ConfigError::UnknownMonitor(index))
}

/// 截屏管理器
pub struct ScreenCapture {
    /// 可用屏幕列表
    screens: Vec<Screen>,
    /// 截屏选区，`None` 表示所有屏幕
    region: Option<CaptureRegion>,
}

impl ScreenCapture {
    /// 创建新的截屏管理器
    pub fn new(region: Option<CaptureRegion>) -> Result<Self, CaptureError> {
        let screens = Screen::all().map_err(|e| CaptureError::Capture(e.to_string()))?;
        if screens.is_empty() {
            return Err(CaptureError::NoScreens);
        }
        info!("检测到 {} 个屏幕", screens.len());

        // 打印每个屏幕的详细信息
        for screen_info in summarize(&screens) {
            info!(
                "屏幕 #{}: {}x{} @ ({}, {}){}",
                screen_info.index,
                screen_info.width,
                screen_info.height,
                screen_info.x,
                screen_info.y,
                if screen_info.is_primary { " [主屏]" } else { "" }
            );
        }

        match &region {
            Some(region) => info!("截屏选区: {}", region),
            None => info!("截屏范围: 所有屏幕"),
        }

        Ok(Self { screens, region })
    }

    /// 当前选区
    pub fn region(&self) -> Option<CaptureRegion> {
        self.region
    }
}

#[async_trait]
impl CaptureSource for ScreenCapture {
    async fn capture(&self) -> Result<RgbaImage, CaptureError> {
        let screens = self.screens.clone();
        let region = self.region;

        tokio::task::spawn_blocking(move || grab(&screens, region))
            .await
            .map_err(|e| CaptureError::Capture(e.to_string()))?
    }
}

// 在 macOS 上使用系统原生截图命令，避免截取到应用窗口
#[cfg(target_os = "macos")]
fn grab(_screens: &[Screen], region: Option<CaptureRegion>) -> Result<RgbaImage, CaptureError> {
    use std::process::Command;
    use tempfile::Builder;
    use tracing::warn;

    // 创建临时文件用于保存截图（使用 keep 避免自动删除）
    let temp_file = Builder::new()
        .prefix("screenshot_")
        .suffix(".png")
        .tempfile()?;

    let (file, temp_path) = temp_file
        .keep()
        .map_err(|e| CaptureError::Io(e.error))?;

    drop(file); // 关闭文件句柄，让 screencapture 能写入

    // -x: 不播放快门声音
    // -C: 不包含光标
    // -t png: 输出格式为 PNG
    let mut command = Command::new("screencapture");
    command.arg("-x").arg("-C").arg("-t").arg("png");
    if let Some(region) = region {
        command.arg(format!(
            "-R{},{},{},{}",
            region.left, region.top, region.width, region.height
        ));
    }

    let output = command.arg(&temp_path).output()?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr).to_string();
        let _ = std::fs::remove_file(&temp_path);
        return Err(CaptureError::Capture(format!(
            "screencapture 命令执行失败: {}",
            error
        )));
    }

    let img = image::open(&temp_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        CaptureError::Capture(format!("读取截图文件失败: {}", e))
    })?;

    if let Err(e) = std::fs::remove_file(&temp_path) {
        warn!("删除临时截图文件失败: {}", e);
    }

    trace!("使用 screencapture 命令截屏成功");
    Ok(img.to_rgba8())
}

// 在其他平台使用 screenshots crate
#[cfg(not(target_os = "macos"))]
fn grab(screens: &[Screen], region: Option<CaptureRegion>) -> Result<RgbaImage, CaptureError> {
    match region {
        Some(region) => grab_region(screens, region),
        None => grab_all(screens),
    }
}

/// 截取选区：选区左上角所在的屏幕负责截取
#[cfg(not(target_os = "macos"))]
fn grab_region(screens: &[Screen], region: CaptureRegion) -> Result<RgbaImage, CaptureError> {
    let displays = summarize(screens);
    let screen_info = displays
        .iter()
        .find(|d| d.contains(region.left, region.top))
        .ok_or(CaptureError::ScreenNotFound(region.left, region.top))?;

    let screen = &screens[screen_info.index];
    let image = screen
        .capture_area(
            region.left - screen_info.x,
            region.top - screen_info.y,
            region.width,
            region.height,
        )
        .map_err(|e| CaptureError::Capture(e.to_string()))?;

    trace!("截取选区 {} 成功（屏幕 #{}）", region, screen_info.index);
    Ok(image)
}

/// 截取所有屏幕并拼接为虚拟屏幕
#[cfg(not(target_os = "macos"))]
fn grab_all(screens: &[Screen]) -> Result<RgbaImage, CaptureError> {
    let mut captures = Vec::new();

    for (screen_info, screen) in summarize(screens).into_iter().zip(screens) {
        match screen.capture() {
            Ok(image) => {
                trace!("截取屏幕 #{} 成功", screen_info.index);
                captures.push((screen_info, image));
            }
            Err(err) => {
                warn!("截取屏幕 #{} 失败: {}", screen_info.index, err);
            }
        }
    }

    if captures.is_empty() {
        return Err(CaptureError::Capture("未能获取到任何屏幕截图".to_string()));
    }

    combine_screens(captures)
}

/// 按屏幕在虚拟屏幕中的位置拼接图像
///
/// 截图是物理像素，显示器坐标是逻辑坐标，需要按缩放比例换算
#[cfg(not(target_os = "macos"))]
fn combine_screens(captures: Vec<(DisplaySummary, RgbaImage)>) -> Result<RgbaImage, CaptureError> {
    if captures.len() == 1 {
        if let Some((_, image)) = captures.into_iter().next() {
            return Ok(image);
        }
        return Err(CaptureError::NoScreens);
    }

    struct Placed {
        x: i64,
        y: i64,
        image: RgbaImage,
    }

    let mut placed: Vec<Placed> = Vec::with_capacity(captures.len());

    for (info, image) in captures {
        let scale = pixel_scale(&info, image.width());
        placed.push(Placed {
            x: ((info.x as f32) * scale).round() as i64,
            y: ((info.y as f32) * scale).round() as i64,
            image,
        });
    }

    let min_x = placed.iter().map(|p| p.x).min().unwrap_or(0);
    let min_y = placed.iter().map(|p| p.y).min().unwrap_or(0);
    let max_x = placed
        .iter()
        .map(|p| p.x + p.image.width() as i64)
        .max()
        .unwrap_or(min_x);
    let max_y = placed
        .iter()
        .map(|p| p.y + p.image.height() as i64)
        .max()
        .unwrap_or(min_y);

    let canvas_width = (max_x - min_x).max(0) as u32;
    let canvas_height = (max_y - min_y).max(0) as u32;

    if canvas_width == 0 || canvas_height == 0 {
        return Err(CaptureError::Capture("屏幕尺寸无效".to_string()));
    }

    let mut canvas = RgbaImage::new(canvas_width, canvas_height);
    for p in placed {
        imageops::overlay(&mut canvas, &p.image, p.x - min_x, p.y - min_y);
    }

    Ok(canvas)
}

#[cfg(not(target_os = "macos"))]
fn pixel_scale(info: &DisplaySummary, image_width: u32) -> f32 {
    let scale = if info.width > 0 {
        image_width as f32 / info.width as f32
    } else {
        info.scale_factor
    };

    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}
