//! 应用程序启动流程
//!
//! 负责命令行应用的完整启动流程，包括：
//! - 命令行参数与配置文件合并
//! - 配置验证
//! - 截屏调度器与事件总线初始化
//! - Ctrl+C 中断处理

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use crate::capture::{find_display, list_displays, scheduler::CaptureScheduler, ScreenCapture};
use crate::event_bus::{spawn_console_reporter, EventBus};
use crate::models::{CaptureConfig, CaptureRegion, RunSummary};
use crate::settings::{CaptureSettings, SettingsManager};
use crate::storage::{ArtifactStore, LATEST_FILE_NAME};

/// 事件总线容量
const EVENT_BUS_CAPACITY: usize = 256;

/// 第二次中断时的退出码（128 + SIGINT）
const INTERRUPT_EXIT_CODE: i32 = 130;

/// 定时截屏，只保留最新的若干张
#[derive(Debug, Parser)]
#[command(name = "screen-keeper", version)]
#[command(after_help = "示例:
  screen-keeper                            # 默认设置，每 5 秒截取全部屏幕
  screen-keeper --max-count 20             # 最多截取 20 张
  screen-keeper --interval 10 --keep 5     # 每 10 秒一张，只保留 5 张
  screen-keeper --monitor 1 --region 0,0,800,600")]
pub struct Cli {
    /// 截屏间隔（秒，默认 5）
    #[arg(short, long, allow_negative_numbers = true)]
    pub interval: Option<f64>,

    /// 最大截屏数量（默认不限）
    #[arg(short = 'n', long)]
    pub max_count: Option<u32>,

    /// 保留的截图数量（默认 100）
    #[arg(short, long)]
    pub keep: Option<usize>,

    /// 截屏选区 LEFT,TOP,WIDTH,HEIGHT（默认整个虚拟屏幕）
    #[arg(long, value_parser = CaptureRegion::parse, allow_hyphen_values = true)]
    pub region: Option<CaptureRegion>,

    /// 选区相对的显示器序号；未指定选区时截取整个显示器
    #[arg(long)]
    pub monitor: Option<usize>,

    /// 列出所有显示器后退出
    #[arg(long)]
    pub list_monitors: bool,

    /// 输出目录（默认 screenshots）
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON 配置文件，命令行参数优先
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 把本次命令行参数写回配置文件
    #[arg(long, requires = "config")]
    pub save_config: bool,

    /// 日志目录
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// 命令行中显式给出的设置
    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            interval: self.interval,
            max_count: self.max_count,
            keep: self.keep,
            region: self.region,
            monitor: self.monitor,
            output_dir: self.output.clone(),
        }
    }
}

/// 合并配置文件与命令行，得到最终设置
pub async fn load_settings(cli: &Cli) -> Result<CaptureSettings> {
    let overrides = cli.settings();

    let Some(path) = cli.config.clone() else {
        return Ok(overrides);
    };

    let manager = SettingsManager::new(path).await?;
    info!("已加载配置文件: {:?}", manager.path());

    if cli.save_config {
        let saved = manager.update(overrides).await?;
        info!("命令行参数已写回配置文件");
        return Ok(saved);
    }

    Ok(manager.get().await.overlay(overrides))
}

/// 由设置构造经过验证的运行参数
///
/// 指定显示器时才会枚举屏幕
pub fn build_config(settings: &CaptureSettings) -> Result<CaptureConfig> {
    let region = match settings.monitor {
        Some(index) => {
            let displays = list_displays()?;
            let display = find_display(&displays, index)?;
            let (x, y) = display.origin();
            match settings.region {
                Some(region) => Some(region.offset_by(x, y)?),
                None => Some(display.as_region()?),
            }
        }
        None => settings.region,
    };

    let config = CaptureConfig::new(
        settings.interval_or_default(),
        settings.max_count,
        settings.keep_or_default(),
        region,
    )?;
    Ok(config)
}

/// 打印显示器列表
pub fn print_monitors() -> Result<()> {
    for display in list_displays()? {
        println!(
            "Monitor {}: {}x{} at ({}, {}), scale {}{}",
            display.index,
            display.width,
            display.height,
            display.x,
            display.y,
            display.scale_factor,
            if display.is_primary { " [primary]" } else { "" }
        );
    }
    Ok(())
}

/// 第一次 Ctrl+C 请求停止，最终结果仍由 wait 返回；
/// 截屏卡住时第二次 Ctrl+C 直接退出进程
async fn handle_interrupts(scheduler: Arc<CaptureScheduler>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    scheduler.stop("interrupted by user").await;
    warn!("正在等待当前截屏完成，再次按 Ctrl+C 强制退出");

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("强制退出");
        std::process::exit(INTERRUPT_EXIT_CODE);
    }
}

/// 运行截屏循环直到结束或被中断
pub async fn run(settings: CaptureSettings) -> Result<RunSummary> {
    let config = build_config(&settings)?;
    let output_dir = settings.output_dir_or_default();

    let source = Arc::new(ScreenCapture::new(config.region())?);
    let scheduler = Arc::new(CaptureScheduler::new(ArtifactStore::new(&output_dir)));

    let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    let reporter = spawn_console_reporter(bus.subscribe());

    info!("Starting screenshot capture...");
    info!("Screenshots will be saved to: {:?}", output_dir);
    info!("Screenshots to keep: {}", config.keep());
    info!("Interval: {} seconds", config.interval().as_secs_f64());
    match config.max_count() {
        Some(max) => info!("Maximum screenshots: {}", max),
        None => info!("Maximum screenshots: infinite"),
    }
    info!(
        "Tip: check '{}' for the most recent screenshot",
        output_dir.join(LATEST_FILE_NAME).display()
    );
    info!("Press Ctrl+C to stop");

    scheduler.start(config, source, bus.clone()).await?;

    let interrupt = tokio::spawn(handle_interrupts(scheduler.clone()));

    let summary = scheduler.wait().await;
    interrupt.abort();

    // 释放最后一个发送端，报告任务输出剩余事件后退出
    drop(bus);
    let _ = reporter.await;

    summary
}
