// 日志系统 - 同时输出到控制台和按天轮转的日志文件

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::{FormatTime, LocalTime};
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "screen-keeper.log";

/// 日志选项
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    /// 日志目录，`None` 时使用平台默认目录
    pub log_dir: Option<PathBuf>,
    /// 是否输出 debug 级别日志
    pub verbose: bool,
}

/// 初始化日志系统
///
/// 返回的 guard 必须保持到程序退出，否则文件日志会丢失尾部内容
pub fn init(options: &LoggerOptions) -> Result<WorkerGuard> {
    let log_dir = options
        .log_dir
        .clone()
        .unwrap_or_else(crate::utils::file_system::get_log_dir);

    // 创建日志目录
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("创建日志目录失败: {:?}", log_dir))?;

    // 配置日志输出到文件（每天轮转）
    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // 同时输出到控制台和文件
    let writer = std::io::stdout.and(non_blocking);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level(options.verbose))
        .with_writer(writer)
        .with_timer(timer())
        .with_target(false)
        .with_ansi(cfg!(debug_assertions)) // release 版本不使用颜色代码
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("设置全局日志订阅者失败")?;

    tracing::debug!("日志文件位置: {:?}", log_dir);
    Ok(guard)
}

/// 只输出到控制台的日志，文件日志不可用时使用
pub fn init_console(verbose: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level(verbose))
        .with_writer(std::io::stdout)
        .with_timer(timer())
        .with_target(false)
        .with_ansi(cfg!(debug_assertions))
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("设置全局日志订阅者失败")?;
    Ok(())
}

fn level(verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

// 使用本地时区
fn timer() -> impl FormatTime {
    LocalTime::new(time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ))
}
