use clap::Parser;
use screen_keeper_lib::app::{self, Cli};
use screen_keeper_lib::error::ConfigError;
use screen_keeper_lib::logger::{self, LoggerOptions};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // 参数解析失败按配置错误处理（退出码 1），--help/--version 正常退出
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let _guard = match logger::init(&LoggerOptions {
        log_dir: cli.log_dir.clone(),
        verbose: cli.verbose,
    }) {
        Ok(guard) => Some(guard),
        Err(e) => {
            // 文件日志不可用时退回到仅控制台输出，保证运行信息仍可见
            if let Err(console_err) = logger::init_console(cli.verbose) {
                eprintln!("日志系统初始化失败: {:#}; {:#}", e, console_err);
                return ExitCode::FAILURE;
            }
            warn!("文件日志不可用，仅输出到控制台: {:#}", e);
            None
        }
    };

    if cli.list_monitors {
        return match app::print_monitors() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("获取显示器列表失败: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    let result = match app::load_settings(&cli).await {
        Ok(settings) => app::run(settings).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            info!(
                "Screenshot capture stopped. Total screenshots taken: {}",
                summary.state.captures_taken
            );
            ExitCode::SUCCESS
        }
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("截屏程序异常退出: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
