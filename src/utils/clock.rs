//! 时钟抽象
//!
//! 截图文件名来自时钟，测试中可注入可控时钟

use chrono::{DateTime, Local};

/// 提供当前本地时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
