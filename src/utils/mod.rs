//! 工具函数模块
//!
//! 提供各类通用工具函数，包括：
//! - 输入验证
//! - 文件系统操作
//! - 时钟抽象

pub mod clock;
pub mod file_system;
pub mod validation;

// 重新导出常用函数
pub use clock::*;
pub use file_system::*;
pub use validation::*;
