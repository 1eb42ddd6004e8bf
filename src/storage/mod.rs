// 存储模块 - 截图文件写入与保留策略

// 子模块
pub mod artifacts;
pub mod retention;

// 重新导出主要类型
pub use artifacts::{artifact_file_name, ArtifactStore, DEFAULT_OUTPUT_DIR, LATEST_FILE_NAME};
pub use retention::{RetentionManager, RetentionReport};
