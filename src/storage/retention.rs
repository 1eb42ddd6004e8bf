// 截图保留策略 - 只保留最新的 N 张截图
//
// 清理失败不会中断截屏循环，只记录在报告中

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing::{info, warn};

/// 时间戳截图文件名，`latest.png` 不匹配
fn artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^screenshot_\d{8}_\d{6}\.png$").expect("截图文件名正则无效")
    })
}

/// 判断文件名是否为时间戳截图
pub fn is_artifact_name(name: &str) -> bool {
    artifact_pattern().is_match(name)
}

/// 清理结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// 找到的截图数量
    pub scanned: usize,
    /// 已删除的文件名
    pub removed: Vec<String>,
    /// 删除失败的文件列表（文件名，错误信息）
    pub failed: Vec<(String, String)>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Candidate {
    name: String,
    modified: SystemTime,
}

/// 保留管理器
#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionManager;

impl RetentionManager {
    pub fn new() -> Self {
        Self
    }

    /// 执行保留策略：按修改时间从新到旧排序，删除第 `keep` 个之后的所有截图
    ///
    /// 修改时间相同时按文件名倒序，保证排序结果确定
    pub async fn enforce(&self, dir: &Path, keep: usize) -> RetentionReport {
        let mut report = RetentionReport::default();

        let candidates = match list_artifacts(dir).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("扫描截图目录失败 {:?}: {}", dir, e);
                report.failed.push((dir.to_string_lossy().to_string(), e.to_string()));
                return report;
            }
        };

        report.scanned = candidates.len();
        prune(dir, candidates, keep, &mut report).await;
        report
    }
}

/// 排序后删除第 `keep` 个之后的截图，单个文件删除失败不影响其余文件
async fn prune(
    dir: &Path,
    mut candidates: Vec<Candidate>,
    keep: usize,
    report: &mut RetentionReport,
) {
    if candidates.len() <= keep {
        return;
    }

    candidates.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.name.cmp(&a.name))
    });

    for candidate in candidates.into_iter().skip(keep) {
        let path = dir.join(&candidate.name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("删除旧截图: {}", candidate.name);
                report.removed.push(candidate.name);
            }
            Err(e) => {
                warn!("删除旧截图失败 {}: {}", candidate.name, e);
                report.failed.push((candidate.name, e.to_string()));
            }
        }
    }
}

/// 列出目录中的时间戳截图
async fn list_artifacts(dir: &Path) -> std::io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_artifact_name(&name) {
            continue;
        }

        // 文件可能已被外部删除，跳过即可
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push(Candidate { name, modified });
    }

    Ok(candidates)
}
