// 截屏调度器 - 负责定时截屏任务的调度
//
// 单个任务顺序执行：截屏 -> 保存 -> 清理 -> 通知 -> 等待
// 状态只由调度任务写入，外部通过 watch 快照或观察者读取

use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::timer::{sleep_or_cancel, SleepOutcome};
use super::CaptureSource;
use crate::error::CaptureError;
use crate::event_bus::{CaptureObserver, TickOutcome};
use crate::models::{
    CaptureArtifact, CaptureConfig, CaptureState, RunSummary, StopReason, ERROR_THRESHOLD,
};
use crate::storage::{ArtifactStore, RetentionManager};
use crate::utils::clock::{Clock, SystemClock};

/// 正在运行（或已结束但未回收）的任务
struct ActiveRun {
    run_id: Uuid,
    token: CancellationToken,
    /// 第一次停止请求的原因
    requested: Arc<OnceLock<String>>,
    /// 被 `wait` 取走后为 None
    handle: Option<JoinHandle<RunSummary>>,
}

/// 截屏调度器
pub struct CaptureScheduler {
    /// 截图存储
    store: ArtifactStore,
    /// 保留策略
    retention: RetentionManager,
    /// 文件名时钟
    clock: Arc<dyn Clock>,
    /// 状态快照
    state: Arc<watch::Sender<CaptureState>>,
    /// 当前任务
    run: Mutex<Option<ActiveRun>>,
}

impl CaptureScheduler {
    /// 创建新的调度器
    pub fn new(store: ArtifactStore) -> Self {
        let (state, _) = watch::channel(CaptureState::default());
        Self {
            store,
            retention: RetentionManager::new(),
            clock: Arc::new(SystemClock),
            state: Arc::new(state),
            run: Mutex::new(None),
        }
    }

    /// 替换文件名时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 截图存储
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// 启动截屏任务，立即返回运行ID
    pub async fn start(
        &self,
        config: CaptureConfig,
        source: Arc<dyn CaptureSource>,
        observer: Arc<dyn CaptureObserver>,
    ) -> Result<Uuid> {
        let mut run = self.run.lock().await;
        if self.is_running() {
            bail!("截屏任务已在运行");
        }

        self.store.ensure_dir().await?;

        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let requested = Arc::new(OnceLock::new());

        // 在生成任务之前标记为运行中，避免重复启动
        self.state.send_replace(CaptureState {
            running: true,
            ..Default::default()
        });

        info!(
            "截屏任务启动 [{}]: 间隔={:?}, 最大数量={}, 保留={}, 输出目录={:?}",
            run_id,
            config.interval(),
            config
                .max_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "不限".to_string()),
            config.keep(),
            self.store.dir()
        );

        let worker = CaptureLoop {
            run_id,
            config,
            source,
            observer,
            store: self.store.clone(),
            retention: self.retention,
            clock: self.clock.clone(),
            state: self.state.clone(),
            token: token.clone(),
            requested: requested.clone(),
        };

        let handle = tokio::task::spawn(worker.run());

        *run = Some(ActiveRun {
            run_id,
            token,
            requested,
            handle: Some(handle),
        });

        Ok(run_id)
    }

    /// 请求停止
    ///
    /// 不会打断正在进行的截屏，只阻止下一次截屏并结束当前等待。
    /// 返回是否有任务收到了请求
    pub async fn stop(&self, reason: impl Into<String>) -> bool {
        let run = self.run.lock().await;
        match run.as_ref() {
            Some(active) if self.is_running() => {
                let reason = reason.into();
                info!("请求停止截屏任务 [{}]: {}", active.run_id, reason);
                let _ = active.requested.set(reason);
                active.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 是否有任务在运行
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// 当前状态快照
    pub fn state(&self) -> CaptureState {
        self.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// 等待任务完全退出并返回最终结果
    pub async fn wait(&self) -> Result<RunSummary> {
        let handle = {
            let mut run = self.run.lock().await;
            run.as_mut()
                .and_then(|active| active.handle.take())
                .ok_or_else(|| anyhow!("没有可等待的截屏任务"))?
        };

        let summary = handle.await?;
        Ok(summary)
    }
}

/// 截屏循环，运行在独立任务中
struct CaptureLoop {
    run_id: Uuid,
    config: CaptureConfig,
    source: Arc<dyn CaptureSource>,
    observer: Arc<dyn CaptureObserver>,
    store: ArtifactStore,
    retention: RetentionManager,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<CaptureState>>,
    token: CancellationToken,
    requested: Arc<OnceLock<String>>,
}

impl CaptureLoop {
    async fn run(self) -> RunSummary {
        let mut state = CaptureState {
            running: true,
            ..Default::default()
        };

        let reason = loop {
            if self.config.limit_reached(state.captures_taken) {
                break StopReason::MaximumReached;
            }
            if self.token.is_cancelled() {
                break self.requested_reason();
            }

            match self.capture_once().await {
                Ok(artifact) => {
                    state.record_success(artifact.clone());
                    let retention = self
                        .retention
                        .enforce(self.store.dir(), self.config.keep())
                        .await;
                    debug!(
                        "第 {} 张截图已保存: {}",
                        state.captures_taken, artifact.file_name
                    );

                    self.state.send_replace(state.clone());
                    self.observer
                        .on_tick(&state, &TickOutcome::Saved { artifact, retention });
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!("截屏失败: {}", error);
                    let exhausted = state.record_failure(error.clone());
                    // 最后一次失败的通知已是停止后的状态
                    if exhausted {
                        state.running = false;
                    }

                    self.state.send_replace(state.clone());
                    self.observer.on_tick(&state, &TickOutcome::Failed { error });

                    if exhausted {
                        break StopReason::TooManyConsecutiveErrors(ERROR_THRESHOLD);
                    }
                }
            }

            if self.config.limit_reached(state.captures_taken) {
                continue;
            }

            if sleep_or_cancel(self.config.interval(), &self.token).await
                == SleepOutcome::Cancelled
            {
                break self.requested_reason();
            }
        };

        state.running = false;
        self.state.send_replace(state.clone());

        let summary = RunSummary {
            run_id: self.run_id,
            state,
            reason,
            output_dir: self.store.dir().to_path_buf(),
        };

        info!(
            "截屏任务结束 [{}]: {}，共 {} 张截图",
            self.run_id, summary.reason, summary.state.captures_taken
        );
        self.observer.on_stop(&summary);
        summary
    }

    /// 截屏并保存，保存失败也算一次截屏失败
    async fn capture_once(&self) -> Result<CaptureArtifact, CaptureError> {
        let image = self.source.capture().await?;
        self.store.save(image, self.clock.now()).await
    }

    fn requested_reason(&self) -> StopReason {
        StopReason::Requested(
            self.requested
                .get()
                .cloned()
                .unwrap_or_else(|| "cancelled".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::retention::is_artifact_name;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
    use image::{Rgba, RgbaImage};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    /// 按脚本返回成功或失败，脚本用完后一直成功
    struct ScriptedSource {
        script: std::sync::Mutex<VecDeque<bool>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: std::sync::Mutex::new(script.iter().copied().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn always_ok() -> Arc<Self> {
            Self::new(&[])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptureSource for ScriptedSource {
        async fn capture(&self) -> Result<RgbaImage, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                // 每次的图像尺寸不同，便于区分 latest.png 的内容
                Ok(RgbaImage::from_pixel(n, 1, Rgba([n as u8, 0, 0, 255])))
            } else {
                Err(CaptureError::Capture(format!("模拟失败 #{}", n)))
            }
        }
    }

    /// 第一次截屏停在 `release` 上，直到测试放行
    struct BlockingSource {
        started: Notify,
        release: Notify,
        calls: AtomicU32,
    }

    impl BlockingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Notify::new(),
                release: Notify::new(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CaptureSource for BlockingSource {
        async fn capture(&self) -> Result<RgbaImage, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(RgbaImage::from_pixel(n, 1, Rgba([0, 0, 0, 255])))
        }
    }

    /// 每次调用前进一秒的时钟
    struct SteppingClock {
        base: DateTime<Local>,
        ticks: AtomicI64,
    }

    impl SteppingClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                base: Local.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
                ticks: AtomicI64::new(0),
            })
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Local> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            self.base + ChronoDuration::seconds(n)
        }
    }

    /// 记录所有通知，并在通知时统计目录中的截图数量
    #[derive(Default)]
    struct RecordingObserver {
        dir: Option<PathBuf>,
        ticks: std::sync::Mutex<Vec<(CaptureState, bool)>>,
        artifact_counts: std::sync::Mutex<Vec<usize>>,
        stops: std::sync::Mutex<Vec<RunSummary>>,
    }

    impl RecordingObserver {
        fn watching(dir: &Path) -> Arc<Self> {
            Arc::new(Self {
                dir: Some(dir.to_path_buf()),
                ..Default::default()
            })
        }

        fn error_counts(&self) -> Vec<u32> {
            self.ticks
                .lock()
                .unwrap()
                .iter()
                .map(|(state, _)| state.consecutive_errors)
                .collect()
        }
    }

    impl CaptureObserver for RecordingObserver {
        fn on_tick(&self, state: &CaptureState, outcome: &TickOutcome) {
            let saved = matches!(outcome, TickOutcome::Saved { .. });
            self.ticks.lock().unwrap().push((state.clone(), saved));
            if let Some(dir) = &self.dir {
                self.artifact_counts.lock().unwrap().push(artifact_names(dir).len());
            }
        }

        fn on_stop(&self, summary: &RunSummary) {
            self.stops.lock().unwrap().push(summary.clone());
        }
    }

    fn artifact_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| is_artifact_name(name))
            .collect();
        names.sort();
        names
    }

    fn scheduler(dir: &Path) -> CaptureScheduler {
        CaptureScheduler::new(ArtifactStore::new(dir)).with_clock(SteppingClock::new())
    }

    #[tokio::test]
    async fn test_keep_three_of_five() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("screenshots");
        let scheduler = scheduler(&dir);
        let observer = RecordingObserver::watching(&dir);

        let config = CaptureConfig::new(0.01, Some(5), 3, None).unwrap();
        scheduler
            .start(config, ScriptedSource::always_ok(), observer.clone())
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();

        assert_eq!(summary.reason, StopReason::MaximumReached);
        assert_eq!(summary.state.captures_taken, 5);
        assert!(!summary.state.running);

        assert_eq!(
            artifact_names(&dir),
            vec![
                "screenshot_20240501_080002.png".to_string(),
                "screenshot_20240501_080003.png".to_string(),
                "screenshot_20240501_080004.png".to_string(),
            ]
        );

        // latest.png 与第 5 张截图内容一致
        let latest = std::fs::read(dir.join("latest.png")).unwrap();
        let fifth = std::fs::read(dir.join("screenshot_20240501_080004.png")).unwrap();
        assert_eq!(latest, fifth);
        assert_eq!(image::load_from_memory(&latest).unwrap().width(), 5);

        // 每次通知时清理都已完成
        let counts = observer.artifact_counts.lock().unwrap().clone();
        assert_eq!(counts, vec![1, 2, 3, 3, 3]);
        assert_eq!(observer.stops.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_count_two_with_one_second_interval() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let source = ScriptedSource::always_ok();

        let config = CaptureConfig::new(1.0, Some(2), 10, None).unwrap();
        let started = Instant::now();
        scheduler
            .start(config, source.clone(), Arc::new(RecordingObserver::default()))
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();

        assert_eq!(summary.reason, StopReason::MaximumReached);
        assert_eq!(summary.state.captures_taken, 2);
        assert_eq!(source.calls(), 2);
        // 达到上限后不再等待下一个间隔
        assert!(started.elapsed() < Duration::from_millis(1900));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_five_consecutive_failures_stop_the_loop() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let source = ScriptedSource::new(&[false; 8]);
        let observer = Arc::new(RecordingObserver::default());

        let config = CaptureConfig::new(0.01, None, 10, None).unwrap();
        scheduler
            .start(config, source.clone(), observer.clone())
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();

        assert_eq!(summary.reason, StopReason::TooManyConsecutiveErrors(5));
        assert_eq!(summary.state.captures_taken, 0);
        assert_eq!(source.calls(), 5);
        assert_eq!(observer.error_counts(), vec![1, 2, 3, 4, 5]);
        assert!(summary.state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_errors() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let source = ScriptedSource::new(&[false, false, false, false, true, false, true]);
        let observer = Arc::new(RecordingObserver::default());

        let config = CaptureConfig::new(0.01, Some(2), 10, None).unwrap();
        scheduler
            .start(config, source.clone(), observer.clone())
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();

        assert_eq!(observer.error_counts(), vec![1, 2, 3, 4, 0, 1, 0]);
        assert_eq!(summary.reason, StopReason::MaximumReached);
        assert_eq!(summary.state.captures_taken, 2);
        assert_eq!(summary.state.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_stop_during_sleep_is_prompt() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let source = ScriptedSource::always_ok();
        let mut updates = scheduler.subscribe();

        let config = CaptureConfig::new(30.0, None, 10, None).unwrap();
        scheduler
            .start(config, source.clone(), Arc::new(RecordingObserver::default()))
            .await
            .unwrap();
        assert!(scheduler.is_running());

        // 等第一张截图完成，循环进入等待
        updates
            .wait_for(|state| state.captures_taken == 1)
            .await
            .unwrap();

        let stop_at = Instant::now();
        assert!(scheduler.stop("user interrupt").await);
        let summary = tokio::time::timeout(Duration::from_millis(500), scheduler.wait())
            .await
            .expect("停止后应及时退出")
            .unwrap();

        assert!(stop_at.elapsed() < Duration::from_millis(100));
        assert_eq!(
            summary.reason,
            StopReason::Requested("user interrupt".to_string())
        );
        assert_eq!(summary.state.captures_taken, 1);
        assert_eq!(source.calls(), 1);
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop("again").await);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let observer = Arc::new(RecordingObserver::default());

        let config = CaptureConfig::new(30.0, None, 10, None).unwrap();
        scheduler
            .start(config.clone(), ScriptedSource::always_ok(), observer.clone())
            .await
            .unwrap();

        let second = scheduler
            .start(config, ScriptedSource::always_ok(), observer.clone())
            .await;
        assert!(second.is_err());

        scheduler.stop("test").await;
        scheduler.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_finish() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let observer = Arc::new(RecordingObserver::default());
        let config = CaptureConfig::new(0.01, Some(1), 10, None).unwrap();

        scheduler
            .start(config.clone(), ScriptedSource::always_ok(), observer.clone())
            .await
            .unwrap();
        scheduler.wait().await.unwrap();

        scheduler
            .start(config, ScriptedSource::always_ok(), observer.clone())
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();
        // 每次运行的计数从零开始
        assert_eq!(summary.state.captures_taken, 1);
        assert_eq!(observer.stops.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failures_count_as_errors() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();
        // 截图文件名被目录占用，写入必然失败
        for second in 0..5 {
            std::fs::create_dir(dir.join(format!("screenshot_20240501_08000{}.png", second)))
                .unwrap();
        }
        let scheduler = scheduler(dir);
        let source = ScriptedSource::always_ok();

        let config = CaptureConfig::new(0.01, None, 10, None).unwrap();
        scheduler
            .start(config, source.clone(), Arc::new(RecordingObserver::default()))
            .await
            .unwrap();
        let summary = scheduler.wait().await.unwrap();

        assert_eq!(summary.reason, StopReason::TooManyConsecutiveErrors(5));
        assert_eq!(summary.state.captures_taken, 0);
        assert_eq!(source.calls(), 5);
        assert!(!dir.join("latest.png").exists());
    }

    #[tokio::test]
    async fn test_start_rejects_file_as_output_dir() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let scheduler = scheduler(&blocker);
        let source = ScriptedSource::always_ok();

        let config = CaptureConfig::new(0.01, None, 10, None).unwrap();
        let result = scheduler
            .start(config, source.clone(), Arc::new(RecordingObserver::default()))
            .await;

        assert!(result.is_err());
        assert!(!scheduler.is_running());
        assert_eq!(source.calls(), 0);
        assert!(scheduler.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_exhausting_failure_reports_stopped_state() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        let observer = Arc::new(RecordingObserver::default());

        let config = CaptureConfig::new(0.01, None, 10, None).unwrap();
        scheduler
            .start(config, ScriptedSource::new(&[false; 5]), observer.clone())
            .await
            .unwrap();
        scheduler.wait().await.unwrap();

        let ticks = observer.ticks.lock().unwrap().clone();
        assert_eq!(ticks.len(), 5);
        let (last, _) = ticks.last().unwrap();
        assert_eq!(last.consecutive_errors, 5);
        assert!(!last.running);
        assert!(ticks[..4].iter().all(|(state, _)| state.running));
    }

    #[tokio::test]
    async fn test_stop_during_capture_finishes_that_tick() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("screenshots");
        let scheduler = scheduler(&dir);
        let source = BlockingSource::new();
        let observer = RecordingObserver::watching(&dir);

        let config = CaptureConfig::new(0.01, None, 10, None).unwrap();
        scheduler
            .start(config, source.clone(), observer.clone())
            .await
            .unwrap();

        source.started.notified().await;
        assert!(scheduler.stop("stop mid-capture").await);
        source.release.notify_one();

        let summary = tokio::time::timeout(Duration::from_secs(2), scheduler.wait())
            .await
            .expect("截屏完成后应退出")
            .unwrap();

        assert_eq!(
            summary.reason,
            StopReason::Requested("stop mid-capture".to_string())
        );
        assert_eq!(summary.state.captures_taken, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            artifact_names(&dir),
            vec!["screenshot_20240501_080000.png".to_string()]
        );
        assert!(dir.join("latest.png").exists());

        let ticks = observer.ticks.lock().unwrap().clone();
        assert_eq!(ticks.len(), 1);
        assert!(ticks[0].1);
        assert_eq!(observer.stops.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_without_start_fails() {
        let temp_dir = tempdir().unwrap();
        let scheduler = scheduler(temp_dir.path());
        assert!(scheduler.wait().await.is_err());
        assert!(!scheduler.stop("nothing").await);
    }
}
