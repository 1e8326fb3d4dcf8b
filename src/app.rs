use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use validator_core::{AppConfig, TaskStore, UnitValidator, ValidationUnit, WorkerRegistry};
use validator_dispatcher::DistributedCoordinator;
use validator_infrastructure::{FileTaskStore, FileWorkerRegistry};
use validator_quality::{FlakyTestStabilizer, IncrementalCache, PerformanceTracker};
use validator_runner::{
    CliConfigApplier, CliTestRunner, ContainerEnvironment, ValidationOrchestrator,
};
use validator_worker::WorkerServiceBuilder;

/// 运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 本地批量验证
    Local { units_file: PathBuf },
    /// 分布式验证Worker
    Worker,
    /// 分布式协调器：提交并等待run完成
    Coordinator { units_file: PathBuf },
}

/// 应用实例
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    run_id: String,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode, run_id: Option<String>) -> Self {
        let run_id = run_id.unwrap_or_else(|| {
            format!(
                "run-{}",
                &uuid::Uuid::new_v4().simple().to_string()[..12]
            )
        });
        Self {
            config,
            mode,
            run_id,
        }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match &self.mode {
            AppMode::Local { units_file } => self.run_local(units_file).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Coordinator { units_file } => self.run_coordinator(units_file).await,
        }
    }

    fn state_dir(&self) -> &Path {
        Path::new(&self.config.store.state_dir)
    }

    /// 组装完整的验证编排器并安装环境回收钩子
    async fn build_orchestrator(&self) -> Result<Arc<ValidationOrchestrator>> {
        let state_dir = self.state_dir();
        let cache = Arc::new(
            IncrementalCache::with_options(
                state_dir,
                self.config.cache.ttl_hours,
                self.config.cache.skip_passed,
                self.config.cache.skip_config_errors,
            )
            .await
            .context("初始化增量缓存失败")?,
        );
        let stabilizer = Arc::new(
            FlakyTestStabilizer::new(state_dir)
                .await
                .context("初始化稳定性记录失败")?,
        );
        let tracker = Arc::new(
            PerformanceTracker::new(state_dir)
                .await
                .context("初始化性能基线失败")?,
        );
        let provider = Arc::new(ContainerEnvironment::new(&self.config.environment));

        let orchestrator = Arc::new(
            ValidationOrchestrator::new(
                self.config.orchestrator.clone(),
                provider,
                Arc::new(CliConfigApplier::new()),
                Arc::new(CliTestRunner::new()),
                cache,
                stabilizer,
                tracker,
            )
            .health_timeout_seconds(self.config.environment.health_timeout_seconds),
        );
        orchestrator.environment_registry().install_shutdown_hook();
        Ok(orchestrator)
    }

    async fn load_units(path: &Path) -> Result<Vec<ValidationUnit>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取单元文件失败: {}", path.display()))?;
        let units: Vec<ValidationUnit> =
            serde_json::from_str(&content).context("解析单元文件失败")?;
        if units.is_empty() {
            anyhow::bail!("单元文件为空: {}", path.display());
        }
        Ok(units)
    }

    async fn write_report(&self, report: &impl serde::Serialize) -> Result<()> {
        let run_dir = self.state_dir().join("runs").join(&self.run_id);
        tokio::fs::create_dir_all(&run_dir).await?;
        let path = run_dir.join("report.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(report)?).await?;
        info!("报告已写入 {}", path.display());
        Ok(())
    }

    async fn run_local(&self, units_file: &Path) -> Result<()> {
        let units = Self::load_units(units_file).await?;
        let orchestrator = self.build_orchestrator().await?;

        let report = orchestrator.validate_batch(units, &self.run_id).await;
        info!(
            "run {} 完成: total={}, passed={}, partial={}, failed={}, timeout={}, error={}, skipped={}",
            self.run_id,
            report.counts.total,
            report.counts.passed,
            report.counts.partial,
            report.counts.failed,
            report.counts.timeout,
            report.counts.error,
            report.counts.skipped
        );
        self.write_report(&report).await
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let state_dir = self.state_dir();
        let store: Arc<dyn TaskStore> = Arc::new(
            FileTaskStore::new(state_dir)
                .await
                .context("初始化任务队列失败")?,
        );
        let registry: Arc<dyn WorkerRegistry> = Arc::new(
            FileWorkerRegistry::with_timeout(
                state_dir,
                self.config.worker.heartbeat_timeout_seconds as i64,
            )
            .await
            .context("初始化Worker注册表失败")?,
        );
        let orchestrator = self.build_orchestrator().await?;

        let service = Arc::new(
            WorkerServiceBuilder::new(store, registry, orchestrator as Arc<dyn UnitValidator>)
                .worker_id(self.config.worker.worker_id.as_str())
                .poll_interval_seconds(self.config.worker.poll_interval_seconds)
                .build(),
        );

        let handle = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await })
        };

        // Worker持续运行直至收到关闭信号
        let _ = shutdown_rx.recv().await;
        service.stop();
        match handle.await {
            Ok(result) => result.context("Worker退出异常")?,
            Err(e) => error!("Worker任务join失败: {e}"),
        }
        Ok(())
    }

    async fn run_coordinator(&self, units_file: &Path) -> Result<()> {
        let units = Self::load_units(units_file).await?;
        let state_dir = self.state_dir();
        let store: Arc<dyn TaskStore> = Arc::new(
            FileTaskStore::new(state_dir)
                .await
                .context("初始化任务队列失败")?,
        );
        let registry: Arc<dyn WorkerRegistry> = Arc::new(
            FileWorkerRegistry::with_timeout(
                state_dir,
                self.config.worker.heartbeat_timeout_seconds as i64,
            )
            .await
            .context("初始化Worker注册表失败")?,
        );
        let coordinator = DistributedCoordinator::new(store, registry);

        let submission = coordinator
            .submit_run(
                units,
                &self.run_id,
                self.config.orchestrator.unit_timeout_seconds,
            )
            .await?;
        info!(
            "已提交 {} 个任务, 当前活跃Worker {} 个",
            submission.tasks_submitted, submission.active_workers
        );

        let results = coordinator
            .wait_for_completion(
                &self.run_id,
                Duration::from_secs(self.config.coordinator.poll_interval_seconds),
                Duration::from_secs(self.config.coordinator.wait_timeout_seconds),
            )
            .await?;
        info!("run {} 收集到 {} 条结果", self.run_id, results.len());

        let status = coordinator.run_status(&self.run_id).await?;
        self.write_report(&status).await
    }
}
