use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use validator_core::{
    BatchCounts, BatchReport, ConfigApplier, EnvironmentHandle, EnvironmentProvider, MetricKind,
    OrchestratorConfig, Result, TestRunner, UnitValidator, ValidationResult, ValidationStatus,
    ValidationUnit, ValidatorError,
};
use validator_quality::{FlakyTestStabilizer, IncrementalCache, PerformanceTracker};

use crate::environment::{expanded_services, EnvironmentRegistry};

/// 健康检查轮询间隔
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 验证编排器
///
/// 在并发信号量约束下驱动每个单元的完整流水线：
/// 缓存判定 -> 环境启动 -> 配置应用 -> 测试执行 -> 清理。
/// 单元之间互不影响，任何一个单元的失败或panic都不会中断同批其它单元。
pub struct ValidationOrchestrator {
    config: OrchestratorConfig,
    health_timeout: Duration,
    environments: Arc<EnvironmentRegistry>,
    provider: Arc<dyn EnvironmentProvider>,
    applier: Arc<dyn ConfigApplier>,
    test_runner: Arc<dyn TestRunner>,
    cache: Arc<IncrementalCache>,
    stabilizer: Arc<FlakyTestStabilizer>,
    tracker: Arc<PerformanceTracker>,
}

impl ValidationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn EnvironmentProvider>,
        applier: Arc<dyn ConfigApplier>,
        test_runner: Arc<dyn TestRunner>,
        cache: Arc<IncrementalCache>,
        stabilizer: Arc<FlakyTestStabilizer>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            config,
            health_timeout: Duration::from_secs(60),
            environments: EnvironmentRegistry::new(),
            provider,
            applier,
            test_runner,
            cache,
            stabilizer,
            tracker,
        }
    }

    /// 设置健康检查上限
    pub fn health_timeout_seconds(mut self, seconds: u64) -> Self {
        self.health_timeout = Duration::from_secs(seconds);
        self
    }

    /// 活跃环境注册表（用于安装关闭钩子与检查）
    pub fn environment_registry(&self) -> Arc<EnvironmentRegistry> {
        Arc::clone(&self.environments)
    }

    /// 批量验证
    ///
    /// 每个单元运行在独立任务中，由信号量限制同时验证数。
    pub async fn validate_batch(
        self: Arc<Self>,
        units: Vec<ValidationUnit>,
        run_id: &str,
    ) -> BatchReport {
        info!("开始批量验证: run={run_id}, units={}, concurrency={}",
            units.len(), self.config.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        let mut handles = Vec::new();
        for unit in units {
            let this = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let run_id = run_id.to_string();
            let unit_id = unit.id.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ValidationResult::error(
                            &unit.id,
                            &run_id,
                            "并发信号量已关闭",
                            Utc::now(),
                        )
                    }
                };
                this.validate_one(&unit, &run_id).await
            });
            handles.push((unit_id, handle));
        }

        let mut counts = BatchCounts::default();
        let mut results = Vec::new();
        for (unit_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => ValidationResult::error(
                    &unit_id,
                    run_id,
                    format!("验证任务意外终止: {e}"),
                    Utc::now(),
                ),
            };
            counts.record(&result);
            results.push(result);
        }
        counts.total = results.len() as u32;

        info!(
            "批量验证完成: run={run_id}, passed={}, partial={}, failed={}, timeout={}, error={}, skipped={}",
            counts.passed, counts.partial, counts.failed, counts.timeout, counts.error, counts.skipped
        );

        BatchReport {
            run_id: run_id.to_string(),
            counts,
            results,
        }
    }

    /// 验证单个单元（使用配置的单元超时）
    pub async fn validate_one(&self, unit: &ValidationUnit, run_id: &str) -> ValidationResult {
        let timeout = Duration::from_secs(self.config.unit_timeout_seconds);
        self.validate_with_timeout(unit, run_id, timeout).await
    }

    async fn validate_with_timeout(
        &self,
        unit: &ValidationUnit,
        run_id: &str,
        unit_timeout: Duration,
    ) -> ValidationResult {
        let started_at = Utc::now();
        let total_start = Instant::now();

        // 缓存判定在任何资源分配之前
        let (must_run, reason) = self
            .cache
            .should_validate(unit, self.config.force_revalidation)
            .await;
        if !must_run {
            let reason = reason.unwrap_or_default();
            let status = self
                .cache
                .entry(&unit.id)
                .await
                .map(|entry| entry.last_status)
                .unwrap_or(ValidationStatus::Error);
            info!("跳过单元 {}: {reason}", unit.short_id());
            return ValidationResult::cached(&unit.id, run_id, status, &reason);
        }

        let workspace = match self.materialize_workspace(unit).await {
            Ok(workspace) => workspace,
            Err(e) => {
                return ValidationResult::error(
                    &unit.id,
                    run_id,
                    format!("创建工作目录失败: {e}"),
                    started_at,
                )
            }
        };

        let mut env_slot: Option<EnvironmentHandle> = None;
        let pipeline = self
            .run_pipeline(
                unit,
                run_id,
                started_at,
                workspace.path(),
                unit_timeout,
                &mut env_slot,
            )
            .await;

        // 清理阶段：无论流水线以何种方式结束都会执行
        if let Some(handle) = env_slot.take() {
            self.environments.deregister(&unit.id).await;
            if self.config.keep_environments {
                info!("保留环境 {} 供调试", handle.id);
            } else if let Err(e) = self.provider.stop(&handle).await {
                warn!("停止环境 {} 失败: {e}", handle.id);
            }
        }
        if let Err(e) = workspace.close() {
            warn!("清理工作目录失败: {e}");
        }

        let result = match pipeline {
            Ok(result) => result,
            Err(ValidatorError::StageTimeout { stage }) => {
                warn!("单元 {} 在阶段 {stage} 超时", unit.short_id());
                ValidationResult::timeout(&unit.id, run_id, started_at)
            }
            Err(e) => {
                warn!("单元 {} 验证出错: {e}", unit.short_id());
                ValidationResult::error(&unit.id, run_id, e.to_string(), started_at)
            }
        };

        // 执行后回写缓存与总耗时基线
        self.record_stage(
            &unit.id,
            MetricKind::TotalValidation,
            total_start.elapsed().as_secs_f64(),
        )
        .await;
        if let Err(e) = self.cache.update(unit, result.status, run_id, None).await {
            warn!("更新验证缓存失败: {e}");
        }

        result
    }

    async fn run_pipeline(
        &self,
        unit: &ValidationUnit,
        run_id: &str,
        started_at: DateTime<Utc>,
        workdir: &Path,
        unit_timeout: Duration,
        env_slot: &mut Option<EnvironmentHandle>,
    ) -> Result<ValidationResult> {
        // 环境启动
        let services = expanded_services(&unit.services);
        let env_start = Instant::now();
        let handle = self.provider.start(&unit.id, &services).await?;
        self.environments
            .register(handle.clone(), Arc::clone(&self.provider))
            .await;
        *env_slot = Some(handle.clone());

        if !self.wait_for_health(&handle.endpoint).await {
            let mut result =
                ValidationResult::error(&unit.id, run_id, "环境健康检查失败", started_at);
            result.environment_logs = self.provider.logs(&handle).await;
            return Ok(result);
        }
        self.record_stage(
            &unit.id,
            MetricKind::EnvironmentStart,
            env_start.elapsed().as_secs_f64(),
        )
        .await;

        // 配置应用
        let apply_start = Instant::now();
        let apply_result = self
            .applier
            .apply(workdir, &handle.endpoint, unit_timeout)
            .await?;
        self.record_stage(
            &unit.id,
            MetricKind::ConfigApply,
            apply_start.elapsed().as_secs_f64(),
        )
        .await;

        if !apply_result.success {
            let completed_at = Utc::now();
            return Ok(ValidationResult {
                unit_id: unit.id.clone(),
                run_id: run_id.to_string(),
                status: ValidationStatus::Failed,
                started_at,
                completed_at,
                duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
                apply_result: Some(apply_result),
                test_result: None,
                environment_logs: self.provider.logs(&handle).await,
                error_message: None,
                from_cache: false,
            });
        }

        // 测试执行
        let test_timeout = Duration::from_secs(self.config.test_timeout_seconds);
        let test_start = Instant::now();
        let suite = if self.config.stabilization_enabled {
            self.stabilizer
                .stabilize(
                    &unit.id,
                    || self.test_runner.run(workdir, &handle.endpoint, test_timeout),
                    self.config.max_test_runs,
                )
                .await?
                .suite
        } else {
            let suite = self
                .test_runner
                .run(workdir, &handle.endpoint, test_timeout)
                .await?;
            if let Err(e) = self.stabilizer.record_suite(&unit.id, &suite.tests).await {
                warn!("记录测试稳定性失败: {e}");
            }
            suite
        };
        self.record_stage(
            &unit.id,
            MetricKind::TestRun,
            test_start.elapsed().as_secs_f64(),
        )
        .await;

        let status = suite.classify();

        // 资源销毁（尽力而为，失败不影响结果）
        let teardown_start = Instant::now();
        if let Err(e) = self.applier.destroy(workdir, &handle.endpoint).await {
            warn!("销毁资源失败: {e}");
        }
        self.record_stage(
            &unit.id,
            MetricKind::Teardown,
            teardown_start.elapsed().as_secs_f64(),
        )
        .await;

        // 通过的单元不保留环境日志
        let environment_logs = if status == ValidationStatus::Passed {
            String::new()
        } else {
            self.provider.logs(&handle).await
        };

        let completed_at = Utc::now();
        Ok(ValidationResult {
            unit_id: unit.id.clone(),
            run_id: run_id.to_string(),
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            apply_result: Some(apply_result),
            test_result: Some(suite),
            environment_logs,
            error_message: None,
            from_cache: false,
        })
    }

    /// 按固定间隔轮询健康端点直至就绪或超出上限
    async fn wait_for_health(&self, endpoint: &str) -> bool {
        let deadline = Instant::now() + self.health_timeout;
        loop {
            if self.provider.healthy(endpoint).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// 将单元文件落到临时工作目录
    async fn materialize_workspace(&self, unit: &ValidationUnit) -> Result<TempDir> {
        let workspace = tempfile::Builder::new()
            .prefix(&format!("validator_{}_", unit.short_id()))
            .tempdir()?;

        for (name, content) in unit.config_files.iter().chain(unit.test_files.iter()) {
            let path = workspace.path().join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content).await?;
        }

        Ok(workspace)
    }

    async fn record_stage(&self, unit_id: &str, kind: MetricKind, seconds: f64) {
        if let Err(e) = self.tracker.record_metric(unit_id, kind, seconds).await {
            warn!("记录性能基线失败: {e}");
        }
    }
}

#[async_trait]
impl UnitValidator for ValidationOrchestrator {
    async fn validate_unit(
        &self,
        unit: &ValidationUnit,
        run_id: &str,
        timeout: Duration,
    ) -> Result<ValidationResult> {
        Ok(self.validate_with_timeout(unit, run_id, timeout).await)
    }
}
