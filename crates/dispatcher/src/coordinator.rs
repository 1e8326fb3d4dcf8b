use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use validator_core::{
    QueueStats, Result, TaskStore, ValidationResult, ValidationTask, ValidationUnit,
    WorkerRecord, WorkerRegistry,
};

/// 分布式协调器
///
/// 把一批验证单元转成队列任务，并聚合Worker产出的结果。
/// 协调器与Worker之间只通过持久化存储通信，不假设同机部署。
pub struct DistributedCoordinator {
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn WorkerRegistry>,
}

/// 提交结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSubmission {
    pub run_id: String,
    pub tasks_submitted: usize,
    pub task_ids: Vec<String>,
    pub active_workers: usize,
}

/// run状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub queue: QueueStats,
    pub workers: Vec<WorkerRecord>,
    pub completed_count: usize,
    pub results: Vec<ValidationResult>,
}

impl DistributedCoordinator {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<dyn WorkerRegistry>) -> Self {
        Self { store, registry }
    }

    /// 提交一批验证单元
    ///
    /// 同批内先提交的单元优先级更高（降序分配），保证大体按提交顺序执行。
    pub async fn submit_run(
        &self,
        units: Vec<ValidationUnit>,
        run_id: &str,
        timeout_seconds: u64,
    ) -> Result<RunSubmission> {
        let total = units.len();
        let mut task_ids = Vec::with_capacity(total);

        for (index, unit) in units.into_iter().enumerate() {
            let priority = (total - index) as i64;
            let task = ValidationTask::new(unit, run_id, timeout_seconds, priority);
            task_ids.push(self.store.enqueue(task).await?);
        }

        let active_workers = self.registry.active_workers().await?.len();
        info!("提交run {run_id}: {total} 个任务, {active_workers} 个活跃Worker");

        Ok(RunSubmission {
            run_id: run_id.to_string(),
            tasks_submitted: task_ids.len(),
            task_ids,
            active_workers,
        })
    }

    /// 查询run的当前状态
    pub async fn run_status(&self, run_id: &str) -> Result<RunStatus> {
        let queue = self.store.stats().await?;
        let workers = self.registry.active_workers().await?;
        let results = self.store.results_for_run(run_id).await?;

        Ok(RunStatus {
            run_id: run_id.to_string(),
            queue,
            workers,
            completed_count: results.len(),
            results,
        })
    }

    /// 等待run完成
    ///
    /// 轮询直至队列中不再有pending/running任务，或墙钟预算耗尽。
    /// 预算耗尽不是错误，返回已累积的结果。
    pub async fn wait_for_completion(
        &self,
        run_id: &str,
        poll_interval: Duration,
        budget: Duration,
    ) -> Result<Vec<ValidationResult>> {
        let deadline = Instant::now() + budget;

        loop {
            let stats = self.store.stats().await?;
            if !stats.has_outstanding() {
                break;
            }
            if Instant::now() >= deadline {
                info!("run {run_id} 等待预算耗尽，返回部分结果");
                break;
            }

            debug!(
                "run {run_id}: pending={}, running={}, completed={}",
                stats.pending, stats.running, stats.completed
            );
            tokio::time::sleep(poll_interval).await;
        }

        self.store.results_for_run(run_id).await
    }
}
