use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use validator_core::{Result, TaskStore, UnitValidator, ValidationTask, WorkerRegistry};

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn WorkerRegistry>,
    validator: Arc<dyn UnitValidator>,
    poll_interval_seconds: u64,
}

impl WorkerServiceBuilder {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<dyn WorkerRegistry>,
        validator: Arc<dyn UnitValidator>,
    ) -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
            store,
            registry,
            validator,
            poll_interval_seconds: 5,
        }
    }

    /// 指定Worker ID
    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        if !worker_id.is_empty() {
            self.worker_id = worker_id;
        }
        self
    }

    /// 设置空闲轮询间隔
    pub fn poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    pub fn build(self) -> WorkerService {
        let (stop_tx, _) = watch::channel(false);
        WorkerService {
            worker_id: self.worker_id,
            store: self.store,
            registry: self.registry,
            validator: self.validator,
            poll_interval: Duration::from_secs(self.poll_interval_seconds.max(1)),
            stop_tx,
        }
    }
}

/// 分布式验证Worker
///
/// 循环：心跳 -> 声领任务 -> 执行验证 -> 回写结果；队列为空时
/// 按轮询间隔休眠。无论以何种方式退出都会注销自己。
pub struct WorkerService {
    worker_id: String,
    store: Arc<dyn TaskStore>,
    registry: Arc<dyn WorkerRegistry>,
    validator: Arc<dyn UnitValidator>,
    poll_interval: Duration,
    stop_tx: watch::Sender<bool>,
}

impl WorkerService {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 请求停止，当前任务执行完后退出
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// 运行Worker主循环
    pub async fn run(&self) -> Result<()> {
        self.registry.register(&self.worker_id).await?;
        info!("Worker {} 启动", self.worker_id);

        let outcome = self.run_loop().await;

        // 注销在所有退出路径上执行
        if let Err(e) = self.registry.unregister(&self.worker_id).await {
            warn!("Worker {} 注销失败: {e}", self.worker_id);
        }
        info!("Worker {} 停止", self.worker_id);
        outcome
    }

    async fn run_loop(&self) -> Result<()> {
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            if let Err(e) = self.registry.heartbeat(&self.worker_id, None).await {
                warn!("Worker {} 心跳失败: {e}", self.worker_id);
            }

            match self.store.claim(&self.worker_id).await {
                Ok(Some(task)) => self.execute_task(task).await,
                Ok(None) => {
                    debug!("Worker {} 队列空闲", self.worker_id);
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!("Worker {} 声领任务失败: {e}", self.worker_id);
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn execute_task(&self, task: ValidationTask) {
        let task_id = task.task_id.clone();
        info!("Worker {} 执行任务 {task_id} (unit={})", self.worker_id, task.unit.short_id());

        if let Err(e) = self
            .registry
            .heartbeat(&self.worker_id, Some(&task_id))
            .await
        {
            warn!("Worker {} 心跳失败: {e}", self.worker_id);
        }

        let timeout = Duration::from_secs(task.timeout_seconds);
        let success = match self
            .validator
            .validate_unit(&task.unit, &task.run_id, timeout)
            .await
        {
            Ok(result) => match self.store.complete(&task_id, result).await {
                Ok(()) => true,
                Err(e) => {
                    error!("回写任务 {task_id} 结果失败: {e}");
                    false
                }
            },
            Err(e) => {
                if let Err(store_err) = self.store.fail(&task_id, &e.to_string()).await {
                    error!("标记任务 {task_id} 失败时出错: {store_err}");
                }
                false
            }
        };

        if let Err(e) = self.registry.record_outcome(&self.worker_id, success).await {
            warn!("Worker {} 记录任务计数失败: {e}", self.worker_id);
        }
        if let Err(e) = self.registry.heartbeat(&self.worker_id, None).await {
            warn!("Worker {} 心跳失败: {e}", self.worker_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use validator_core::{
        ValidationResult, ValidationUnit, ValidatorError,
    };
    use validator_infrastructure::{FileTaskStore, FileWorkerRegistry};

    /// 成功/失败可控的验证器桩
    struct StubValidator {
        fail_marker: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UnitValidator for StubValidator {
        async fn validate_unit(
            &self,
            unit: &ValidationUnit,
            run_id: &str,
            _timeout: Duration,
        ) -> Result<ValidationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = &self.fail_marker {
                if unit.id.contains(marker.as_str()) {
                    return Err(ValidatorError::Execution("injected failure".to_string()));
                }
            }
            let mut result =
                ValidationResult::error(&unit.id, run_id, "placeholder", chrono::Utc::now());
            result.status = validator_core::ValidationStatus::Passed;
            result.error_message = None;
            Ok(result)
        }
    }

    async fn setup(
        state_dir: &std::path::Path,
        fail_marker: Option<&str>,
    ) -> (Arc<FileTaskStore>, Arc<FileWorkerRegistry>, WorkerService) {
        let store = Arc::new(FileTaskStore::new(state_dir).await.unwrap());
        let registry = Arc::new(FileWorkerRegistry::new(state_dir).await.unwrap());
        let validator = Arc::new(StubValidator {
            fail_marker: fail_marker.map(|m| m.to_string()),
            calls: AtomicUsize::new(0),
        });

        let service = WorkerServiceBuilder::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::clone(&registry) as Arc<dyn WorkerRegistry>,
            validator,
        )
        .worker_id("worker-test")
        .poll_interval_seconds(1)
        .build();

        (store, registry, service)
    }

    async fn wait_until<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("等待条件超时");
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry, service) = setup(dir.path(), None).await;

        for i in 0..2 {
            let task =
                ValidationTask::new(ValidationUnit::new(format!("u{i}")), "run-1", 300, 2 - i);
            store.enqueue(task).await.unwrap();
        }

        let service = Arc::new(service);
        let handle = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await })
        };

        {
            let store = Arc::clone(&store);
            wait_until(move || {
                let store = Arc::clone(&store);
                async move { store.stats().await.unwrap().completed == 2 }
            })
            .await;
        }

        service.stop();
        handle.await.unwrap().unwrap();

        // 停止后Worker已注销
        assert!(registry.active_workers().await.unwrap().is_empty());
        let results = store.results_for_run("run-1").await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_validator_error_moves_task_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _registry, service) = setup(dir.path(), Some("bad")).await;

        store
            .enqueue(ValidationTask::new(
                ValidationUnit::new("u-bad"),
                "run-1",
                300,
                1,
            ))
            .await
            .unwrap();

        let service = Arc::new(service);
        let handle = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run().await })
        };

        {
            let store = Arc::clone(&store);
            wait_until(move || {
                let store = Arc::clone(&store);
                async move { store.stats().await.unwrap().failed == 1 }
            })
            .await;
        }

        service.stop();
        handle.await.unwrap().unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }
}
