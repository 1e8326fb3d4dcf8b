use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use validator_core::{
    QueueStats, Result, TaskState, TaskStore, ValidationResult, ValidationTask, ValidatorError,
};

/// 文件系统任务队列
///
/// 四个分区目录对应任务的四种状态，任务以JSON文件形式存放，
/// 文件所在目录即任务状态。pending -> running 的声领转移通过
/// `rename` 完成：同一文件系统内rename是原子的，并发声领同一
/// 任务时只有一个调用方成功，输掉的一方继续尝试下一个候选。
pub struct FileTaskStore {
    pending_dir: PathBuf,
    running_dir: PathBuf,
    completed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl FileTaskStore {
    /// 在状态目录下创建队列分区
    pub async fn new(state_dir: &Path) -> Result<Self> {
        let queue_dir = state_dir.join("queue");
        let store = Self {
            pending_dir: queue_dir.join("pending"),
            running_dir: queue_dir.join("running"),
            completed_dir: queue_dir.join("completed"),
            failed_dir: queue_dir.join("failed"),
        };

        for dir in [
            &store.pending_dir,
            &store.running_dir,
            &store.completed_dir,
            &store.failed_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }

        Ok(store)
    }

    fn task_file(dir: &Path, task_id: &str) -> PathBuf {
        dir.join(format!("{task_id}.json"))
    }

    async fn read_task(path: &Path) -> Result<ValidationTask> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_task(path: &Path, task: &ValidationTask) -> Result<()> {
        let content = serde_json::to_string_pretty(task)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// 列出分区内的任务文件
    async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// 将running分区内的任务移入终态分区
    async fn finish_task(
        &self,
        task_id: &str,
        target_dir: &Path,
        mutate: impl FnOnce(&mut ValidationTask),
    ) -> Result<()> {
        let running_file = Self::task_file(&self.running_dir, task_id);
        if !tokio::fs::try_exists(&running_file).await? {
            return Err(ValidatorError::TaskNotFound {
                id: task_id.to_string(),
            });
        }

        let mut task = Self::read_task(&running_file).await?;
        mutate(&mut task);
        task.completed_at = Some(Utc::now());

        Self::write_task(&Self::task_file(target_dir, task_id), &task).await?;
        tokio::fs::remove_file(&running_file).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn enqueue(&self, task: ValidationTask) -> Result<String> {
        let task_id = task.task_id.clone();
        Self::write_task(&Self::task_file(&self.pending_dir, &task_id), &task).await?;
        debug!("任务入队: {task_id} (priority={})", task.priority);
        Ok(task_id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ValidationTask>> {
        // 按优先级降序遍历候选，损坏的任务文件跳过
        let mut candidates = Vec::new();
        for path in Self::list_dir(&self.pending_dir).await? {
            match Self::read_task(&path).await {
                Ok(task) => candidates.push((task.priority, path, task)),
                Err(e) => warn!("读取待处理任务失败，跳过 {}: {e}", path.display()),
            }
        }
        candidates.sort_by_key(|(priority, _, _)| std::cmp::Reverse(*priority));

        for (_, pending_file, mut task) in candidates {
            let running_file = Self::task_file(&self.running_dir, &task.task_id);
            // rename即声领：输掉竞争时文件已不存在，换下一个候选
            match tokio::fs::rename(&pending_file, &running_file).await {
                Ok(()) => {
                    task.state = TaskState::Running;
                    task.assigned_worker = Some(worker_id.to_string());
                    Self::write_task(&running_file, &task).await?;
                    info!("Worker {worker_id} 声领任务 {}", task.task_id);
                    return Ok(Some(task));
                }
                Err(e) => {
                    debug!("任务 {} 声领竞争失败: {e}", task.task_id);
                    continue;
                }
            }
        }

        Ok(None)
    }

    async fn complete(&self, task_id: &str, result: ValidationResult) -> Result<()> {
        self.finish_task(task_id, &self.completed_dir, |task| {
            task.state = TaskState::Completed;
            task.result = Some(result);
        })
        .await?;
        info!("任务完成: {task_id}");
        Ok(())
    }

    async fn fail(&self, task_id: &str, error: &str) -> Result<()> {
        let message = error.to_string();
        self.finish_task(task_id, &self.failed_dir, |task| {
            task.state = TaskState::Failed;
            task.error = Some(message);
        })
        .await?;
        warn!("任务失败: {task_id}: {error}");
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: Self::list_dir(&self.pending_dir).await?.len(),
            running: Self::list_dir(&self.running_dir).await?.len(),
            completed: Self::list_dir(&self.completed_dir).await?.len(),
            failed: Self::list_dir(&self.failed_dir).await?.len(),
        })
    }

    async fn results_for_run(&self, run_id: &str) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::new();
        for path in Self::list_dir(&self.completed_dir).await? {
            match Self::read_task(&path).await {
                Ok(task) if task.run_id == run_id => {
                    if let Some(result) = task.result {
                        results.push(result);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("读取完成任务失败，跳过 {}: {e}", path.display()),
            }
        }
        Ok(results)
    }
}
