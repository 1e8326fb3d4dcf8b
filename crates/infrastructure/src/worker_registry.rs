use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use validator_core::{Result, ValidatorError, WorkerRecord, WorkerRegistry, WorkerState};

/// 文件系统Worker注册表
///
/// 每个Worker一个JSON文件。心跳超过存活窗口的记录被标记为OFFLINE
/// 并保留在磁盘上供事后检查，不做删除。
pub struct FileWorkerRegistry {
    workers_dir: PathBuf,
    heartbeat_timeout_seconds: i64,
}

impl FileWorkerRegistry {
    /// 默认存活窗口60秒
    pub async fn new(state_dir: &Path) -> Result<Self> {
        Self::with_timeout(state_dir, 60).await
    }

    pub async fn with_timeout(state_dir: &Path, heartbeat_timeout_seconds: i64) -> Result<Self> {
        let workers_dir = state_dir.join("workers");
        tokio::fs::create_dir_all(&workers_dir).await?;
        Ok(Self {
            workers_dir,
            heartbeat_timeout_seconds,
        })
    }

    fn worker_file(&self, worker_id: &str) -> PathBuf {
        self.workers_dir.join(format!("{worker_id}.json"))
    }

    async fn read_record(&self, worker_id: &str) -> Result<WorkerRecord> {
        let path = self.worker_file(worker_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(ValidatorError::WorkerNotFound {
                id: worker_id.to_string(),
            });
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_record(&self, record: &WorkerRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(self.worker_file(&record.worker_id), content).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerRegistry for FileWorkerRegistry {
    async fn register(&self, worker_id: &str) -> Result<WorkerRecord> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let record = WorkerRecord::new(worker_id, &host);
        self.write_record(&record).await?;
        info!("Worker {worker_id} 注册于 {host}");
        Ok(record)
    }

    async fn heartbeat(&self, worker_id: &str, current_task: Option<&str>) -> Result<()> {
        let mut record = self.read_record(worker_id).await?;
        record.last_heartbeat = Utc::now();
        record.current_task = current_task.map(|t| t.to_string());
        record.state = if current_task.is_some() {
            WorkerState::Busy
        } else {
            WorkerState::Idle
        };
        self.write_record(&record).await
    }

    async fn record_outcome(&self, worker_id: &str, success: bool) -> Result<()> {
        let mut record = self.read_record(worker_id).await?;
        if success {
            record.tasks_completed += 1;
        } else {
            record.tasks_failed += 1;
        }
        self.write_record(&record).await
    }

    async fn unregister(&self, worker_id: &str) -> Result<()> {
        let path = self.worker_file(worker_id);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        info!("Worker {worker_id} 注销");
        Ok(())
    }

    async fn active_workers(&self) -> Result<Vec<WorkerRecord>> {
        let mut workers = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.workers_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let content = tokio::fs::read_to_string(&path).await?;
            let mut record: WorkerRecord = match serde_json::from_str(&content) {
                Ok(record) => record,
                Err(e) => {
                    warn!("读取Worker记录失败，跳过 {}: {e}", path.display());
                    continue;
                }
            };

            if record.is_heartbeat_expired(self.heartbeat_timeout_seconds) {
                if record.state != WorkerState::Offline {
                    record.state = WorkerState::Offline;
                    self.write_record(&record).await?;
                    warn!("Worker {} 心跳超时，标记为离线", record.worker_id);
                }
            } else {
                workers.push(record);
            }
        }

        Ok(workers)
    }
}
