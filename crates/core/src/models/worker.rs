use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerState {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "BUSY")]
    Busy,
    #[serde(rename = "OFFLINE")]
    Offline,
}

/// Worker注册记录
///
/// Worker启动时创建，由心跳刷新，正常停止时删除。Offline不会被主动写入，
/// 而是在心跳超过存活窗口时由注册表推断并落盘。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_failed: u64,
    #[serde(default)]
    pub current_task: Option<String>,
    pub state: WorkerState,
}

impl WorkerRecord {
    /// 创建新的Worker记录
    pub fn new(worker_id: &str, hostname: &str) -> Self {
        let now = Utc::now();
        Self {
            worker_id: worker_id.to_string(),
            hostname: hostname.to_string(),
            started_at: now,
            last_heartbeat: now,
            tasks_completed: 0,
            tasks_failed: 0,
            current_task: None,
            state: WorkerState::Idle,
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worker_is_idle() {
        let record = WorkerRecord::new("worker-001", "host-a");
        assert_eq!(record.state, WorkerState::Idle);
        assert!(record.current_task.is_none());
        assert!(!record.is_heartbeat_expired(60));
    }

    #[test]
    fn test_stale_heartbeat_detection() {
        let mut record = WorkerRecord::new("worker-001", "host-a");
        record.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(record.is_heartbeat_expired(60));
        assert!(!record.is_heartbeat_expired(300));
    }
}
