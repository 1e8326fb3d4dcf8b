use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::ValidationResult;
use super::unit::ValidationUnit;

/// 任务状态
///
/// 任务在任意时刻只处于其中一个状态；pending -> running 的转移必须互斥。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// 验证任务
///
/// 入队时创建，只由队列自身的状态转移方法修改。任务内嵌完整的验证单元，
/// 使Worker之间不需要共享制品存储。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationTask {
    pub task_id: String,
    pub unit: ValidationUnit,
    pub run_id: String,
    pub timeout_seconds: u64,
    /// 数值越大越优先
    pub priority: i64,
    pub state: TaskState,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<ValidationResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValidationTask {
    /// 创建新任务
    pub fn new(unit: ValidationUnit, run_id: &str, timeout_seconds: u64, priority: i64) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            unit,
            run_id: run_id.to_string(),
            timeout_seconds,
            priority,
            state: TaskState::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }
}

/// 队列各分区的任务计数
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// 是否还有未完结的任务
    pub fn has_outstanding(&self) -> bool {
        self.pending > 0 || self.running > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = ValidationTask::new(ValidationUnit::new("u1"), "run-1", 300, 5);
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.assigned_worker.is_none());
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&TaskState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
    }

    #[test]
    fn test_queue_stats_outstanding() {
        let mut stats = QueueStats::default();
        assert!(!stats.has_outstanding());
        stats.running = 1;
        assert!(stats.has_outstanding());
    }
}
