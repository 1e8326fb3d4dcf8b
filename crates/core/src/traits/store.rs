//! 持久化存储层接口定义
//!
//! 任务队列存储与Worker注册表的抽象。契约只要求键值式读写与
//! pending -> running 声领转移的原子性；具体后端（原子重命名、
//! 事务型KV、消息中间件）由实现决定。

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{QueueStats, ValidationResult, ValidationTask, WorkerRecord};

/// 任务队列存储接口
///
/// 任务在 pending / running / completed / failed 四个逻辑分区间流转，
/// 任意时刻恰好位于一个分区。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 任务入队，返回任务ID
    async fn enqueue(&self, task: ValidationTask) -> Result<String>;

    /// 声领最高优先级的待处理任务
    ///
    /// pending -> running 转移必须互斥：并发声领同一任务时至多一个成功。
    /// 输掉竞争的调用方静默尝试下一个候选，不向外暴露冲突。
    async fn claim(&self, worker_id: &str) -> Result<Option<ValidationTask>>;

    /// 标记任务完成并附带验证结果
    async fn complete(&self, task_id: &str, result: ValidationResult) -> Result<()>;

    /// 标记任务失败并附带错误信息
    async fn fail(&self, task_id: &str, error: &str) -> Result<()>;

    /// 各分区任务计数
    async fn stats(&self) -> Result<QueueStats>;

    /// 收集指定run的全部完成结果
    async fn results_for_run(&self, run_id: &str) -> Result<Vec<ValidationResult>>;
}

/// Worker注册表接口
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// 注册新Worker
    async fn register(&self, worker_id: &str) -> Result<WorkerRecord>;

    /// 刷新心跳并更新当前任务
    async fn heartbeat(&self, worker_id: &str, current_task: Option<&str>) -> Result<()>;

    /// 累计任务完成/失败次数
    async fn record_outcome(&self, worker_id: &str, success: bool) -> Result<()>;

    /// 注销Worker（删除记录）
    async fn unregister(&self, worker_id: &str) -> Result<()>;

    /// 返回存活的Worker
    ///
    /// 心跳超过存活窗口的记录被标记为OFFLINE并保留在存储中供事后检查，
    /// 不会被删除，也不会出现在返回值里。
    async fn active_workers(&self) -> Result<Vec<WorkerRecord>>;
}
