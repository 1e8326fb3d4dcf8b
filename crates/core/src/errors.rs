use thiserror::Error;

/// 验证系统错误类型定义
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("环境启动失败: {0}")]
    EnvironmentStartup(String),

    #[error("阶段执行超时: {stage}")]
    StageTimeout { stage: String },

    #[error("验证执行错误: {0}")]
    Execution(String),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, ValidatorError>;
