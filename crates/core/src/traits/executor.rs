//! 验证执行层接口定义

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::{ApplyResult, TestSuiteResult, ValidationResult, ValidationUnit};

/// 运行中环境的句柄
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// 底层实例标识（如容器ID）
    pub id: String,
    pub unit_id: String,
    /// 服务访问端点
    pub endpoint: String,
}

/// 隔离运行环境提供者
///
/// 为单个验证单元提供一个模拟目标平台的临时环境。
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// 启动环境，作用域为给定的服务集合
    async fn start(&self, unit_id: &str, services: &[String]) -> Result<EnvironmentHandle>;

    /// 健康检查端点是否就绪
    async fn healthy(&self, endpoint: &str) -> bool;

    /// 抓取环境日志（尽力而为）
    async fn logs(&self, handle: &EnvironmentHandle) -> String;

    /// 停止并回收环境
    async fn stop(&self, handle: &EnvironmentHandle) -> Result<()>;
}

/// 基础设施配置应用器
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// 在工作目录内对目标端点应用配置
    async fn apply(&self, workdir: &Path, endpoint: &str, timeout: Duration) -> Result<ApplyResult>;

    /// 销毁已应用的资源（尽力而为）
    async fn destroy(&self, workdir: &Path, endpoint: &str) -> Result<()>;
}

/// 测试套件运行器
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// 对目标端点运行测试套件
    async fn run(&self, workdir: &Path, endpoint: &str, timeout: Duration)
        -> Result<TestSuiteResult>;
}

/// 单元验证器
///
/// 分布式Worker通过该接口调用完整的单元验证流水线。
#[async_trait]
pub trait UnitValidator: Send + Sync {
    async fn validate_unit(
        &self,
        unit: &ValidationUnit,
        run_id: &str,
        timeout: Duration,
    ) -> Result<ValidationResult>;
}
