use std::path::Path;

use anyhow::{Context, Result};
use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::ValidatorError;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub environment: EnvironmentConfig,
    pub orchestrator: OrchestratorConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
    pub coordinator: CoordinatorConfig,
}

/// 持久化存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 队列、注册表与质量数据的根目录
    pub state_dir: String,
}

/// 运行环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// 模拟环境镜像
    pub image: String,
    /// 镜像版本
    pub version: String,
    /// 端口分配起点
    pub base_port: u16,
    /// 相邻环境之间的端口间隔
    pub port_stride: u16,
    /// 健康检查上限（秒）
    pub health_timeout_seconds: u64,
}

/// 验证编排配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// 并发验证上限
    pub concurrency: usize,
    /// 单个单元的验证超时（秒）
    pub unit_timeout_seconds: u64,
    /// 测试阶段的固定超时（秒）
    pub test_timeout_seconds: u64,
    /// 验证结束后保留环境（调试用）
    pub keep_environments: bool,
    /// 无视缓存强制重新验证
    pub force_revalidation: bool,
    /// 启用不稳定测试的多次运行合并
    pub stabilization_enabled: bool,
    /// 稳定化最多运行次数
    pub max_test_runs: u32,
}

/// 增量缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_hours: i64,
    pub skip_passed: bool,
    pub skip_config_errors: bool,
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 为空时自动生成
    pub worker_id: String,
    pub poll_interval_seconds: u64,
    /// 判定Worker离线的心跳窗口（秒）
    pub heartbeat_timeout_seconds: u64,
}

/// 协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub poll_interval_seconds: u64,
    /// 等待run完成的墙钟预算（秒）
    pub wait_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                state_dir: "state".to_string(),
            },
            environment: EnvironmentConfig {
                image: "localstack/localstack".to_string(),
                version: "latest".to_string(),
                base_port: 5100,
                port_stride: 10,
                health_timeout_seconds: 60,
            },
            orchestrator: OrchestratorConfig {
                concurrency: 4,
                unit_timeout_seconds: 300,
                test_timeout_seconds: 60,
                keep_environments: false,
                force_revalidation: false,
                stabilization_enabled: true,
                max_test_runs: 3,
            },
            cache: CacheConfig {
                ttl_hours: 24,
                skip_passed: true,
                skip_config_errors: true,
            },
            worker: WorkerConfig {
                worker_id: String::new(),
                poll_interval_seconds: 5,
                heartbeat_timeout_seconds: 60,
            },
            coordinator: CoordinatorConfig {
                poll_interval_seconds: 10,
                wait_timeout_seconds: 3600,
            },
        }
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// 显式路径必须存在；未指定时依次尝试默认路径，都不存在则使用内置默认值。
    /// 环境变量（VALIDATOR_ 前缀）可覆盖任意字段。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default())
            .context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/validator.toml", "validator.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("VALIDATOR").separator("__"));

        let config: AppConfig = builder
            .build()
            .context("加载配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> std::result::Result<(), ValidatorError> {
        if self.store.state_dir.is_empty() {
            return Err(ValidatorError::Configuration(
                "store.state_dir 不能为空".to_string(),
            ));
        }
        if self.orchestrator.concurrency == 0 {
            return Err(ValidatorError::Configuration(
                "orchestrator.concurrency 必须大于0".to_string(),
            ));
        }
        if self.orchestrator.unit_timeout_seconds == 0 {
            return Err(ValidatorError::Configuration(
                "orchestrator.unit_timeout_seconds 必须大于0".to_string(),
            ));
        }
        if self.orchestrator.max_test_runs == 0 {
            return Err(ValidatorError::Configuration(
                "orchestrator.max_test_runs 必须大于0".to_string(),
            ));
        }
        if self.cache.ttl_hours <= 0 {
            return Err(ValidatorError::Configuration(
                "cache.ttl_hours 必须大于0".to_string(),
            ));
        }
        if self.worker.poll_interval_seconds == 0 || self.worker.heartbeat_timeout_seconds == 0 {
            return Err(ValidatorError::Configuration(
                "worker 轮询间隔与心跳窗口必须大于0".to_string(),
            ));
        }
        if self.environment.port_stride == 0 {
            return Err(ValidatorError::Configuration(
                "environment.port_stride 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
