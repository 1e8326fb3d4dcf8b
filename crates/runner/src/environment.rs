use std::collections::{BTreeSet, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use validator_core::{
    EnvironmentConfig, EnvironmentHandle, EnvironmentProvider, Result, ValidatorError,
};

/// 应用工具自身依赖的基础服务，始终并入环境服务集合
const BASELINE_SERVICES: [&str; 2] = ["iam", "sts"];

/// 常见的伴生服务组合
const COMPANION_SERVICES: [(&str, &[&str]); 4] = [
    ("cloudwatch", &["events", "logs"]),
    ("lambda", &["logs"]),
    ("apigateway", &["apigatewayv2"]),
    ("s3", &["s3control"]),
];

/// 计算环境实际需要启动的服务集合
///
/// 单元声明的服务并上基础服务与伴生服务，排序去重。
pub fn expanded_services(services: &[String]) -> Vec<String> {
    let mut set: BTreeSet<String> = services.iter().cloned().collect();
    for service in BASELINE_SERVICES {
        set.insert(service.to_string());
    }
    for (service, companions) in COMPANION_SERVICES {
        if set.contains(service) {
            for companion in companions {
                set.insert(companion.to_string());
            }
        }
    }
    set.into_iter().collect()
}

struct RegisteredEnvironment {
    handle: EnvironmentHandle,
    provider: Arc<dyn EnvironmentProvider>,
}

/// 活跃环境注册表
///
/// 进程内所有存活环境的唯一登记处，由编排器持有。配合一次性安装的
/// 信号钩子，保证进程被强制终止时不遗留孤儿环境。
#[derive(Default)]
pub struct EnvironmentRegistry {
    active: Mutex<HashMap<String, RegisteredEnvironment>>,
}

static SHUTDOWN_HOOK: Once = Once::new();

impl EnvironmentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 登记一个刚启动的环境
    pub async fn register(
        &self,
        handle: EnvironmentHandle,
        provider: Arc<dyn EnvironmentProvider>,
    ) {
        let mut active = self.active.lock().await;
        active.insert(handle.unit_id.clone(), RegisteredEnvironment { handle, provider });
    }

    /// 注销环境，返回是否存在
    pub async fn deregister(&self, unit_id: &str) -> bool {
        self.active.lock().await.remove(unit_id).is_some()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// 强制停止所有仍登记的环境
    pub async fn shutdown_all(&self) {
        let drained: Vec<RegisteredEnvironment> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, env)| env).collect()
        };

        if drained.is_empty() {
            return;
        }

        warn!("强制回收 {} 个仍存活的环境", drained.len());
        for env in drained {
            if let Err(e) = env.provider.stop(&env.handle).await {
                error!("回收环境 {} 失败: {e}", env.handle.id);
            }
        }
    }

    /// 安装进程级关闭钩子，整个进程只安装一次
    ///
    /// 收到 Ctrl+C 或 SIGTERM 时强制停止所有登记的环境，随后让
    /// 进程的正常关闭流程继续。
    pub fn install_shutdown_hook(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        SHUTDOWN_HOOK.call_once(move || {
            tokio::spawn(async move {
                let ctrl_c = async {
                    let _ = tokio::signal::ctrl_c().await;
                };

                #[cfg(unix)]
                let terminate = async {
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(mut signal) => {
                            signal.recv().await;
                        }
                        Err(e) => {
                            error!("安装SIGTERM处理器失败: {e}");
                            std::future::pending::<()>().await;
                        }
                    }
                };

                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate => {}
                }

                info!("收到终止信号，回收活跃环境");
                registry.shutdown_all().await;
            });
        });
    }
}

/// 容器化模拟环境提供者
///
/// 通过docker命令行为每个单元启动一个独立的模拟环境容器，
/// 端口按启动顺序错开分配。
pub struct ContainerEnvironment {
    image: String,
    version: String,
    base_port: u16,
    port_stride: u16,
    next_slot: AtomicU16,
    http: reqwest::Client,
}

impl ContainerEnvironment {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            image: config.image.clone(),
            version: config.version.clone(),
            base_port: config.base_port,
            port_stride: config.port_stride,
            next_slot: AtomicU16::new(0),
            http: reqwest::Client::new(),
        }
    }

    fn allocate_port(&self) -> u16 {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        self.base_port + slot * self.port_stride
    }

    async fn docker(args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ValidatorError::EnvironmentStartup(format!("执行docker命令失败: {e}")))?;
        Ok(output)
    }
}

#[async_trait]
impl EnvironmentProvider for ContainerEnvironment {
    async fn start(&self, unit_id: &str, services: &[String]) -> Result<EnvironmentHandle> {
        let port = self.allocate_port();
        let image = format!("{}:{}", self.image, self.version);
        let services_env = format!("SERVICES={}", services.join(","));
        let port_mapping = format!("{port}:4566");
        let short = &unit_id[..unit_id.len().min(8)];
        let name = format!("validator_{short}_{port}");

        info!("启动环境容器 {name} (services={})", services.join(","));
        let output = Self::docker(&[
            "run",
            "-d",
            "--name",
            &name,
            "-p",
            &port_mapping,
            "-e",
            &services_env,
            "-e",
            "DEBUG=0",
            &image,
        ])
        .await?;

        if !output.status.success() {
            return Err(ValidatorError::EnvironmentStartup(format!(
                "容器启动失败: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(EnvironmentHandle {
            id: container_id,
            unit_id: unit_id.to_string(),
            endpoint: format!("http://localhost:{port}"),
        })
    }

    async fn healthy(&self, endpoint: &str) -> bool {
        let url = format!("{endpoint}/_localstack/health");
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("健康检查未就绪 {endpoint}: {e}");
                false
            }
        }
    }

    async fn logs(&self, handle: &EnvironmentHandle) -> String {
        match Self::docker(&["logs", &handle.id]).await {
            Ok(output) => {
                let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
                logs.push_str(&String::from_utf8_lossy(&output.stderr));
                // 只保留末尾5000字符
                if logs.len() > 5000 {
                    let cut = logs.len() - 5000;
                    let boundary = logs
                        .char_indices()
                        .map(|(i, _)| i)
                        .find(|i| *i >= cut)
                        .unwrap_or(0);
                    logs = logs[boundary..].to_string();
                }
                logs
            }
            Err(_) => String::new(),
        }
    }

    async fn stop(&self, handle: &EnvironmentHandle) -> Result<()> {
        let stop = Self::docker(&["stop", "-t", "5", &handle.id]).await;
        if let Err(e) = stop {
            warn!("停止容器 {} 失败: {e}", handle.id);
        }
        // rm失败不视为错误，容器可能带 --rm 自动清理
        let _ = Self::docker(&["rm", "-f", &handle.id]).await;
        Ok(())
    }
}
