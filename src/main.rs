use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use validator_core::AppConfig;

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("validator")
        .version("1.0.0")
        .about("IaC架构验证与质量监控系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["local", "worker", "coordinator"])
                .default_value("local"),
        )
        .arg(
            Arg::new("units")
                .short('u')
                .long("units")
                .value_name("FILE")
                .help("验证单元JSON文件 (local与coordinator模式必需)")
                .required_if_eq_any([("mode", "local"), ("mode", "coordinator")]),
        )
        .arg(
            Arg::new("run-id")
                .long("run-id")
                .value_name("ID")
                .help("run标识，缺省自动生成"),
        )
        .arg(
            Arg::new("worker-id")
                .long("worker-id")
                .value_name("ID")
                .help("Worker ID (仅在worker模式下使用)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mode_str = matches.get_one::<String>("mode").cloned().unwrap_or_default();
    let units_file = matches.get_one::<String>("units").map(PathBuf::from);
    let run_id = matches.get_one::<String>("run-id").cloned();
    let worker_id = matches.get_one::<String>("worker-id");
    let log_level = matches.get_one::<String>("log-level").cloned().unwrap_or_default();
    let log_format = matches.get_one::<String>("log-format").cloned().unwrap_or_default();

    // 初始化日志系统
    init_logging(&log_level, &log_format)?;

    info!("启动IaC架构验证系统");
    info!("运行模式: {mode_str}");

    // 加载配置
    let mut config = AppConfig::load(config_path.map(|s| s.as_str())).context("加载配置失败")?;
    if let Some(id) = worker_id {
        config.worker.worker_id = id.clone();
    }

    let mode = parse_app_mode(&mode_str, units_file)?;
    let app = Application::new(config, mode, run_id);

    // 创建优雅关闭管理器并启动应用
    let shutdown_manager = ShutdownManager::new();
    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::new(app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut app_handle => {
            match result {
                Ok(Ok(())) => info!("运行完成"),
                Ok(Err(e)) => {
                    error!("应用运行失败: {e:#}");
                    std::process::exit(1);
                }
                Err(e) => error!("应用任务join失败: {e}"),
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
                Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
                Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
                Ok(Err(e)) => error!("应用任务join失败: {e}"),
                Err(_) => warn!("应用关闭超时，强制退出"),
            }
        }
    }

    info!("验证系统已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 解析运行模式
fn parse_app_mode(mode_str: &str, units_file: Option<PathBuf>) -> Result<AppMode> {
    match mode_str {
        "local" => {
            let units_file =
                units_file.ok_or_else(|| anyhow::anyhow!("local模式需要 --units 参数"))?;
            Ok(AppMode::Local { units_file })
        }
        "worker" => Ok(AppMode::Worker),
        "coordinator" => {
            let units_file =
                units_file.ok_or_else(|| anyhow::anyhow!("coordinator模式需要 --units 参数"))?;
            Ok(AppMode::Coordinator { units_file })
        }
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
