use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use validator_core::{ApplyResult, ConfigApplier, Result, ValidatorError};

/// init阶段的固定超时
const INIT_TIMEOUT: Duration = Duration::from_secs(120);
/// destroy阶段的固定超时
const DESTROY_TIMEOUT: Duration = Duration::from_secs(60);

/// 提供者覆盖文件中声明的服务端点
///
/// 只列应用工具与模拟环境都支持的服务，避免生成无法识别的端点配置。
const OVERRIDE_ENDPOINTS: [&str; 38] = [
    "acm",
    "apigateway",
    "apigatewayv2",
    "cloudformation",
    "cloudfront",
    "cloudtrail",
    "cloudwatch",
    "dynamodb",
    "ec2",
    "ecr",
    "ecs",
    "efs",
    "elasticsearch",
    "events",
    "firehose",
    "iam",
    "kinesis",
    "kms",
    "lambda",
    "logs",
    "opensearch",
    "rds",
    "redshiftdata",
    "resourcegroups",
    "route53",
    "s3",
    "s3control",
    "sagemaker",
    "secretsmanager",
    "servicediscovery",
    "ses",
    "sfn",
    "sns",
    "sqs",
    "ssm",
    "sts",
    "swf",
    "wafv2",
];

/// 命令行配置应用器
///
/// 驱动terraform兼容的CLI对模拟环境执行 init / apply / destroy。
/// 在apply前生成指向目标端点的提供者覆盖文件。
pub struct CliConfigApplier {
    command: String,
}

impl CliConfigApplier {
    pub fn new() -> Self {
        Self {
            command: "terraform".to_string(),
        }
    }

    /// 使用自定义CLI（如tofu）
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// 生成提供者覆盖文件，把所有服务端点指向模拟环境
    async fn write_provider_override(workdir: &Path, endpoint: &str) -> Result<()> {
        let endpoints_block: String = OVERRIDE_ENDPOINTS
            .iter()
            .map(|service| format!("    {service} = \"{endpoint}\"\n"))
            .collect();

        let content = format!(
            "provider \"aws\" {{\n\
             \x20 access_key                  = \"test\"\n\
             \x20 secret_key                  = \"test\"\n\
             \x20 region                      = \"us-east-1\"\n\
             \x20 skip_credentials_validation = true\n\
             \x20 skip_metadata_api_check     = true\n\
             \x20 skip_requesting_account_id  = true\n\n\
             \x20 endpoints {{\n{endpoints_block}  }}\n}}\n"
        );

        tokio::fs::write(workdir.join("providers_override.tf"), content).await?;
        Ok(())
    }

    /// 运行CLI子命令，超时即杀掉子进程
    async fn run(
        &self,
        workdir: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Option<std::process::Output>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(args)
            .current_dir(workdir)
            .env("AWS_ACCESS_KEY_ID", "test")
            .env("AWS_SECRET_ACCESS_KEY", "test")
            .env("AWS_DEFAULT_REGION", "us-east-1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => {
                let output = output
                    .map_err(|e| ValidatorError::Execution(format!("启动{}失败: {e}", self.command)))?;
                Ok(Some(output))
            }
            Err(_) => Ok(None),
        }
    }
}

impl Default for CliConfigApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigApplier for CliConfigApplier {
    async fn apply(
        &self,
        workdir: &Path,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<ApplyResult> {
        Self::write_provider_override(workdir, endpoint).await?;

        debug!("执行 {} init: {}", self.command, workdir.display());
        let init = match self.run(workdir, &["init", "-input=false"], INIT_TIMEOUT).await? {
            Some(output) => output,
            None => {
                return Ok(ApplyResult {
                    success: false,
                    resources_created: 0,
                    logs: "init阶段超时".to_string(),
                })
            }
        };

        if !init.status.success() {
            return Ok(ApplyResult {
                success: false,
                resources_created: 0,
                logs: format!(
                    "Init failed:\nSTDOUT: {}\nSTDERR: {}",
                    String::from_utf8_lossy(&init.stdout),
                    String::from_utf8_lossy(&init.stderr)
                ),
            });
        }

        debug!("执行 {} apply: {}", self.command, workdir.display());
        let apply = match self
            .run(
                workdir,
                &["apply", "-auto-approve", "-input=false"],
                timeout,
            )
            .await?
        {
            Some(output) => output,
            None => {
                return Ok(ApplyResult {
                    success: false,
                    resources_created: 0,
                    logs: "apply阶段超时".to_string(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&apply.stdout).to_string();
        let stderr = String::from_utf8_lossy(&apply.stderr).to_string();

        if !apply.status.success() {
            return Ok(ApplyResult {
                success: false,
                resources_created: 0,
                logs: format!("Apply failed:\nSTDOUT: {stdout}\nSTDERR: {stderr}"),
            });
        }

        let resources_created = stdout.matches("created").count() as u32;
        info!(
            "配置应用成功: {} (resources={resources_created})",
            workdir.display()
        );

        Ok(ApplyResult {
            success: true,
            resources_created,
            logs: stdout,
        })
    }

    async fn destroy(&self, workdir: &Path, _endpoint: &str) -> Result<()> {
        match self
            .run(
                workdir,
                &["destroy", "-auto-approve", "-input=false"],
                DESTROY_TIMEOUT,
            )
            .await
        {
            Ok(Some(output)) if !output.status.success() => {
                warn!(
                    "destroy退出非零: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Ok(Some(_)) => {}
            Ok(None) => warn!("destroy阶段超时: {}", workdir.display()),
            Err(e) => warn!("destroy执行失败: {e}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_override_contents() {
        let dir = tempfile::tempdir().unwrap();
        CliConfigApplier::write_provider_override(dir.path(), "http://localhost:5100")
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("providers_override.tf"))
            .await
            .unwrap();
        assert!(content.contains("provider \"aws\""));
        assert!(content.contains("s3 = \"http://localhost:5100\""));
        assert!(content.contains("skip_credentials_validation = true"));
    }

    #[tokio::test]
    async fn test_missing_cli_reports_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let applier = CliConfigApplier::with_command("definitely-not-a-real-cli");
        let result = applier
            .apply(dir.path(), "http://localhost:5100", Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }
}
