use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use validator_core::{
    Result, TestCaseResult, TestOutcome, TestRunner, TestSuiteResult, ValidatorError,
};

/// 命令行测试运行器
///
/// 以详细模式运行测试套件并解析逐条测试结果。超时映射为
/// `StageTimeout`，由编排器转成TIMEOUT状态。
pub struct CliTestRunner {
    command: String,
    args: Vec<String>,
}

impl CliTestRunner {
    pub fn new() -> Self {
        Self {
            command: "pytest".to_string(),
            args: vec![
                "test_app.py".to_string(),
                "-v".to_string(),
                "--tb=short".to_string(),
            ],
        }
    }

    pub fn with_command(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// 解析详细输出中的单条测试行
    ///
    /// 形如 `test_app.py::test_put_object PASSED [ 20%]`。
    fn parse_verbose_output(output: &str) -> Vec<TestCaseResult> {
        let mut tests = Vec::new();

        for line in output.lines() {
            let mut parts = line.split_whitespace();
            let Some(location) = parts.next() else {
                continue;
            };
            let Some((_, name)) = location.split_once("::") else {
                continue;
            };
            let Some(status) = parts.next() else {
                continue;
            };

            let outcome = match status {
                "PASSED" => TestOutcome::Passed,
                "FAILED" => TestOutcome::Failed,
                "SKIPPED" => TestOutcome::Skipped,
                "ERROR" => TestOutcome::Error,
                _ => continue,
            };

            tests.push(TestCaseResult {
                name: name.to_string(),
                outcome,
                duration_seconds: 0.0,
                error_message: None,
            });
        }

        tests
    }

    fn build_suite(output: String) -> TestSuiteResult {
        let tests = Self::parse_verbose_output(&output);

        if tests.is_empty() {
            // 解析不出逐条结果时退化为词频统计
            let passed = output.matches(" passed").count() as u32;
            let failed = output.matches(" failed").count() as u32;
            let skipped = output.matches(" skipped").count() as u32;
            return TestSuiteResult {
                total: passed + failed + skipped,
                passed,
                failed,
                skipped,
                output,
                tests,
            };
        }

        let passed = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Passed)
            .count() as u32;
        let failed = tests
            .iter()
            .filter(|t| matches!(t.outcome, TestOutcome::Failed | TestOutcome::Error))
            .count() as u32;
        let skipped = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Skipped)
            .count() as u32;

        TestSuiteResult {
            total: tests.len() as u32,
            passed,
            failed,
            skipped,
            output,
            tests,
        }
    }
}

impl Default for CliTestRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestRunner for CliTestRunner {
    async fn run(
        &self,
        workdir: &Path,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<TestSuiteResult> {
        debug!("运行测试套件: {} ({endpoint})", workdir.display());

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(workdir)
            .env("VALIDATION_ENDPOINT", endpoint)
            .env("AWS_ACCESS_KEY_ID", "test")
            .env("AWS_SECRET_ACCESS_KEY", "test")
            .env("AWS_DEFAULT_REGION", "us-east-1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result
                .map_err(|e| ValidatorError::Execution(format!("启动{}失败: {e}", self.command)))?,
            Err(_) => {
                return Err(ValidatorError::StageTimeout {
                    stage: "test_run".to_string(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&stderr);
        }

        Ok(Self::build_suite(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbose_lines() {
        let output = "\
test_app.py::test_put_object PASSED                      [ 20%]
test_app.py::test_get_object FAILED                      [ 40%]
test_app.py::test_list_objects SKIPPED                   [ 60%]
some unrelated line
test_app.py::test_delete_object PASSED                   [100%]
";
        let tests = CliTestRunner::parse_verbose_output(output);
        assert_eq!(tests.len(), 4);
        assert_eq!(tests[0].name, "test_put_object");
        assert_eq!(tests[0].outcome, TestOutcome::Passed);
        assert_eq!(tests[1].outcome, TestOutcome::Failed);
        assert_eq!(tests[2].outcome, TestOutcome::Skipped);
    }

    #[test]
    fn test_build_suite_counts() {
        let output = "\
test_app.py::test_a PASSED
test_app.py::test_b FAILED
test_app.py::test_c ERROR
"
        .to_string();
        let suite = CliTestRunner::build_suite(output);
        assert_eq!(suite.total, 3);
        assert_eq!(suite.passed, 1);
        assert_eq!(suite.failed, 2);
        assert_eq!(suite.classify(), validator_core::ValidationStatus::Partial);
    }

    #[test]
    fn test_fallback_token_counting() {
        let suite = CliTestRunner::build_suite("5 passed, 1 failed in 2.3s".to_string());
        assert_eq!(suite.passed, 1); // " passed"出现一次
        assert_eq!(suite.failed, 1);
        assert!(suite.tests.is_empty());
    }

    #[tokio::test]
    async fn test_missing_command_reports_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CliTestRunner::with_command("definitely-not-a-real-cli", vec![]);
        let result = runner
            .run(dir.path(), "http://localhost:5100", Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }
}
