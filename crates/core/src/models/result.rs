use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 验证状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "ERROR")]
    Error,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "PASSED",
            ValidationStatus::Partial => "PARTIAL",
            ValidationStatus::Failed => "FAILED",
            ValidationStatus::Timeout => "TIMEOUT",
            ValidationStatus::Error => "ERROR",
        }
    }
}

/// 配置应用结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    pub resources_created: u32,
    pub logs: String,
}

/// 单个测试用例结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// 测试结果状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Error,
}

/// 测试套件执行结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub output: String,
    #[serde(default)]
    pub tests: Vec<TestCaseResult>,
}

impl TestSuiteResult {
    /// 根据测试通过情况推导验证状态
    pub fn classify(&self) -> ValidationStatus {
        if self.failed == 0 {
            ValidationStatus::Passed
        } else if self.passed > 0 {
            ValidationStatus::Partial
        } else {
            ValidationStatus::Failed
        }
    }
}

/// 单元验证结果
///
/// 每个实际执行的单元恰好产生一条，返回后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub unit_id: String,
    pub run_id: String,
    pub status: ValidationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub apply_result: Option<ApplyResult>,
    #[serde(default)]
    pub test_result: Option<TestSuiteResult>,
    #[serde(default)]
    pub environment_logs: String,
    #[serde(default)]
    pub error_message: Option<String>,
    /// 结果是否来自缓存（未实际执行）
    #[serde(default)]
    pub from_cache: bool,
}

impl ValidationResult {
    fn base(
        unit_id: &str,
        run_id: &str,
        status: ValidationStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            unit_id: unit_id.to_string(),
            run_id: run_id.to_string(),
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            apply_result: None,
            test_result: None,
            environment_logs: String::new(),
            error_message: None,
            from_cache: false,
        }
    }

    /// 构造错误结果
    pub fn error(
        unit_id: &str,
        run_id: &str,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut result = Self::base(unit_id, run_id, ValidationStatus::Error, started_at);
        result.error_message = Some(message.into());
        result
    }

    /// 构造超时结果
    pub fn timeout(unit_id: &str, run_id: &str, started_at: DateTime<Utc>) -> Self {
        let mut result = Self::base(unit_id, run_id, ValidationStatus::Timeout, started_at);
        result.error_message = Some("验证超时".to_string());
        result
    }

    /// 从缓存状态合成结果，不触碰任何环境
    pub fn cached(unit_id: &str, run_id: &str, status: ValidationStatus, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            unit_id: unit_id.to_string(),
            run_id: run_id.to_string(),
            status,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            apply_result: None,
            test_result: None,
            environment_logs: String::new(),
            error_message: Some(reason.to_string()),
            from_cache: true,
        }
    }
}

/// 批量验证计数
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchCounts {
    pub total: u32,
    pub passed: u32,
    pub partial: u32,
    pub failed: u32,
    pub timeout: u32,
    pub error: u32,
    /// 其中由缓存直接合成的数量
    pub skipped: u32,
}

impl BatchCounts {
    /// 按结果状态累加计数
    pub fn record(&mut self, result: &ValidationResult) {
        match result.status {
            ValidationStatus::Passed => self.passed += 1,
            ValidationStatus::Partial => self.partial += 1,
            ValidationStatus::Failed => self.failed += 1,
            ValidationStatus::Timeout => self.timeout += 1,
            ValidationStatus::Error => self.error += 1,
        }
        if result.from_cache {
            self.skipped += 1;
        }
    }
}

/// 批量验证报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub counts: BatchCounts,
    pub results: Vec<ValidationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_suite() {
        let mut suite = TestSuiteResult {
            total: 5,
            passed: 5,
            failed: 0,
            ..Default::default()
        };
        assert_eq!(suite.classify(), ValidationStatus::Passed);

        suite.passed = 3;
        suite.failed = 2;
        assert_eq!(suite.classify(), ValidationStatus::Partial);

        suite.passed = 0;
        suite.failed = 5;
        assert_eq!(suite.classify(), ValidationStatus::Failed);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ValidationStatus::Passed).unwrap();
        assert_eq!(json, "\"PASSED\"");
        let status: ValidationStatus = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(status, ValidationStatus::Timeout);
    }

    #[test]
    fn test_cached_result_marks_origin() {
        let result = ValidationResult::cached("u1", "run-1", ValidationStatus::Passed, "未变更");
        assert!(result.from_cache);
        assert_eq!(result.duration_seconds, 0.0);
        assert!(result.test_result.is_none());
    }

    #[test]
    fn test_batch_counts_record() {
        let mut counts = BatchCounts::default();
        let started = Utc::now();
        counts.record(&ValidationResult::error("u1", "r1", "boom", started));
        counts.record(&ValidationResult::cached(
            "u2",
            "r1",
            ValidationStatus::Passed,
            "未变更",
        ));
        assert_eq!(counts.error, 1);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.skipped, 1);
    }
}
