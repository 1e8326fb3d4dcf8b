use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::TestOutcome;

/// 环形缓冲区容量，只保留最近的N次结果
const RECENT_OUTCOMES_CAP: usize = 10;

/// 测试稳定性记录
///
/// 按 (unit_id, test_name) 维度累计通过率，用于识别不稳定（flaky）测试。
/// 判定条件：total_runs >= 3 且 0.1 < pass_rate < 0.9。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStabilityRecord {
    pub test_name: String,
    pub unit_id: String,
    pub total_runs: u64,
    pub passed_runs: u64,
    pub failed_runs: u64,
    pub pass_rate: f64,
    pub is_flaky: bool,
    /// 最近的结果，最多保留10条
    #[serde(default)]
    pub recent_outcomes: Vec<TestOutcome>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl TestStabilityRecord {
    pub fn new(unit_id: &str, test_name: &str) -> Self {
        Self {
            test_name: test_name.to_string(),
            unit_id: unit_id.to_string(),
            total_runs: 0,
            passed_runs: 0,
            failed_runs: 0,
            pass_rate: 0.0,
            is_flaky: false,
            recent_outcomes: Vec::new(),
            first_seen: None,
            last_seen: None,
        }
    }

    /// 记录一次测试结果并重新计算稳定性
    pub fn update(&mut self, outcome: TestOutcome) {
        self.total_runs += 1;
        if outcome == TestOutcome::Passed {
            self.passed_runs += 1;
        } else {
            self.failed_runs += 1;
        }

        self.pass_rate = self.passed_runs as f64 / self.total_runs as f64;

        self.recent_outcomes.push(outcome);
        if self.recent_outcomes.len() > RECENT_OUTCOMES_CAP {
            let overflow = self.recent_outcomes.len() - RECENT_OUTCOMES_CAP;
            self.recent_outcomes.drain(..overflow);
        }

        self.is_flaky = self.total_runs >= 3 && self.pass_rate > 0.1 && self.pass_rate < 0.9;

        let now = Utc::now();
        self.last_seen = Some(now);
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
    }
}
