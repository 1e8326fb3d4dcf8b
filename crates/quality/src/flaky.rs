use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use validator_core::{
    Result, TestCaseResult, TestOutcome, TestStabilityRecord, TestSuiteResult,
};

/// 不稳定测试识别与稳定化
///
/// 按 (unit_id, test_name) 累计历史通过率；对存在不稳定测试的单元，
/// 以递减投入的次数重复运行测试并做多数投票合并。
pub struct FlakyTestStabilizer {
    stability_file: PathBuf,
    records: RwLock<HashMap<String, TestStabilityRecord>>,
}

/// 稳定化运行的合并结果
#[derive(Debug, Clone)]
pub struct StabilizedSuite {
    /// 多数投票合并后的套件结果
    pub suite: TestSuiteResult,
    /// 实际运行次数
    pub runs_attempted: u32,
    /// 多次运行间结果不一致的测试数
    pub inconsistent_tests: u32,
}

/// 稳定性统计报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityReport {
    pub total_tests_tracked: usize,
    pub flaky_count: usize,
    pub stable_count: usize,
    pub average_pass_rate: f64,
    /// 通过率最接近50%的测试，最多10个
    pub most_unstable: Vec<TestStabilityRecord>,
}

impl FlakyTestStabilizer {
    pub async fn new(state_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let stabilizer = Self {
            stability_file: state_dir.join("test_stability.json"),
            records: RwLock::new(HashMap::new()),
        };
        stabilizer.load().await;
        Ok(stabilizer)
    }

    async fn load(&self) {
        match tokio::fs::read_to_string(&self.stability_file).await {
            Ok(content) => {
                match serde_json::from_str::<HashMap<String, TestStabilityRecord>>(&content) {
                    Ok(loaded) => {
                        let mut records = self.records.write().await;
                        *records = loaded;
                        debug!("加载稳定性记录 {} 条", records.len());
                    }
                    Err(e) => warn!("解析稳定性记录失败，按空记录处理: {e}"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("读取稳定性记录失败，按空记录处理: {e}"),
        }
    }

    async fn save(&self, records: &HashMap<String, TestStabilityRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.stability_file, content).await?;
        Ok(())
    }

    fn key(unit_id: &str, test_name: &str) -> String {
        format!("{unit_id}:{test_name}")
    }

    /// 记录一次套件执行中每个测试的结果
    pub async fn record_suite(
        &self,
        unit_id: &str,
        tests: &[TestCaseResult],
    ) -> Result<Vec<TestStabilityRecord>> {
        let mut records = self.records.write().await;
        let mut updated = Vec::new();

        for test in tests {
            let key = Self::key(unit_id, &test.name);
            let record = records
                .entry(key)
                .or_insert_with(|| TestStabilityRecord::new(unit_id, &test.name));
            record.update(test.outcome);
            updated.push(record.clone());
        }

        self.save(&records).await?;
        Ok(updated)
    }

    /// 返回不稳定测试，可按单元过滤
    pub async fn flaky_tests(&self, unit_id: Option<&str>) -> Vec<TestStabilityRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.is_flaky)
            .filter(|record| unit_id.is_none_or(|id| record.unit_id == id))
            .cloned()
            .collect()
    }

    /// 按不稳定测试数量推荐运行次数（刻意粗粒度的递减投入）
    pub fn recommended_reruns(flaky_count: usize) -> u32 {
        match flaky_count {
            0 => 1,
            1..=2 => 2,
            3..=5 => 3,
            _ => 5,
        }
    }

    /// 稳定化执行：重复运行测试并按多数投票合并
    ///
    /// 运行次数为 min(历史推荐值, max_runs)；一旦某次运行零失败即提前停止。
    /// 合并规则：passed票数严格多于其余票数才算通过，平票判failed。
    pub async fn stabilize<F, Fut>(
        &self,
        unit_id: &str,
        run_fn: F,
        max_runs: u32,
    ) -> Result<StabilizedSuite>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<TestSuiteResult>>,
    {
        let flaky_count = self.flaky_tests(Some(unit_id)).await.len();
        let planned = Self::recommended_reruns(flaky_count).min(max_runs.max(1));

        let mut votes: BTreeMap<String, Vec<TestOutcome>> = BTreeMap::new();
        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        let mut last_suite = TestSuiteResult::default();
        let mut runs_attempted = 0;

        for run_index in 0..planned {
            debug!("单元 {unit_id} 测试运行 {}/{planned}", run_index + 1);
            let suite = run_fn().await?;
            runs_attempted += 1;

            for test in &suite.tests {
                votes.entry(test.name.clone()).or_default().push(test.outcome);
                if let Some(message) = &test.error_message {
                    errors.insert(test.name.clone(), message.clone());
                }
            }
            self.record_suite(unit_id, &suite.tests).await?;

            let clean = suite.failed == 0;
            last_suite = suite;
            if clean {
                break;
            }
        }

        // 没有逐条测试结果时无法投票，直接沿用最后一次的聚合计数
        if votes.is_empty() {
            return Ok(StabilizedSuite {
                suite: last_suite,
                runs_attempted,
                inconsistent_tests: 0,
            });
        }

        // 多数投票合并，平票保守判failed
        let mut consolidated = Vec::new();
        let mut passed = 0u32;
        let mut failed = 0u32;
        let mut inconsistent = 0u32;

        for (name, outcomes) in &votes {
            let passed_votes = outcomes
                .iter()
                .filter(|o| **o == TestOutcome::Passed)
                .count();
            let failed_votes = outcomes.len() - passed_votes;
            let outcome = if passed_votes > failed_votes {
                TestOutcome::Passed
            } else {
                TestOutcome::Failed
            };

            if passed_votes > 0 && failed_votes > 0 {
                inconsistent += 1;
            }
            match outcome {
                TestOutcome::Passed => passed += 1,
                _ => failed += 1,
            }

            consolidated.push(TestCaseResult {
                name: name.clone(),
                outcome,
                duration_seconds: 0.0,
                error_message: if outcome == TestOutcome::Failed {
                    errors.get(name).cloned()
                } else {
                    None
                },
            });
        }

        if inconsistent > 0 {
            info!("单元 {unit_id} 发现 {inconsistent} 个结果不一致的测试（运行{runs_attempted}次）");
        }

        Ok(StabilizedSuite {
            suite: TestSuiteResult {
                total: consolidated.len() as u32,
                passed,
                failed,
                skipped: 0,
                output: last_suite.output,
                tests: consolidated,
            },
            runs_attempted,
            inconsistent_tests: inconsistent,
        })
    }

    /// 生成稳定性报告
    pub async fn report(&self, unit_id: Option<&str>) -> StabilityReport {
        let records = self.records.read().await;
        let filtered: Vec<&TestStabilityRecord> = records
            .values()
            .filter(|record| unit_id.is_none_or(|id| record.unit_id == id))
            .collect();

        let average_pass_rate = if filtered.is_empty() {
            0.0
        } else {
            filtered.iter().map(|r| r.pass_rate).sum::<f64>() / filtered.len() as f64
        };

        let mut unstable: Vec<&TestStabilityRecord> = filtered
            .iter()
            .copied()
            .filter(|r| r.total_runs >= 3)
            .collect();
        unstable.sort_by(|a, b| {
            let da = (a.pass_rate - 0.5).abs();
            let db = (b.pass_rate - 0.5).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

        StabilityReport {
            total_tests_tracked: filtered.len(),
            flaky_count: filtered.iter().filter(|r| r.is_flaky).count(),
            stable_count: filtered
                .iter()
                .filter(|r| !r.is_flaky && r.total_runs >= 3)
                .count(),
            average_pass_rate,
            most_unstable: unstable.into_iter().take(10).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn case(name: &str, outcome: TestOutcome) -> TestCaseResult {
        TestCaseResult {
            name: name.to_string(),
            outcome,
            duration_seconds: 0.1,
            error_message: (outcome == TestOutcome::Failed).then(|| "assertion failed".to_string()),
        }
    }

    fn suite(tests: Vec<TestCaseResult>) -> TestSuiteResult {
        let passed = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Passed)
            .count() as u32;
        let failed = tests
            .iter()
            .filter(|t| t.outcome == TestOutcome::Failed)
            .count() as u32;
        TestSuiteResult {
            total: tests.len() as u32,
            passed,
            failed,
            skipped: 0,
            output: String::new(),
            tests,
        }
    }

    #[tokio::test]
    async fn test_record_suite_tracks_flakiness() {
        let dir = tempfile::tempdir().unwrap();
        let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();

        for outcome in [
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Passed,
        ] {
            stabilizer
                .record_suite("u1", &[case("test_put", outcome)])
                .await
                .unwrap();
        }

        let flaky = stabilizer.flaky_tests(Some("u1")).await;
        assert_eq!(flaky.len(), 1);
        assert!((flaky[0].pass_rate - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_rerun_schedule() {
        assert_eq!(FlakyTestStabilizer::recommended_reruns(0), 1);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(1), 2);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(2), 2);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(3), 3);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(5), 3);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(6), 5);
        assert_eq!(FlakyTestStabilizer::recommended_reruns(100), 5);
    }

    #[tokio::test]
    async fn test_stabilize_clean_run_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();
        let calls = AtomicU32::new(0);

        let outcome = stabilizer
            .stabilize(
                "u1",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(suite(vec![case("test_a", TestOutcome::Passed)])) }
                },
                3,
            )
            .await
            .unwrap();

        // 无不稳定历史时只计划一次
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.runs_attempted, 1);
        assert_eq!(outcome.suite.passed, 1);
        assert_eq!(outcome.suite.failed, 0);
    }

    #[tokio::test]
    async fn test_stabilize_majority_vote_and_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();

        // 预置不稳定历史，让推荐次数达到2（平票场景）
        for outcome in [
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Passed,
            TestOutcome::Failed,
        ] {
            stabilizer
                .record_suite("u1", &[case("test_tie", outcome)])
                .await
                .unwrap();
        }

        let calls = AtomicU32::new(0);
        let outcome = stabilizer
            .stabilize(
                "u1",
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        // 第一次失败、第二次通过 -> 1:1平票
                        let result = if call == 0 {
                            case("test_tie", TestOutcome::Failed)
                        } else {
                            case("test_tie", TestOutcome::Passed)
                        };
                        Ok(suite(vec![result]))
                    }
                },
                3,
            )
            .await
            .unwrap();

        assert_eq!(outcome.runs_attempted, 2);
        assert_eq!(outcome.inconsistent_tests, 1);
        // 平票保守判failed
        assert_eq!(outcome.suite.failed, 1);
        assert_eq!(outcome.suite.tests[0].outcome, TestOutcome::Failed);
    }

    #[tokio::test]
    async fn test_stabilize_respects_max_runs() {
        let dir = tempfile::tempdir().unwrap();
        let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();

        // 六个不稳定测试 -> 推荐5次，但max_runs=2封顶
        for test_index in 0..6 {
            for outcome in [
                TestOutcome::Passed,
                TestOutcome::Failed,
                TestOutcome::Passed,
            ] {
                stabilizer
                    .record_suite("u1", &[case(&format!("test_{test_index}"), outcome)])
                    .await
                    .unwrap();
            }
        }

        let calls = AtomicU32::new(0);
        stabilizer
            .stabilize(
                "u1",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(suite(vec![case("test_0", TestOutcome::Failed)])) }
                },
                2,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_report_shape() {
        let dir = tempfile::tempdir().unwrap();
        let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();

        for _ in 0..4 {
            stabilizer
                .record_suite("u1", &[case("test_stable", TestOutcome::Passed)])
                .await
                .unwrap();
        }
        for outcome in [
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Passed,
            TestOutcome::Failed,
        ] {
            stabilizer
                .record_suite("u1", &[case("test_flaky", outcome)])
                .await
                .unwrap();
        }

        let report = stabilizer.report(Some("u1")).await;
        assert_eq!(report.total_tests_tracked, 2);
        assert_eq!(report.flaky_count, 1);
        assert_eq!(report.stable_count, 1);
        assert_eq!(report.most_unstable[0].test_name, "test_flaky");
    }

    #[tokio::test]
    async fn test_records_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stabilizer = FlakyTestStabilizer::new(dir.path()).await.unwrap();
            stabilizer
                .record_suite("u1", &[case("test_a", TestOutcome::Passed)])
                .await
                .unwrap();
        }

        let reopened = FlakyTestStabilizer::new(dir.path()).await.unwrap();
        let report = reopened.report(None).await;
        assert_eq!(report.total_tests_tracked, 1);
    }
}
