use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use validator_core::{MetricKind, PerformanceBaseline, Result, Trend};

/// 性能基线跟踪器
///
/// 每个计时阶段一条在线统计基线，实际执行后更新并立即落盘。
pub struct PerformanceTracker {
    /// 为None时只在内存中跟踪（测试用）
    baselines_file: Option<PathBuf>,
    baselines: RwLock<HashMap<String, PerformanceBaseline>>,
}

/// 慢于基线的操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowOperation {
    pub unit_id: String,
    pub metric_kind: MetricKind,
    pub last_seconds: f64,
    pub mean_seconds: f64,
    pub deviation_seconds: f64,
    pub trend: Trend,
}

/// 性能统计报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_metrics_tracked: usize,
    pub unique_units: usize,
    pub degrading: Vec<SlowOperation>,
    pub improving: Vec<SlowOperation>,
}

impl PerformanceTracker {
    pub async fn new(state_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let tracker = Self {
            baselines_file: Some(state_dir.join("performance_baselines.json")),
            baselines: RwLock::new(HashMap::new()),
        };
        tracker.load().await;
        Ok(tracker)
    }

    /// 纯内存跟踪器
    pub fn in_memory() -> Self {
        Self {
            baselines_file: None,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    async fn load(&self) {
        let Some(path) = &self.baselines_file else {
            return;
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                match serde_json::from_str::<HashMap<String, PerformanceBaseline>>(&content) {
                    Ok(loaded) => {
                        let mut baselines = self.baselines.write().await;
                        *baselines = loaded;
                        debug!("加载性能基线 {} 条", baselines.len());
                    }
                    Err(e) => warn!("解析性能基线失败，按空数据处理: {e}"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("读取性能基线失败，按空数据处理: {e}"),
        }
    }

    async fn save(&self, baselines: &HashMap<String, PerformanceBaseline>) -> Result<()> {
        if let Some(path) = &self.baselines_file {
            let content = serde_json::to_string_pretty(baselines)?;
            tokio::fs::write(path, content).await?;
        }
        Ok(())
    }

    fn key(unit_id: &str, kind: MetricKind) -> String {
        format!("{unit_id}:{}", kind.as_str())
    }

    /// 记录一次阶段耗时
    pub async fn record_metric(
        &self,
        unit_id: &str,
        kind: MetricKind,
        duration_seconds: f64,
    ) -> Result<PerformanceBaseline> {
        let mut baselines = self.baselines.write().await;
        let baseline = baselines
            .entry(Self::key(unit_id, kind))
            .or_insert_with(|| PerformanceBaseline::new(unit_id, kind));
        baseline.update(duration_seconds);
        let snapshot = baseline.clone();
        self.save(&baselines).await?;
        Ok(snapshot)
    }

    /// 读取基线
    pub async fn baseline(&self, unit_id: &str, kind: MetricKind) -> Option<PerformanceBaseline> {
        self.baselines
            .read()
            .await
            .get(&Self::key(unit_id, kind))
            .cloned()
    }

    /// 给定耗时是否构成回归（只读检查，不更新统计）
    pub async fn is_regression(
        &self,
        unit_id: &str,
        kind: MetricKind,
        duration_seconds: f64,
        threshold_multiplier: f64,
    ) -> bool {
        match self.baseline(unit_id, kind).await {
            Some(baseline) => baseline.exceeds(duration_seconds, threshold_multiplier),
            None => false,
        }
    }

    /// 基于历史估算单元的总验证耗时
    pub async fn estimated_duration(&self, unit_id: &str) -> Option<f64> {
        let baseline = self.baseline(unit_id, MetricKind::TotalValidation).await?;
        (baseline.sample_count >= 2).then_some(baseline.mean_seconds)
    }

    /// 最近一次耗时超出均值一个标准差的操作，按偏差降序
    pub async fn slow_operations(&self) -> Vec<SlowOperation> {
        let baselines = self.baselines.read().await;
        let mut slow: Vec<SlowOperation> = baselines
            .values()
            .filter(|b| b.sample_count >= 3)
            .filter(|b| b.last_seconds > b.mean_seconds + b.stddev_seconds)
            .map(|b| SlowOperation {
                unit_id: b.unit_id.clone(),
                metric_kind: b.metric_kind,
                last_seconds: b.last_seconds,
                mean_seconds: b.mean_seconds,
                deviation_seconds: b.last_seconds - b.mean_seconds,
                trend: b.trend,
            })
            .collect();

        slow.sort_by(|a, b| {
            b.deviation_seconds
                .partial_cmp(&a.deviation_seconds)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        slow
    }

    /// 汇总报告
    pub async fn report(&self) -> PerformanceReport {
        let baselines = self.baselines.read().await;
        let units: HashSet<&str> = baselines.values().map(|b| b.unit_id.as_str()).collect();

        let mut degrading = Vec::new();
        let mut improving = Vec::new();
        for baseline in baselines.values().filter(|b| b.sample_count >= 3) {
            let op = SlowOperation {
                unit_id: baseline.unit_id.clone(),
                metric_kind: baseline.metric_kind,
                last_seconds: baseline.last_seconds,
                mean_seconds: baseline.mean_seconds,
                deviation_seconds: baseline.last_seconds - baseline.mean_seconds,
                trend: baseline.trend,
            };
            match baseline.trend {
                Trend::Degrading => degrading.push(op),
                Trend::Improving => improving.push(op),
                Trend::Stable => {}
            }
        }

        PerformanceReport {
            total_metrics_tracked: baselines.len(),
            unique_units: units.len(),
            degrading,
            improving,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_constant_baseline_stays_stable() {
        let tracker = PerformanceTracker::in_memory();
        for _ in 0..3 {
            tracker
                .record_metric("u1", MetricKind::TestRun, 10.0)
                .await
                .unwrap();
        }

        let baseline = tracker.baseline("u1", MetricKind::TestRun).await.unwrap();
        assert_eq!(baseline.mean_seconds, 10.0);
        assert_eq!(baseline.stddev_seconds, 0.0);
        assert_eq!(baseline.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_spike_flips_trend_to_degrading() {
        let tracker = PerformanceTracker::in_memory();
        for _ in 0..3 {
            tracker
                .record_metric("u1", MetricKind::TestRun, 10.0)
                .await
                .unwrap();
        }
        let baseline = tracker
            .record_metric("u1", MetricKind::TestRun, 50.0)
            .await
            .unwrap();
        assert_eq!(baseline.trend, Trend::Degrading);
    }

    #[tokio::test]
    async fn test_is_regression_does_not_mutate() {
        let tracker = PerformanceTracker::in_memory();
        for _ in 0..3 {
            tracker
                .record_metric("u1", MetricKind::ConfigApply, 10.0)
                .await
                .unwrap();
        }

        assert!(
            tracker
                .is_regression("u1", MetricKind::ConfigApply, 100.0, 2.0)
                .await
        );

        let baseline = tracker
            .baseline("u1", MetricKind::ConfigApply)
            .await
            .unwrap();
        assert_eq!(baseline.sample_count, 3);
        assert_eq!(baseline.mean_seconds, 10.0);
    }

    #[tokio::test]
    async fn test_regression_needs_three_samples() {
        let tracker = PerformanceTracker::in_memory();
        tracker
            .record_metric("u1", MetricKind::ConfigApply, 10.0)
            .await
            .unwrap();
        assert!(
            !tracker
                .is_regression("u1", MetricKind::ConfigApply, 1000.0, 2.0)
                .await
        );
    }

    #[tokio::test]
    async fn test_estimated_duration() {
        let tracker = PerformanceTracker::in_memory();
        assert!(tracker.estimated_duration("u1").await.is_none());

        tracker
            .record_metric("u1", MetricKind::TotalValidation, 30.0)
            .await
            .unwrap();
        assert!(tracker.estimated_duration("u1").await.is_none());

        tracker
            .record_metric("u1", MetricKind::TotalValidation, 40.0)
            .await
            .unwrap();
        let estimate = tracker.estimated_duration("u1").await.unwrap();
        assert!((estimate - 35.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_baselines_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = PerformanceTracker::new(dir.path()).await.unwrap();
            tracker
                .record_metric("u1", MetricKind::TestRun, 5.0)
                .await
                .unwrap();
        }

        let reopened = PerformanceTracker::new(dir.path()).await.unwrap();
        let baseline = reopened.baseline("u1", MetricKind::TestRun).await.unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.last_seconds, 5.0);
    }

    #[tokio::test]
    async fn test_slow_operations_sorted_by_deviation() {
        let tracker = PerformanceTracker::in_memory();
        for _ in 0..3 {
            tracker
                .record_metric("u-small", MetricKind::TestRun, 10.0)
                .await
                .unwrap();
            tracker
                .record_metric("u-big", MetricKind::TestRun, 10.0)
                .await
                .unwrap();
        }
        tracker
            .record_metric("u-small", MetricKind::TestRun, 15.0)
            .await
            .unwrap();
        tracker
            .record_metric("u-big", MetricKind::TestRun, 60.0)
            .await
            .unwrap();

        let slow = tracker.slow_operations().await;
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].unit_id, "u-big");
    }
}
