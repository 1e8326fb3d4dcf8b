use serde::{Deserialize, Serialize};

/// 计时阶段类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    EnvironmentStart,
    ConfigApply,
    TestRun,
    Teardown,
    TotalValidation,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::EnvironmentStart => "environment_start",
            MetricKind::ConfigApply => "config_apply",
            MetricKind::TestRun => "test_run",
            MetricKind::Teardown => "teardown",
            MetricKind::TotalValidation => "total_validation",
        }
    }
}

/// 性能趋势
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
}

/// 性能基线
///
/// 按 (unit_id, metric_kind) 维度的在线统计：均值、标准差（Welford增量更新）、
/// 极值与趋势。样本数达到3后才开始趋势判定。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub unit_id: String,
    pub metric_kind: MetricKind,
    pub sample_count: u64,
    pub mean_seconds: f64,
    pub stddev_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
    pub last_seconds: f64,
    pub trend: Trend,
}

impl PerformanceBaseline {
    pub fn new(unit_id: &str, metric_kind: MetricKind) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            metric_kind,
            sample_count: 0,
            mean_seconds: 0.0,
            stddev_seconds: 0.0,
            min_seconds: 0.0,
            max_seconds: 0.0,
            last_seconds: 0.0,
            trend: Trend::Stable,
        }
    }

    /// 记录一次耗时样本
    pub fn update(&mut self, duration: f64) {
        self.sample_count += 1;
        self.last_seconds = duration;

        if self.sample_count == 1 {
            self.mean_seconds = duration;
            self.min_seconds = duration;
            self.max_seconds = duration;
            self.stddev_seconds = 0.0;
        } else {
            let n = self.sample_count as f64;
            let old_mean = self.mean_seconds;
            self.mean_seconds = old_mean + (duration - old_mean) / n;

            // Welford增量方差
            let variance = ((n - 1.0) * self.stddev_seconds * self.stddev_seconds
                + (duration - old_mean) * (duration - self.mean_seconds))
                / n;
            self.stddev_seconds = variance.max(0.0).sqrt();

            self.min_seconds = self.min_seconds.min(duration);
            self.max_seconds = self.max_seconds.max(duration);
        }

        if self.sample_count >= 3 {
            self.trend = if duration > self.mean_seconds + 2.0 * self.stddev_seconds {
                Trend::Degrading
            } else if duration < self.mean_seconds - self.stddev_seconds {
                Trend::Improving
            } else {
                Trend::Stable
            };
        }
    }

    /// 给定耗时是否构成回归（不修改状态）
    pub fn exceeds(&self, duration: f64, multiplier: f64) -> bool {
        if self.sample_count < 3 {
            return false;
        }
        duration > self.mean_seconds + multiplier * self.stddev_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_initializes() {
        let mut baseline = PerformanceBaseline::new("u1", MetricKind::ConfigApply);
        baseline.update(4.2);

        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.mean_seconds, 4.2);
        assert_eq!(baseline.min_seconds, 4.2);
        assert_eq!(baseline.max_seconds, 4.2);
        assert_eq!(baseline.stddev_seconds, 0.0);
    }

    #[test]
    fn test_constant_samples_stable() {
        let mut baseline = PerformanceBaseline::new("u1", MetricKind::TestRun);
        for _ in 0..3 {
            baseline.update(10.0);
        }
        assert_eq!(baseline.mean_seconds, 10.0);
        assert_eq!(baseline.stddev_seconds, 0.0);
        assert_eq!(baseline.trend, Trend::Stable);
    }

    #[test]
    fn test_spike_degrades() {
        let mut baseline = PerformanceBaseline::new("u1", MetricKind::TotalValidation);
        for _ in 0..3 {
            baseline.update(10.0);
        }
        baseline.update(50.0);
        assert_eq!(baseline.trend, Trend::Degrading);
        assert_eq!(baseline.max_seconds, 50.0);
    }

    #[test]
    fn test_exceeds_requires_samples() {
        let mut baseline = PerformanceBaseline::new("u1", MetricKind::TestRun);
        baseline.update(10.0);
        baseline.update(10.0);
        assert!(!baseline.exceeds(1000.0, 2.0));

        baseline.update(10.0);
        assert!(baseline.exceeds(10.1, 2.0));
        assert!(!baseline.exceeds(10.0, 2.0));
    }

    #[test]
    fn test_welford_matches_direct_stddev() {
        let samples = [3.0, 7.0, 7.0, 19.0];
        let mut baseline = PerformanceBaseline::new("u1", MetricKind::ConfigApply);
        for s in samples {
            baseline.update(s);
        }
        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance: f64 =
            samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / samples.len() as f64;
        assert!((baseline.mean_seconds - mean).abs() < 1e-9);
        assert!((baseline.stddev_seconds - variance.sqrt()).abs() < 1e-9);
    }
}
