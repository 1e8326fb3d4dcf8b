pub mod flaky;
pub mod incremental;
pub mod performance;

pub use flaky::{FlakyTestStabilizer, StabilityReport, StabilizedSuite};
pub use incremental::{IncrementalCache, SkipBreakdown, SkipSummary};
pub use performance::{PerformanceReport, PerformanceTracker, SlowOperation};
