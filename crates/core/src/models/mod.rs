pub mod baseline;
pub mod cache;
pub mod result;
pub mod stability;
pub mod task;
pub mod unit;
pub mod worker;

pub use baseline::{MetricKind, PerformanceBaseline, Trend};
pub use cache::CacheEntry;
pub use result::{
    ApplyResult, BatchCounts, BatchReport, TestCaseResult, TestOutcome, TestSuiteResult,
    ValidationResult, ValidationStatus,
};
pub use stability::TestStabilityRecord;
pub use task::{QueueStats, TaskState, ValidationTask};
pub use unit::ValidationUnit;
pub use worker::{WorkerRecord, WorkerState};
