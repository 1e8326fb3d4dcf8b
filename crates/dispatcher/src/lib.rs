pub mod coordinator;

pub use coordinator::{DistributedCoordinator, RunStatus, RunSubmission};
