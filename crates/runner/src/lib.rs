pub mod apply;
pub mod environment;
pub mod orchestrator;
pub mod testing;

pub use apply::CliConfigApplier;
pub use environment::{expanded_services, ContainerEnvironment, EnvironmentRegistry};
pub use orchestrator::ValidationOrchestrator;
pub use testing::CliTestRunner;
