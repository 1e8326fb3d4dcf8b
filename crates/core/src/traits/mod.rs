pub mod executor;
pub mod store;

pub use executor::{
    ConfigApplier, EnvironmentHandle, EnvironmentProvider, TestRunner, UnitValidator,
};
pub use store::{TaskStore, WorkerRegistry};
