pub mod task_store;
pub mod worker_registry;

pub use task_store::FileTaskStore;
pub use worker_registry::FileWorkerRegistry;
