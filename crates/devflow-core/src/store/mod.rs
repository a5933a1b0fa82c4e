pub mod workflow_store;

pub use workflow_store::WorkflowStore;
