pub mod config;
pub mod engine;
pub mod error;
pub mod processor;
pub mod reconciler;
pub mod store;

pub use config::DispatchConfig;
pub use engine::{AssignmentEngine, TaskAssignment};
pub use error::DispatchError;
pub use processor::TaskProcessor;
pub use reconciler::{QueueStats, Reconciler};
pub use store::{AuditList, ClaimOutcome, CoordinationStore};
