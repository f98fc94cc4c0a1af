pub mod client;
pub mod error;
pub mod types;

pub use client::LabelingClient;
pub use error::LabelingError;
pub use types::{TaskData, TaskRecord};
