use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
	#[error("Coordination store error: {0}")]
	Store(#[from] redis::RedisError),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Labeling backend error: {0}")]
	Labeling(#[from] labeling::LabelingError),
	#[error("Ledger error: {0}")]
	Ledger(#[from] ledger::LedgerError),
	#[error("No tasks available in assignment queue")]
	QueueEmpty,
	#[error("No available tasks for agent {agent_id} - all tasks are locked or recently skipped")]
	AttemptsExhausted { agent_id: i64 },
	#[error("Task {task_id} is not locked by agent {agent_id}")]
	NotHolder { task_id: i64, agent_id: i64 },
	#[error("Unexpected claim reply from coordination store: {0}")]
	Protocol(String),
}
