use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::reconciler::Reconciler;
use crate::store::{AuditList, ClaimOutcome, CoordinationStore};
use chrono::Utc;
use labeling::{LabelingClient, TaskData};
use ledger::{AgentStats, LedgerError, TranscriptionSession};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;

/// What an agent gets handed: a locked task plus everything needed to fetch
/// and transcribe its audio. Serialized verbatim into `agent:active:{A}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
	pub task_id: i64,
	pub audio_url: String,
	pub duration: Option<f64>,
	pub metadata: serde_json::Value,
}

impl TaskAssignment {
	#[must_use]
	pub fn audio_url_for(task_id: i64, agent_id: i64) -> String {
		format!("/api/audio/stream/{task_id}/{agent_id}")
	}
}

/// Hands each agent exactly one locked, non-conflicting task.
pub struct AssignmentEngine {
	store: CoordinationStore,
	labeling: Arc<LabelingClient>,
	reconciler: Arc<Reconciler>,
	pool: SqlitePool,
	config: Arc<DispatchConfig>,
}

impl AssignmentEngine {
	#[must_use]
	pub fn new(store: CoordinationStore, labeling: Arc<LabelingClient>, reconciler: Arc<Reconciler>, pool: SqlitePool, config: Arc<DispatchConfig>) -> Self {
		Self {
			store,
			labeling,
			reconciler,
			pool,
			config,
		}
	}

	/// Pop-and-lock the next task the agent is allowed to work on.
	///
	/// Re-requests while an assignment is live return it unchanged. An empty
	/// queue triggers one synchronous reconciliation before giving up with
	/// `QueueEmpty`; a queue full of conflicting tasks gives up with
	/// `AttemptsExhausted` after the configured number of claim attempts.
	///
	/// # Errors
	/// Returns `QueueEmpty`, `AttemptsExhausted`, or any store error
	pub async fn request_task(&self, agent_id: i64) -> Result<TaskAssignment, DispatchError> {
		if let Some(raw) = self.store.fetch_active(agent_id).await? {
			let assignment: TaskAssignment = serde_json::from_str(&raw)?;
			tracing::info!("Agent {} already has task {}", agent_id, assignment.task_id);
			return Ok(assignment);
		}

		let mut reconciled = false;
		for _ in 0..self.config.max_assignment_attempts {
			match self.store.claim_next(agent_id, self.config.disable_threshold, self.config.lock_ttl_secs).await? {
				ClaimOutcome::Task(task_id) => return self.finish_assignment(agent_id, task_id).await,
				ClaimOutcome::Empty => {
					if reconciled {
						return Err(DispatchError::QueueEmpty);
					}
					tracing::info!("Assignment queue empty, performing immediate sync");
					// A failed sync leaves the queue as-is; the periodic loop
					// will retry, this request just sees an empty queue.
					if let Err(e) = self.reconciler.sync().await {
						tracing::error!("On-demand queue sync failed: {e}");
					}
					reconciled = true;

					if self.store.queue_len().await? == 0 {
						return Err(DispatchError::QueueEmpty);
					}
				}
				ClaimOutcome::Skipped | ClaimOutcome::Locked | ClaimOutcome::Disabled => {}
			}
		}

		tracing::warn!("Agent {} exhausted {} claim attempts", agent_id, self.config.max_assignment_attempts);
		Err(DispatchError::AttemptsExhausted { agent_id })
	}

	async fn finish_assignment(&self, agent_id: i64, task_id: i64) -> Result<TaskAssignment, DispatchError> {
		// Metadata is best-effort: a labeling hiccup must not drop the lock
		// the claim script just took.
		let data = match self.labeling.task(task_id).await {
			Ok(record) => record.data,
			Err(e) => {
				tracing::warn!("Could not fetch metadata for task {}: {}", task_id, e);
				TaskData::default()
			}
		};

		let assignment = TaskAssignment {
			task_id,
			audio_url: TaskAssignment::audio_url_for(task_id, agent_id),
			duration: data.duration,
			metadata: data.metadata,
		};

		self.store.store_active(agent_id, &serde_json::to_string(&assignment)?, self.config.lock_ttl_secs).await?;

		if let Err(e) = self.record_assignment(agent_id, &assignment).await {
			tracing::error!("Ledger unavailable while recording assignment of task {} to agent {}: {}", task_id, agent_id, e);
		}

		let entry = json!({
			"agent_id": agent_id,
			"task_id": task_id,
			"assigned_at": Utc::now().to_rfc3339(),
		});
		if let Err(e) = self.store.audit(AuditList::Assignments, &entry).await {
			tracing::warn!("Failed to append assignment audit entry: {e}");
		}

		tracing::info!("Assigned task {} to agent {}", task_id, agent_id);
		Ok(assignment)
	}

	async fn record_assignment(&self, agent_id: i64, assignment: &TaskAssignment) -> Result<(), LedgerError> {
		TranscriptionSession::insert_assigned(&self.pool, agent_id, assignment.task_id, assignment.duration).await?;
		AgentStats::touch_last_active(&self.pool, agent_id).await?;
		Ok(())
	}
}
