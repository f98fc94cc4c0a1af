use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::store::{AuditList, CoordinationStore};
use chrono::Utc;
use labeling::LabelingClient;
use ledger::TranscriptionSession;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Applies completions and skips on behalf of lock-holding agents.
///
/// Submit forwards to the labeling backend before touching anything else, so
/// a dropped lock can never resurrect a duplicate annotation. Skip mutates
/// the coordination store first; the ledger is always last and non-fatal.
pub struct TaskProcessor {
	store: CoordinationStore,
	labeling: Arc<LabelingClient>,
	pool: SqlitePool,
	config: Arc<DispatchConfig>,
}

impl TaskProcessor {
	#[must_use]
	pub fn new(store: CoordinationStore, labeling: Arc<LabelingClient>, pool: SqlitePool, config: Arc<DispatchConfig>) -> Self {
		Self { store, labeling, pool, config }
	}

	/// Accept a finished transcription and retire the task.
	///
	/// # Errors
	/// Returns `NotHolder` when the caller does not hold the lock, a labeling
	/// error when the backend refuses the annotation (the lock survives so the
	/// agent can retry), or a store error
	pub async fn submit(&self, agent_id: i64, task_id: i64, transcription: &str) -> Result<(), DispatchError> {
		self.verify_holder(task_id, agent_id).await?;

		self.labeling.submit_annotation(task_id, transcription).await?;

		let transcription_length = i64::try_from(transcription.chars().count()).unwrap_or(i64::MAX);
		match TranscriptionSession::complete_sessions(&self.pool, agent_id, task_id, transcription_length, self.config.earnings_rate_per_minute).await {
			Ok(outcome) => {
				if outcome.sessions_updated > 1 {
					tracing::warn!("Found {} duplicate sessions for agent {}, task {}", outcome.sessions_updated, agent_id, task_id);
				}
			}
			Err(e) => tracing::error!("Ledger unavailable while completing task {} for agent {}: {}", task_id, agent_id, e),
		}

		self.store.release(task_id, agent_id).await?;
		self.store.remove_from_queue(task_id).await?;
		self.store.mark_completed(task_id).await?;

		let entry = json!({
			"agent_id": agent_id,
			"task_id": task_id,
			"completed_at": Utc::now().to_rfc3339(),
			"transcription_length": transcription_length,
		});
		if let Err(e) = self.store.audit(AuditList::Completions, &entry).await {
			tracing::warn!("Failed to append completion audit entry: {e}");
		}

		tracing::info!("Agent {} completed task {}", agent_id, task_id);
		Ok(())
	}

	/// Release a task the agent does not want, with a cooldown so the same
	/// agent is not offered it again for a while.
	///
	/// # Errors
	/// Returns `NotHolder` when the caller does not hold the lock, or a store
	/// error
	pub async fn skip(&self, agent_id: i64, task_id: i64, reason: Option<&str>) -> Result<(), DispatchError> {
		self.verify_holder(task_id, agent_id).await?;

		let reason = reason.unwrap_or("No reason provided");

		self.store.set_skip_cooldown(task_id, agent_id, self.config.skip_cooldown_secs).await?;

		let skips = self.store.incr_global_skips(task_id, self.config.global_skip_window_secs).await?;
		if skips >= self.config.disable_threshold {
			tracing::warn!("Task {} permanently disabled after {} skips", task_id, skips);
		}

		match TranscriptionSession::skip_sessions(&self.pool, agent_id, task_id, reason).await {
			Ok(updated) if updated > 1 => tracing::warn!("Found {} duplicate sessions for agent {}, task {}", updated, agent_id, task_id),
			Ok(_) => {}
			Err(e) => tracing::error!("Ledger unavailable while skipping task {} for agent {}: {}", task_id, agent_id, e),
		}

		// The task stays in the queue; other agents may still attempt it.
		self.store.release(task_id, agent_id).await?;

		let entry = json!({
			"agent_id": agent_id,
			"task_id": task_id,
			"skipped_at": Utc::now().to_rfc3339(),
			"reason": reason,
		});
		if let Err(e) = self.store.audit(AuditList::Skips, &entry).await {
			tracing::warn!("Failed to append skip audit entry: {e}");
		}

		tracing::info!("Agent {} skipped task {}: {}", agent_id, task_id, reason);
		Ok(())
	}

	async fn verify_holder(&self, task_id: i64, agent_id: i64) -> Result<(), DispatchError> {
		match self.store.lock_holder(task_id).await? {
			Some(holder) if holder == agent_id => Ok(()),
			holder => {
				tracing::warn!("Agent {} attempted to act on task {} locked by {:?}", agent_id, task_id, holder);
				Err(DispatchError::NotHolder { task_id, agent_id })
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::ClaimOutcome;

	async fn live_fixture(labeling_url: &str) -> (TaskProcessor, CoordinationStore, SqlitePool) {
		use sqlx::sqlite::SqlitePoolOptions;

		let store = CoordinationStore::new("redis://127.0.0.1/").unwrap();
		let client = redis::Client::open("redis://127.0.0.1/").unwrap();
		let mut conn = client.get_multiplexed_async_connection().await.unwrap();
		let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

		let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
		ledger::migrate(&pool).await.unwrap();

		let config = Arc::new(DispatchConfig::test());
		let labeling = Arc::new(LabelingClient::new(labeling_url, "token", 1).unwrap());
		let processor = TaskProcessor::new(store.clone(), labeling, pool.clone(), config);

		(processor, store, pool)
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn submit_retires_task_and_updates_ledger() {
		let mut server = mockito::Server::new_async().await;
		let annotation = server.mock("POST", "/api/tasks/101/annotations").with_status(201).create_async().await;

		let (processor, store, pool) = live_fixture(&server.url()).await;

		store.rebuild_queue(&[101, 102]).await.unwrap();
		assert_eq!(store.claim_next(7, 5, 3600).await.unwrap(), ClaimOutcome::Task(101));
		TranscriptionSession::insert_assigned(&pool, 7, 101, Some(60.0)).await.unwrap();

		processor.submit(7, 101, "hello").await.unwrap();
		annotation.assert_async().await;

		assert_eq!(store.lock_holder(101).await.unwrap(), None);
		assert_eq!(store.queue_ids().await.unwrap(), vec![102]);
		assert!(store.completed_tasks().await.unwrap().contains(&101));

		let stats = ledger::AgentStats::fetch_or_create(&pool, 7).await.unwrap();
		assert_eq!(stats.total_tasks_completed, 1);
		assert!(TranscriptionSession::assigned_for(&pool, 7, 101).await.unwrap().is_empty());
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn submit_keeps_lock_when_labeling_backend_refuses() {
		let mut server = mockito::Server::new_async().await;
		let _annotation = server.mock("POST", "/api/tasks/101/annotations").with_status(502).create_async().await;

		let (processor, store, pool) = live_fixture(&server.url()).await;

		store.rebuild_queue(&[101]).await.unwrap();
		assert_eq!(store.claim_next(7, 5, 3600).await.unwrap(), ClaimOutcome::Task(101));
		TranscriptionSession::insert_assigned(&pool, 7, 101, Some(60.0)).await.unwrap();

		let err = processor.submit(7, 101, "hello").await.unwrap_err();
		assert!(matches!(err, DispatchError::Labeling(_)));

		// Lock and session survive so the agent can retry.
		assert_eq!(store.lock_holder(101).await.unwrap(), Some(7));
		assert_eq!(TranscriptionSession::assigned_for(&pool, 7, 101).await.unwrap().len(), 1);
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn skip_by_non_holder_is_rejected_without_side_effects() {
		let (processor, store, _pool) = live_fixture("http://127.0.0.1:1").await;

		store.rebuild_queue(&[300]).await.unwrap();
		assert_eq!(store.claim_next(5, 5, 3600).await.unwrap(), ClaimOutcome::Task(300));

		let err = processor.skip(6, 300, Some("not mine")).await.unwrap_err();
		assert!(matches!(err, DispatchError::NotHolder { task_id: 300, agent_id: 6 }));

		// Lock untouched, no global skip recorded.
		assert_eq!(store.lock_holder(300).await.unwrap(), Some(5));
		assert!(store.global_skip_counts().await.unwrap().is_empty());
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn skip_sets_cooldown_and_keeps_task_in_queue() {
		let (processor, store, pool) = live_fixture("http://127.0.0.1:1").await;

		store.rebuild_queue(&[300]).await.unwrap();
		assert_eq!(store.claim_next(5, 5, 3600).await.unwrap(), ClaimOutcome::Task(300));
		TranscriptionSession::insert_assigned(&pool, 5, 300, Some(30.0)).await.unwrap();

		store.rebuild_queue(&[300]).await.unwrap();
		processor.skip(5, 300, Some("too noisy")).await.unwrap();

		assert_eq!(store.lock_holder(300).await.unwrap(), None);
		assert_eq!(store.queue_ids().await.unwrap(), vec![300]);
		assert_eq!(store.global_skip_counts().await.unwrap(), vec![(300, 1)]);

		// The skipping agent is deferred; a fresh agent still gets the task.
		assert_eq!(store.claim_next(5, 5, 3600).await.unwrap(), ClaimOutcome::Skipped);
		assert_eq!(store.claim_next(6, 5, 3600).await.unwrap(), ClaimOutcome::Task(300));
	}
}
