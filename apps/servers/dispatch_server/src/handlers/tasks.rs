use crate::error::ServerError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use dispatch::TaskAssignment;
use serde::Deserialize;
use serde_json::{json, Value};

const fn default_limit() -> u32 {
	1
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
	pub agent_id: i64,
	#[serde(default = "default_limit")]
	pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptionSubmit {
	pub agent_id: i64,
	pub transcription: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskSkip {
	pub agent_id: i64,
	pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
	pub agent_id: Option<i64>,
}

pub async fn request_task(State(state): State<AppState>, Json(request): Json<TaskRequest>) -> Result<Json<TaskAssignment>, ServerError> {
	tracing::debug!("Agent {} requested {} task(s)", request.agent_id, request.limit);
	let assignment = state.engine.request_task(request.agent_id).await?;
	Ok(Json(assignment))
}

pub async fn submit_transcription(State(state): State<AppState>, Path(task_id): Path<i64>, Json(submission): Json<TranscriptionSubmit>) -> Result<Json<Value>, ServerError> {
	state.processor.submit(submission.agent_id, task_id, &submission.transcription).await?;

	Ok(Json(json!({
		"status": "success",
		"message": "Transcription submitted successfully"
	})))
}

pub async fn skip_task(State(state): State<AppState>, Path(task_id): Path<i64>, Json(skip): Json<TaskSkip>) -> Result<Json<Value>, ServerError> {
	state.processor.skip(skip.agent_id, task_id, skip.reason.as_deref()).await?;

	Ok(Json(json!({
		"status": "success",
		"message": "Task skipped successfully"
	})))
}

/// Counts come from the reconciler's cache and may lag one cycle. The first
/// call after a cold start kicks a sync off in the background instead of
/// blocking the caller on the labeling backend.
pub async fn available_count(State(state): State<AppState>, Query(query): Query<CountQuery>) -> Result<Json<Value>, ServerError> {
	let stats = state.reconciler.stats().await;

	if stats.last_synced_at.is_none() {
		let reconciler = state.reconciler.clone();
		tokio::spawn(async move {
			if let Err(e) = reconciler.sync().await {
				tracing::error!("Background queue sync failed: {e}");
			}
		});

		return Ok(Json(json!({
			"available_tasks": 0,
			"total_unlabeled": 0,
			"note": "Stats syncing"
		})));
	}

	let mut body = json!({
		"available_tasks": stats.available,
		"total_unlabeled": stats.total_unlabeled
	});

	if let Some(agent_id) = query.agent_id {
		let queue = state.store.queue_ids().await?;
		let available_for_agent = state.store.count_available_for(agent_id, &queue).await?;
		body["available_for_agent"] = json!(available_for_agent);
	}

	Ok(Json(body))
}

pub async fn disabled_tasks(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
	let mut counters: Vec<(i64, i64)> = state
		.store
		.global_skip_counts()
		.await?
		.into_iter()
		.filter(|(_, count)| *count >= state.config.disable_threshold)
		.collect();
	counters.sort_unstable_by_key(|(task_id, _)| *task_id);

	let disabled: Vec<Value> = counters
		.into_iter()
		.map(|(task_id, skip_count)| json!({ "task_id": task_id, "skip_count": skip_count }))
		.collect();

	Ok(Json(json!({
		"total_disabled": disabled.len(),
		"disabled_tasks": disabled
	})))
}

/// Clears every global skip counter, not just saturated ones, then rebuilds
/// the queue so restored tasks become claimable again.
pub async fn reset_disabled(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
	let mut restored = state.store.clear_global_skips().await?;
	restored.sort_unstable();

	if !restored.is_empty() {
		let reconciler = state.reconciler.clone();
		tokio::spawn(async move {
			if let Err(e) = reconciler.sync().await {
				tracing::error!("Queue sync after counter reset failed: {e}");
			}
		});
	}

	tracing::info!("Reset {} disabled tasks", restored.len());

	Ok(Json(json!({
		"status": "success",
		"reset_count": restored.len(),
		"restored_tasks": restored,
		"message": format!("Reset {} disabled tasks", restored.len())
	})))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn task_request_defaults_limit_to_one() {
		let request: TaskRequest = serde_json::from_str(r#"{"agent_id": 7}"#).unwrap();
		assert_eq!(request.agent_id, 7);
		assert_eq!(request.limit, 1);
	}

	#[test]
	fn skip_reason_is_optional() {
		let skip: TaskSkip = serde_json::from_str(r#"{"agent_id": 5}"#).unwrap();
		assert!(skip.reason.is_none());

		let skip: TaskSkip = serde_json::from_str(r#"{"agent_id": 5, "reason": "too noisy"}"#).unwrap();
		assert_eq!(skip.reason.as_deref(), Some("too noisy"));
	}
}
