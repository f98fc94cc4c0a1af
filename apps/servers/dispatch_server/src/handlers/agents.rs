use crate::error::ServerError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use dispatch::TaskAssignment;
use ledger::{AgentStats, TranscriptionSession};
use serde_json::{json, Value};

pub async fn agent_stats(State(state): State<AppState>, Path(agent_id): Path<i64>) -> Result<Json<Value>, ServerError> {
	let stats = AgentStats::fetch_or_create(&state.pool, agent_id).await?;
	let tasks_completed_today = TranscriptionSession::completed_today(&state.pool, agent_id).await?;

	let current_task_id = state
		.store
		.fetch_active(agent_id)
		.await?
		.and_then(|raw| serde_json::from_str::<TaskAssignment>(&raw).ok())
		.map(|assignment| assignment.task_id);

	Ok(Json(json!({
		"agent_id": agent_id,
		"current_task_id": current_task_id,
		"tasks_completed_today": tasks_completed_today,
		"total_tasks_completed": stats.total_tasks_completed,
		"total_tasks_skipped": stats.total_tasks_skipped,
		"total_duration_seconds": stats.total_duration_seconds,
		"total_earnings": (stats.total_earnings * 100.0).round() / 100.0,
		"last_active": stats.last_active.map(|at| at.to_rfc3339()),
	})))
}
