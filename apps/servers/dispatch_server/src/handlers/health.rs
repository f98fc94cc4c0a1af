use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
	if let Err(e) = state.store.ping().await {
		return Json(json!({ "status": "unhealthy", "error": e.to_string() }));
	}

	let database = match ledger::ping(&state.pool).await {
		Ok(()) => "connected",
		Err(e) => {
			tracing::error!("Ledger health check failed: {e}");
			"error"
		}
	};

	Json(json!({
		"status": "healthy",
		"redis": "connected",
		"database": database,
		"project_id": state.config.project_id
	}))
}
