use crate::handlers::tasks as routes;
use crate::AppState;
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;

pub fn task_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new()
		.route("/api/tasks/request", post(routes::request_task))
		.route("/api/tasks/:task_id/submit", post(routes::submit_transcription))
		.route("/api/tasks/:task_id/skip", post(routes::skip_task))
		.route("/api/tasks/available/count", get(routes::available_count))
		.route("/api/tasks/disabled", get(routes::disabled_tasks))
		.route("/api/tasks/reset-disabled", post(routes::reset_disabled))
}
