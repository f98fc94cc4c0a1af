use crate::handlers::agents as routes;
use crate::AppState;
use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

pub fn agent_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/api/agents/:agent_id/stats", get(routes::agent_stats))
}
