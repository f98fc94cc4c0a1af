use crate::handlers::health as routes;
use crate::AppState;
use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

pub fn health_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/api/health", get(routes::health_check))
}
