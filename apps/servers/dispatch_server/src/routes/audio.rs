use crate::handlers::audio as routes;
use crate::AppState;
use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

pub fn audio_routes<S>() -> Router<S>
where
	S: Clone + Send + Sync + 'static,
	AppState: FromRef<S>,
{
	Router::new().route("/api/audio/stream/:task_id/:agent_id", get(routes::stream_audio))
}
