use crate::error::ServerError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dispatch::DispatchConfig;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared-secret gate in front of every protected route. Rejections carry no
/// side effects.
pub async fn require_api_key(State(config): State<Arc<DispatchConfig>>, request: Request, next: Next) -> Response {
	let provided = request.headers().get(API_KEY_HEADER).and_then(|value| value.to_str().ok());

	match provided {
		Some(key) if key == config.api_secret => next.run(request).await,
		_ => {
			tracing::warn!("Rejected request to {} with missing or invalid API key", request.uri().path());
			ServerError::InvalidApiKey.into_response()
		}
	}
}
