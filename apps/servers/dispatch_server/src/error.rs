use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use dispatch::DispatchError;
use ledger::LedgerError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
	#[error("Invalid API key")]
	InvalidApiKey,

	#[error("Access denied")]
	Forbidden,

	#[error("Not found")]
	NotFound,

	#[error("{0}")]
	Dispatch(#[from] DispatchError),

	#[error("an error occurred with the ledger database")]
	Ledger(#[from] LedgerError),

	#[error("an internal server error occurred")]
	Anyhow(#[from] anyhow::Error),
}

impl ServerError {
	fn status_code(&self) -> StatusCode {
		match self {
			Self::InvalidApiKey | Self::Forbidden => StatusCode::FORBIDDEN,
			Self::NotFound => StatusCode::NOT_FOUND,
			Self::Dispatch(e) => match e {
				DispatchError::QueueEmpty | DispatchError::AttemptsExhausted { .. } => StatusCode::NOT_FOUND,
				DispatchError::NotHolder { .. } => StatusCode::FORBIDDEN,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
			Self::Ledger(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response<Body> {
		match &self {
			Self::Dispatch(e) if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR => {
				tracing::error!("Dispatch error: {:?}", e);
			}
			Self::Ledger(e) => {
				tracing::error!("Ledger error: {:?}", e);
			}
			Self::Anyhow(e) => {
				tracing::error!("Generic error: {:?}", e);
			}
			_ => (),
		}

		(self.status_code(), Json(json!({ "detail": self.to_string() }))).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_task_outcomes_map_to_distinguished_404s() {
		let empty = ServerError::Dispatch(DispatchError::QueueEmpty);
		assert_eq!(empty.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(empty.to_string(), "No tasks available in assignment queue");

		let exhausted = ServerError::Dispatch(DispatchError::AttemptsExhausted { agent_id: 7 });
		assert_eq!(exhausted.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(exhausted.to_string(), "No available tasks for agent 7 - all tasks are locked or recently skipped");
	}

	#[test]
	fn non_holder_maps_to_403() {
		let err = ServerError::Dispatch(DispatchError::NotHolder { task_id: 300, agent_id: 6 });
		assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
	}

	#[test]
	fn upstream_rejection_maps_to_500() {
		let err = ServerError::Dispatch(DispatchError::Labeling(labeling::LabelingError::AnnotationRejected { task_id: 1, status: 502 }));
		assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
	}
}
