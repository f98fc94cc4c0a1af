use crate::error::ServerError;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path as AxumPath, Request, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::response::Response;
use chrono::Utc;
use dispatch::AuditList;
use labeling::LabelingError;
use mime::Mime;
use serde_json::json;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tower_http::services::ServeFile;

/// Stream a task's audio to its lock holder. Range requests and the final
/// content type are delegated to `ServeFile`.
pub async fn stream_audio(State(state): State<AppState>, AxumPath((task_id, agent_id)): AxumPath<(i64, i64)>, request: Request) -> Result<Response, ServerError> {
	match state.store.lock_holder(task_id).await? {
		Some(holder) if holder == agent_id => {}
		holder => {
			tracing::warn!("Agent {} tried to access task {} locked by {:?}", agent_id, task_id, holder);
			return Err(ServerError::Forbidden);
		}
	}

	let record = state.labeling.task(task_id).await.map_err(|e| match e {
		LabelingError::TaskNotFound { .. } => ServerError::NotFound,
		other => ServerError::Dispatch(other.into()),
	})?;

	let Some(audio_path) = record.data.audio else {
		return Err(ServerError::NotFound);
	};

	let file_path = resolve_media_path(&state.config.media_root, &audio_path);
	if !file_path.exists() {
		tracing::error!("Audio file not found: {}", file_path.display());
		return Err(ServerError::NotFound);
	}

	let entry = json!({
		"agent_id": agent_id,
		"task_id": task_id,
		"accessed_at": Utc::now().to_rfc3339(),
		"file_path": file_path.display().to_string(),
	});
	if let Err(e) = state.store.audit(AuditList::AudioAccess, &entry).await {
		tracing::warn!("Failed to append audio access audit entry: {e}");
	}

	tracing::info!("Serving audio file {} to agent {}", file_path.display(), agent_id);

	let mime = audio_mime(&file_path);
	let served = ServeFile::new_with_mime(&file_path, &mime)
		.try_call(request)
		.await
		.map_err(|e| ServerError::Anyhow(e.into()))?;

	let mut response = served.map(Body::new);
	response.headers_mut().insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));

	Ok(response)
}

/// Translate the labeling backend's `/data/...` paths into paths under the
/// local media root.
fn resolve_media_path(media_root: &str, audio_path: &str) -> PathBuf {
	if let Some(rest) = audio_path.strip_prefix("/data/media/") {
		Path::new(media_root).join("media").join(rest)
	} else if let Some(rest) = audio_path.strip_prefix("/data/") {
		Path::new(media_root).join(rest)
	} else {
		Path::new(media_root).join("media").join(audio_path.trim_start_matches('/'))
	}
}

fn audio_mime(path: &Path) -> Mime {
	let extension = path.extension().and_then(OsStr::to_str).unwrap_or_default().to_ascii_lowercase();
	let essence = match extension.as_str() {
		"wav" => "audio/wav",
		"m4a" => "audio/mp4",
		"ogg" => "audio/ogg",
		"flac" => "audio/flac",
		"webm" => "audio/webm",
		"opus" => "audio/opus",
		_ => "audio/mpeg",
	};

	essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}
