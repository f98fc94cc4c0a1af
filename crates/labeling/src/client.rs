use crate::error::LabelingError;
use crate::types::TaskRecord;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the labeling backend that owns the task pool.
///
/// All calls carry the backend token and share one pooled HTTP client with a
/// 30 second timeout.
#[derive(Clone)]
pub struct LabelingClient {
	http: reqwest::Client,
	base_url: String,
	token: String,
	project_id: i64,
}

impl LabelingClient {
	///
	/// # Errors
	/// Returns an error if the underlying HTTP client cannot be constructed
	pub fn new(base_url: &str, token: &str, project_id: i64) -> Result<Self, LabelingError> {
		let http = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;

		Ok(Self {
			http,
			base_url: base_url.trim_end_matches('/').to_string(),
			token: token.to_string(),
			project_id,
		})
	}

	fn auth_header(&self) -> String {
		format!("Token {}", self.token)
	}

	/// Fetch the ids of every task in the project that has no annotation yet.
	///
	/// # Errors
	/// Returns an error if the backend is unreachable or replies with a non-2xx status
	pub async fn unlabeled_task_ids(&self) -> Result<Vec<i64>, LabelingError> {
		let url = format!("{}/api/projects/{}/tasks", self.base_url, self.project_id);
		let tasks: Vec<TaskRecord> = self
			.http
			.get(&url)
			.query(&[("page_size", "-1")])
			.header(AUTHORIZATION, self.auth_header())
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		Ok(tasks.into_iter().filter(|task| !task.is_labeled).map(|task| task.id).collect())
	}

	/// Fetch one task with its audio path, duration and metadata.
	///
	/// # Errors
	/// Returns `TaskNotFound` for a 404, otherwise any transport or status error
	pub async fn task(&self, task_id: i64) -> Result<TaskRecord, LabelingError> {
		let url = format!("{}/api/tasks/{task_id}", self.base_url);
		let response = self.http.get(&url).header(AUTHORIZATION, self.auth_header()).send().await?;

		if response.status() == StatusCode::NOT_FOUND {
			return Err(LabelingError::TaskNotFound { task_id });
		}

		Ok(response.error_for_status()?.json().await?)
	}

	/// Submit a transcription as a new annotation on the task.
	///
	/// # Errors
	/// Returns `AnnotationRejected` carrying the status code on any non-2xx
	/// reply so the caller can keep its lock and retry
	pub async fn submit_annotation(&self, task_id: i64, transcription: &str) -> Result<(), LabelingError> {
		let url = format!("{}/api/tasks/{task_id}/annotations", self.base_url);
		let response = self
			.http
			.post(&url)
			.header(AUTHORIZATION, self.auth_header())
			.json(&annotation_payload(transcription))
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			tracing::error!("Labeling backend rejected annotation for task {}: {}", task_id, status);
			return Err(LabelingError::AnnotationRejected { task_id, status: status.as_u16() });
		}

		Ok(())
	}
}

fn annotation_payload(transcription: &str) -> Value {
	json!({
		"result": [{
			"value": { "text": [transcription] },
			"from_name": "transcription",
			"to_name": "audio",
			"type": "textarea"
		}]
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn annotation_payload_shape() {
		let payload = annotation_payload("hello world");
		let result = &payload["result"][0];

		assert_eq!(result["value"]["text"][0], "hello world");
		assert_eq!(result["from_name"], "transcription");
		assert_eq!(result["to_name"], "audio");
		assert_eq!(result["type"], "textarea");
	}

	#[tokio::test]
	async fn unlabeled_task_ids_filters_labeled_tasks() {
		let mut server = mockito::Server::new_async().await;
		let body = serde_json::json!([
			{"id": 1, "is_labeled": false},
			{"id": 2, "is_labeled": true},
			{"id": 3, "is_labeled": false}
		]);
		let mock = server
			.mock("GET", "/api/projects/9/tasks")
			.match_query(mockito::Matcher::UrlEncoded("page_size".into(), "-1".into()))
			.with_status(200)
			.with_header("content-type", "application/json")
			.with_body(body.to_string())
			.create_async()
			.await;

		let client = LabelingClient::new(&server.url(), "secret", 9).unwrap();
		let ids = client.unlabeled_task_ids().await.unwrap();

		assert_eq!(ids, vec![1, 3]);
		mock.assert_async().await;
	}

	#[tokio::test]
	async fn task_maps_404_to_task_not_found() {
		let mut server = mockito::Server::new_async().await;
		let _mock = server.mock("GET", "/api/tasks/55").with_status(404).create_async().await;

		let client = LabelingClient::new(&server.url(), "secret", 1).unwrap();
		let err = client.task(55).await.unwrap_err();

		assert!(matches!(err, LabelingError::TaskNotFound { task_id: 55 }));
	}

	#[tokio::test]
	async fn submit_annotation_surfaces_rejection_status() {
		let mut server = mockito::Server::new_async().await;
		let _mock = server.mock("POST", "/api/tasks/12/annotations").with_status(502).create_async().await;

		let client = LabelingClient::new(&server.url(), "secret", 1).unwrap();
		let err = client.submit_annotation(12, "text").await.unwrap_err();

		assert!(matches!(err, LabelingError::AnnotationRejected { task_id: 12, status: 502 }));
	}

	#[tokio::test]
	async fn submit_annotation_accepts_201() {
		let mut server = mockito::Server::new_async().await;
		let mock = server.mock("POST", "/api/tasks/12/annotations").with_status(201).create_async().await;

		let client = LabelingClient::new(&server.url(), "secret", 1).unwrap();
		client.submit_annotation(12, "text").await.unwrap();
		mock.assert_async().await;
	}
}
