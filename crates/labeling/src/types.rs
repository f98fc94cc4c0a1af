use serde::{Deserialize, Serialize};
use serde_json::Value;

fn empty_object() -> Value {
	Value::Object(serde_json::Map::new())
}

/// The `data` payload attached to a task in the labeling backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
	#[serde(default)]
	pub audio: Option<String>,
	#[serde(default)]
	pub duration: Option<f64>,
	#[serde(default = "empty_object")]
	pub metadata: Value,
}

impl Default for TaskData {
	fn default() -> Self {
		Self {
			audio: None,
			duration: None,
			metadata: empty_object(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
	pub id: i64,
	#[serde(default)]
	pub is_labeled: bool,
	#[serde(default)]
	pub data: TaskData,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn task_record_tolerates_sparse_payloads() {
		let record: TaskRecord = serde_json::from_str(r#"{"id": 42}"#).unwrap();
		assert_eq!(record.id, 42);
		assert!(!record.is_labeled);
		assert!(record.data.audio.is_none());
		assert_eq!(record.data.metadata, serde_json::json!({}));
	}

	#[test]
	fn task_record_reads_audio_fields() {
		let record: TaskRecord = serde_json::from_str(r#"{"id": 7, "is_labeled": true, "data": {"audio": "/data/media/a.wav", "duration": 12.5, "metadata": {"speaker": "b"}}}"#).unwrap();
		assert!(record.is_labeled);
		assert_eq!(record.data.audio.as_deref(), Some("/data/media/a.wav"));
		assert_eq!(record.data.duration, Some(12.5));
		assert_eq!(record.data.metadata["speaker"], "b");
	}
}
