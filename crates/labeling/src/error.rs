use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelingError {
	#[error("Labeling backend request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("Task {task_id} not found in labeling backend")]
	TaskNotFound { task_id: i64 },
	#[error("Annotation for task {task_id} rejected with status {status}")]
	AnnotationRejected { task_id: i64, status: u16 },
}
