use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a session row: born `assigned`, flipped exactly once to
/// `completed` or `skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
	Assigned,
	Completed,
	Skipped,
}

impl SessionStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Assigned => "assigned",
			Self::Completed => "completed",
			Self::Skipped => "skipped",
		}
	}
}

impl fmt::Display for SessionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One assignment attempt and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranscriptionSession {
	pub id: i64,
	pub agent_id: i64,
	pub task_id: i64,
	pub assigned_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_seconds: Option<f64>,
	pub status: SessionStatus,
	pub transcription_length: Option<i64>,
	pub skip_reason: Option<String>,
}

/// Per-agent rollup. Totals only move forward.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentStats {
	pub agent_id: i64,
	pub total_duration_seconds: f64,
	pub total_tasks_completed: i64,
	pub total_tasks_skipped: i64,
	pub total_earnings: f64,
	pub last_active: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_strings_match_ledger_values() {
		assert_eq!(SessionStatus::Assigned.as_str(), "assigned");
		assert_eq!(SessionStatus::Completed.as_str(), "completed");
		assert_eq!(SessionStatus::Skipped.as_str(), "skipped");
	}

	#[test]
	fn status_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&SessionStatus::Skipped).unwrap(), "\"skipped\"");
	}
}
