use crate::error::LedgerError;
use crate::models::{AgentStats, TranscriptionSession};
use chrono::Utc;
use sqlx::SqlitePool;

/// What a completion did to the ledger. `sessions_updated` can exceed one when
/// earlier retries left duplicate `assigned` rows behind; callers log that.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOutcome {
	pub sessions_updated: u64,
	pub duration_seconds: Option<f64>,
}

impl TranscriptionSession {
	/// Insert a fresh `assigned` row for the (agent, task) pair.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn insert_assigned(pool: &SqlitePool, agent_id: i64, task_id: i64, duration_seconds: Option<f64>) -> Result<i64, LedgerError> {
		let result = sqlx::query("INSERT INTO transcription_sessions (agent_id, task_id, assigned_at, duration_seconds, status) VALUES (?, ?, ?, ?, 'assigned')")
			.bind(agent_id)
			.bind(task_id)
			.bind(Utc::now())
			.bind(duration_seconds)
			.execute(pool)
			.await?;

		Ok(result.last_insert_rowid())
	}

	/// All `assigned` rows for the pair, oldest first.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn assigned_for(pool: &SqlitePool, agent_id: i64, task_id: i64) -> Result<Vec<Self>, LedgerError> {
		let sessions = sqlx::query_as::<_, Self>("SELECT * FROM transcription_sessions WHERE agent_id = ? AND task_id = ? AND status = 'assigned' ORDER BY id")
			.bind(agent_id)
			.bind(task_id)
			.fetch_all(pool)
			.await?;

		Ok(sessions)
	}

	/// Flip every `assigned` row for the pair to `completed` and bump the
	/// agent's aggregates, all inside one transaction.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn complete_sessions(pool: &SqlitePool, agent_id: i64, task_id: i64, transcription_length: i64, rate_per_minute: f64) -> Result<CompletionOutcome, LedgerError> {
		let now = Utc::now();
		let mut tx = pool.begin().await?;

		let sessions = sqlx::query_as::<_, Self>("SELECT * FROM transcription_sessions WHERE agent_id = ? AND task_id = ? AND status = 'assigned' ORDER BY id")
			.bind(agent_id)
			.bind(task_id)
			.fetch_all(&mut *tx)
			.await?;

		if sessions.is_empty() {
			tx.commit().await?;
			return Ok(CompletionOutcome {
				sessions_updated: 0,
				duration_seconds: None,
			});
		}

		let updated = sqlx::query("UPDATE transcription_sessions SET status = 'completed', completed_at = ?, transcription_length = ? WHERE agent_id = ? AND task_id = ? AND status = 'assigned'")
			.bind(now)
			.bind(transcription_length)
			.bind(agent_id)
			.bind(task_id)
			.execute(&mut *tx)
			.await?
			.rows_affected();

		let duration_seconds = sessions.iter().find_map(|session| session.duration_seconds);
		let earnings = earnings_for(duration_seconds.unwrap_or(0.0), rate_per_minute);
		AgentStats::apply_completion(&mut *tx, agent_id, duration_seconds.unwrap_or_default(), earnings, now).await?;

		tx.commit().await?;

		Ok(CompletionOutcome {
			sessions_updated: updated,
			duration_seconds,
		})
	}

	/// Flip every `assigned` row for the pair to `skipped` and bump the skip
	/// counter on the agent's aggregates.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn skip_sessions(pool: &SqlitePool, agent_id: i64, task_id: i64, reason: &str) -> Result<u64, LedgerError> {
		let now = Utc::now();
		let mut tx = pool.begin().await?;

		let updated = sqlx::query("UPDATE transcription_sessions SET status = 'skipped', skip_reason = ? WHERE agent_id = ? AND task_id = ? AND status = 'assigned'")
			.bind(reason)
			.bind(agent_id)
			.bind(task_id)
			.execute(&mut *tx)
			.await?
			.rows_affected();

		if updated > 0 {
			AgentStats::apply_skip(&mut *tx, agent_id, now).await?;
		}

		tx.commit().await?;

		Ok(updated)
	}

	/// Number of sessions the agent completed since UTC midnight.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn completed_today(pool: &SqlitePool, agent_id: i64) -> Result<i64, LedgerError> {
		let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
		let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transcription_sessions WHERE agent_id = ? AND status = 'completed' AND completed_at >= ?")
			.bind(agent_id)
			.bind(midnight)
			.fetch_one(pool)
			.await?;

		Ok(count)
	}
}

/// Earnings are always derived: minutes of audio times the configured rate.
#[must_use]
pub fn earnings_for(duration_seconds: f64, rate_per_minute: f64) -> f64 {
	duration_seconds / 60.0 * rate_per_minute
}
