use crate::error::LedgerError;
use crate::models::AgentStats;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

impl AgentStats {
	/// Fetch the aggregate row for an agent, creating a zeroed one if the
	/// agent has never been seen.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn fetch_or_create(pool: &SqlitePool, agent_id: i64) -> Result<Self, LedgerError> {
		let now = Utc::now();
		sqlx::query("INSERT OR IGNORE INTO agent_stats (agent_id, created_at, updated_at) VALUES (?, ?, ?)")
			.bind(agent_id)
			.bind(now)
			.bind(now)
			.execute(pool)
			.await?;

		let stats = sqlx::query_as::<_, Self>("SELECT * FROM agent_stats WHERE agent_id = ?").bind(agent_id).fetch_one(pool).await?;

		Ok(stats)
	}

	/// Record that the agent was just seen, without touching any totals.
	///
	/// # Errors
	/// Returns an error if the database operation fails
	pub async fn touch_last_active(pool: &SqlitePool, agent_id: i64) -> Result<(), LedgerError> {
		let now = Utc::now();
		sqlx::query(
			"INSERT INTO agent_stats (agent_id, last_active, created_at, updated_at) VALUES (?, ?, ?, ?) \
			 ON CONFLICT(agent_id) DO UPDATE SET last_active = excluded.last_active, updated_at = excluded.updated_at",
		)
		.bind(agent_id)
		.bind(now)
		.bind(now)
		.bind(now)
		.execute(pool)
		.await?;

		Ok(())
	}

	pub(crate) async fn apply_completion(conn: &mut SqliteConnection, agent_id: i64, duration_seconds: f64, earnings: f64, now: DateTime<Utc>) -> Result<(), LedgerError> {
		sqlx::query(
			"INSERT INTO agent_stats (agent_id, total_duration_seconds, total_tasks_completed, total_earnings, last_active, created_at, updated_at) \
			 VALUES (?, ?, 1, ?, ?, ?, ?) \
			 ON CONFLICT(agent_id) DO UPDATE SET \
			 total_duration_seconds = total_duration_seconds + excluded.total_duration_seconds, \
			 total_tasks_completed = total_tasks_completed + 1, \
			 total_earnings = total_earnings + excluded.total_earnings, \
			 last_active = excluded.last_active, \
			 updated_at = excluded.updated_at",
		)
		.bind(agent_id)
		.bind(duration_seconds)
		.bind(earnings)
		.bind(now)
		.bind(now)
		.bind(now)
		.execute(conn)
		.await?;

		Ok(())
	}

	pub(crate) async fn apply_skip(conn: &mut SqliteConnection, agent_id: i64, now: DateTime<Utc>) -> Result<(), LedgerError> {
		sqlx::query(
			"INSERT INTO agent_stats (agent_id, total_tasks_skipped, last_active, created_at, updated_at) \
			 VALUES (?, 1, ?, ?, ?) \
			 ON CONFLICT(agent_id) DO UPDATE SET \
			 total_tasks_skipped = total_tasks_skipped + 1, \
			 last_active = excluded.last_active, \
			 updated_at = excluded.updated_at",
		)
		.bind(agent_id)
		.bind(now)
		.bind(now)
		.bind(now)
		.execute(conn)
		.await?;

		Ok(())
	}
}
