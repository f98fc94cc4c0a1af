pub mod agents;
pub mod error;
pub mod models;
pub mod sessions;

pub use error::LedgerError;
pub use models::{AgentStats, SessionStatus, TranscriptionSession};
pub use sessions::{earnings_for, CompletionOutcome};

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Run the embedded migrations against the pool.
///
/// # Errors
/// Returns an error if a migration fails to apply
pub async fn migrate(pool: &SqlitePool) -> Result<(), LedgerError> {
	MIGRATOR.run(pool).await?;
	Ok(())
}

/// Cheap connectivity probe used by the health endpoint.
///
/// # Errors
/// Returns an error if the database is unreachable
pub async fn ping(pool: &SqlitePool) -> Result<(), LedgerError> {
	sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
	Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
	use sqlx::sqlite::SqlitePoolOptions;

	let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
	migrate(&pool).await.unwrap();
	pool
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn migrations_apply_and_ping_succeeds() {
		let pool = test_pool().await;
		ping(&pool).await.unwrap();
	}
}
