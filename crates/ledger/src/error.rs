use sqlx::migrate::MigrateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
	#[error("an error occurred with the database")]
	Sqlx(#[from] sqlx::Error),

	#[error("migration error occurred")]
	Migrate(#[from] MigrateError),
}
