use anyhow::Result;
use dispatch::{AssignmentEngine, CoordinationStore, DispatchConfig, Reconciler, TaskProcessor};
use labeling::LabelingClient;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
	pub config: Arc<DispatchConfig>,
	pub store: CoordinationStore,
	pub pool: SqlitePool,
	pub labeling: Arc<LabelingClient>,
	pub engine: Arc<AssignmentEngine>,
	pub processor: Arc<TaskProcessor>,
	pub reconciler: Arc<Reconciler>,
}

impl AppState {
	/// Wire up every component around one store, one ledger pool and one
	/// labeling client.
	///
	/// # Errors
	/// Returns an error if the store URL or the labeling client is invalid
	pub fn build(config: Arc<DispatchConfig>, pool: SqlitePool) -> Result<Self> {
		let store = CoordinationStore::new(&config.redis_url)?;
		let labeling = Arc::new(LabelingClient::new(&config.labeling_url, &config.labeling_token, config.project_id)?);
		let reconciler = Arc::new(Reconciler::new(store.clone(), labeling.clone()));
		let engine = Arc::new(AssignmentEngine::new(
			store.clone(),
			labeling.clone(),
			reconciler.clone(),
			pool.clone(),
			config.clone(),
		));
		let processor = Arc::new(TaskProcessor::new(store.clone(), labeling.clone(), pool.clone(), config.clone()));

		Ok(Self {
			config,
			store,
			pool,
			labeling,
			engine,
			processor,
			reconciler,
		})
	}
}
