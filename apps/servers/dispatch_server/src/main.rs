mod auth;
mod error;
mod handlers;
mod routes;
mod state;

pub use crate::state::AppState;

use crate::auth::require_api_key;
use crate::routes::{agents::agent_routes, audio::audio_routes, health::health_routes, tasks::task_routes};
use anyhow::Result;
use axum::middleware::from_fn_with_state;
use axum::Router;
use clap::Parser;
use dispatch::DispatchConfig;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = DispatchConfig::parse();
	let _ = init_tracing(&config);

	let config = Arc::new(config);
	let pool = SqlitePoolOptions::new().max_connections(5).connect(&config.database_url).await?;
	ledger::migrate(&pool).await?;

	let app_state = AppState::build(config.clone(), pool)?;
	let shutdown_token = CancellationToken::new();

	// Populate the queue before taking traffic; the periodic loop retries on
	// failure, so a cold labeling backend is not fatal here.
	if let Err(e) = app_state.reconciler.sync().await {
		tracing::warn!("Initial queue sync failed: {e}");
	}
	tokio::spawn(app_state.reconciler.clone().run(config.reconcile_interval, shutdown_token.clone()));

	let protected_routes = Router::new()
		.merge(task_routes())
		.merge(audio_routes())
		.merge(agent_routes())
		.layer(from_fn_with_state(config.clone(), require_api_key));

	let public_routes = Router::new().merge(health_routes());

	let app = Router::new()
		.merge(protected_routes)
		.merge(public_routes)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(app_state.clone());

	let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
	tracing::info!("listening on {}", listener.local_addr()?);

	// Spawn signal handler task with proper shutdown coordination
	let signal_shutdown_token = shutdown_token.clone();
	tokio::spawn(async move {
		tokio::signal::ctrl_c().await.ok();
		tracing::info!("Received Ctrl+C, initiating shutdown...");
		signal_shutdown_token.cancel();
	});

	let server_token = shutdown_token.clone();
	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(async move {
			server_token.cancelled().await;
		})
		.await?;

	tracing::info!("Server stopped");

	shutdown_token.cancel();
	app_state.pool.close().await;
	tracing::info!("Shutdown complete");
	Ok(())
}

#[must_use]
pub fn init_tracing(config: &DispatchConfig) -> Option<()> {
	use std::str::FromStr;
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::from_str(config.rust_log.as_deref().unwrap_or("info")).ok()?;

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(
				tracing_subscriber::fmt::layer()
					.event_format(tracing_subscriber::fmt::format().pretty())
					.with_filter(filter),
			)
		})
		.init();

	Some(())
}
