use clap::Parser;
use std::time::Duration;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct DispatchConfig {
	/// Coordination store (Redis) endpoint
	#[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
	pub redis_url: String,

	/// Ledger database endpoint
	#[arg(long, env = "DATABASE_URL", default_value = "sqlite:dispatch.db")]
	pub database_url: String,

	/// Labeling backend endpoint
	#[arg(long, env = "LABELING_URL", default_value = "http://localhost:8080")]
	pub labeling_url: String,

	/// Labeling backend API token
	#[arg(long, env = "LABELING_API_TOKEN", default_value = "")]
	pub labeling_token: String,

	/// Labeling backend project identifier
	#[arg(long, env = "LABELING_PROJECT_ID", default_value = "1")]
	pub project_id: i64,

	/// Shared secret expected in the X-API-Key header
	#[arg(long, env = "SERVICE_API_SECRET")]
	pub api_secret: String,

	/// Root directory where the labeling backend keeps its media files
	#[arg(long, env = "MEDIA_ROOT", default_value = "/opt/label-studio")]
	pub media_root: String,

	/// Earnings rate per minute of completed audio
	#[arg(long, env = "EARNINGS_RATE_PER_MINUTE", default_value = "0.45")]
	pub earnings_rate_per_minute: f64,

	#[arg(
        long,
        env = "RECONCILE_INTERVAL_SECS",
        default_value = "30",
        value_parser = parse_duration,
        help = "Interval between assignment queue reconciliations in seconds"
    )]
	pub reconcile_interval: Duration,

	/// Task lock lifetime in seconds
	#[arg(long, env = "LOCK_TTL_SECS", default_value = "3600")]
	pub lock_ttl_secs: u64,

	/// Per-agent skip cooldown in seconds
	#[arg(long, env = "SKIP_COOLDOWN_SECS", default_value = "1800")]
	pub skip_cooldown_secs: u64,

	/// Global skip counter window in seconds
	#[arg(long, env = "GLOBAL_SKIP_WINDOW_SECS", default_value = "86400")]
	pub global_skip_window_secs: u64,

	/// Skip count at which a task is permanently disabled
	#[arg(long, env = "DISABLE_THRESHOLD", default_value = "5")]
	pub disable_threshold: i64,

	/// Maximum claim attempts per assignment request
	#[arg(long, env = "MAX_ASSIGNMENT_ATTEMPTS", default_value = "50")]
	pub max_assignment_attempts: u32,

	/// Server host
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Server port
	#[arg(long, env = "PORT", default_value = "8010")]
	pub port: u16,

	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log level
	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,
}

impl DispatchConfig {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}

	/// Configuration for tests: local endpoints, short TTLs.
	#[must_use]
	pub fn test() -> Self {
		Self {
			redis_url: "redis://127.0.0.1:6379".to_string(),
			database_url: "sqlite::memory:".to_string(),
			labeling_url: "http://127.0.0.1:1".to_string(),
			labeling_token: "test-token".to_string(),
			project_id: 1,
			api_secret: "test-secret".to_string(),
			media_root: "/tmp/media".to_string(),
			earnings_rate_per_minute: 0.45,
			reconcile_interval: Duration::from_secs(1),
			lock_ttl_secs: 60,
			skip_cooldown_secs: 30,
			global_skip_window_secs: 120,
			disable_threshold: 5,
			max_assignment_attempts: 10,
			host: "127.0.0.1".to_string(),
			port: 0,
			log_json: false,
			rust_log: None,
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = DispatchConfig::try_parse_from(["program", "--api-secret", "s3cret"]).unwrap();

		assert_eq!(config.reconcile_interval, Duration::from_secs(30));
		assert_eq!(config.lock_ttl_secs, 3600);
		assert_eq!(config.skip_cooldown_secs, 1800);
		assert_eq!(config.global_skip_window_secs, 86400);
		assert_eq!(config.disable_threshold, 5);
		assert_eq!(config.max_assignment_attempts, 50);
		assert!((config.earnings_rate_per_minute - 0.45).abs() < f64::EPSILON);
		assert_eq!(config.port, 8010);
	}

	#[test]
	fn test_parse_duration() {
		assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
		assert!(parse_duration("invalid").is_err());
	}

	#[test]
	fn test_config_parser_overrides() {
		let config = DispatchConfig::try_parse_from([
			"program",
			"--api-secret",
			"s3cret",
			"--disable-threshold",
			"3",
			"--max-assignment-attempts",
			"5",
			"--reconcile-interval",
			"10",
		])
		.unwrap();

		assert_eq!(config.disable_threshold, 3);
		assert_eq!(config.max_assignment_attempts, 5);
		assert_eq!(config.reconcile_interval, Duration::from_secs(10));
	}
}
