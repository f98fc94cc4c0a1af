use crate::error::DispatchError;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub const QUEUE_KEY: &str = "assignment_queue";
pub const COMPLETED_KEY: &str = "tasks:completed";

const COMPLETED_TTL_SECS: i64 = 86_400;
const GLOBAL_SKIPS_PATTERN: &str = "task:global_skips:*";

/// Key builders for the coordination store schema. The formats are a wire
/// contract shared with the claim script below; change both together.
pub mod keys {
	#[must_use]
	pub fn lock(task_id: i64) -> String {
		format!("task:locked:{task_id}")
	}

	#[must_use]
	pub fn active(agent_id: i64) -> String {
		format!("agent:active:{agent_id}")
	}

	#[must_use]
	pub fn skip(task_id: i64, agent_id: i64) -> String {
		format!("task:skipped:{task_id}:{agent_id}")
	}

	#[must_use]
	pub fn global_skips(task_id: i64) -> String {
		format!("task:global_skips:{task_id}")
	}
}

/// Pop-and-lock, executed as one indivisible script so two agents can never
/// hold the same task. Conflicting tasks go back to the tail of the queue;
/// disabled tasks are dropped on the floor.
const CLAIM_SCRIPT: &str = r"
local task_id = redis.call('LPOP', KEYS[1])
if not task_id then
	return nil
end

local agent_id = ARGV[1]
local disable_threshold = tonumber(ARGV[2])
local lock_ttl = tonumber(ARGV[3])
local skip_key = 'task:skipped:' .. task_id .. ':' .. agent_id
local lock_key = 'task:locked:' .. task_id
local global_skip_key = 'task:global_skips:' .. task_id

local global_skips = tonumber(redis.call('GET', global_skip_key) or 0)
if global_skips >= disable_threshold then
	return 'DISABLED'
end

if redis.call('EXISTS', skip_key) == 1 then
	redis.call('RPUSH', KEYS[1], task_id)
	return 'SKIPPED'
end

if redis.call('SET', lock_key, agent_id, 'NX', 'EX', lock_ttl) then
	return task_id
end

redis.call('RPUSH', KEYS[1], task_id)
return 'LOCKED'
";

/// Result of one claim attempt against the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
	/// Queue was empty.
	Empty,
	/// Task popped and locked for the caller.
	Task(i64),
	/// Head task is under the caller's skip cooldown; pushed to the tail.
	Skipped,
	/// Head task is locked by another agent; pushed to the tail.
	Locked,
	/// Head task crossed the disable threshold; dropped.
	Disabled,
}

impl ClaimOutcome {
	fn parse(reply: Option<String>) -> Result<Self, DispatchError> {
		match reply {
			None => Ok(Self::Empty),
			Some(text) => match text.as_str() {
				"SKIPPED" => Ok(Self::Skipped),
				"LOCKED" => Ok(Self::Locked),
				"DISABLED" => Ok(Self::Disabled),
				other => other.parse::<i64>().map(Self::Task).map_err(|_| DispatchError::Protocol(text.clone())),
			},
		}
	}
}

/// Audit trails kept as append-only JSON lists in the store.
#[derive(Debug, Clone, Copy)]
pub enum AuditList {
	Assignments,
	Completions,
	Skips,
	AudioAccess,
}

impl AuditList {
	#[must_use]
	pub const fn key(self) -> &'static str {
		match self {
			Self::Assignments => "audit:assignments",
			Self::Completions => "audit:completions",
			Self::Skips => "audit:skips",
			Self::AudioAccess => "audit:audio_access",
		}
	}
}

/// Thin async wrapper over the Redis keys that hold the assignment queue,
/// locks, cooldowns, counters and audit lists.
#[derive(Clone)]
pub struct CoordinationStore {
	client: Client,
	claim: Arc<Script>,
}

impl CoordinationStore {
	///
	/// # Errors
	/// Returns an error if the Redis URL cannot be parsed
	pub fn new(redis_url: &str) -> Result<Self, DispatchError> {
		let client = Client::open(redis_url)?;

		Ok(Self {
			client,
			claim: Arc::new(Script::new(CLAIM_SCRIPT)),
		})
	}

	async fn conn(&self) -> Result<MultiplexedConnection, DispatchError> {
		Ok(self.client.get_multiplexed_async_connection().await?)
	}

	///
	/// # Errors
	/// Returns an error if the store is unreachable
	pub async fn ping(&self) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let _: String = redis::cmd("PING").query_async(&mut conn).await?;
		Ok(())
	}

	/// Run one atomic pop-and-lock attempt on behalf of the agent.
	///
	/// # Errors
	/// Returns an error if the store fails or replies with something outside
	/// the claim protocol
	pub async fn claim_next(&self, agent_id: i64, disable_threshold: i64, lock_ttl_secs: u64) -> Result<ClaimOutcome, DispatchError> {
		let mut conn = self.conn().await?;
		let reply: Option<String> = self
			.claim
			.key(QUEUE_KEY)
			.arg(agent_id)
			.arg(disable_threshold)
			.arg(lock_ttl_secs)
			.invoke_async(&mut conn)
			.await?;

		ClaimOutcome::parse(reply)
	}

	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn queue_len(&self) -> Result<usize, DispatchError> {
		let mut conn = self.conn().await?;
		let len: usize = conn.llen(QUEUE_KEY).await?;
		Ok(len)
	}

	/// Full queue contents, head first.
	///
	/// # Errors
	/// Returns an error if the store fails or a queue entry is not an integer
	pub async fn queue_ids(&self) -> Result<Vec<i64>, DispatchError> {
		let mut conn = self.conn().await?;
		let raw: Vec<String> = conn.lrange(QUEUE_KEY, 0, -1).await?;

		raw.into_iter().map(|entry| entry.parse::<i64>().map_err(|_| DispatchError::Protocol(entry.clone()))).collect()
	}

	/// Replace the queue with the given ids in order. DEL and RPUSH run in one
	/// MULTI/EXEC so concurrent claimers never observe a half-built queue.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn rebuild_queue(&self, task_ids: &[i64]) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();
		pipe.atomic().del(QUEUE_KEY).ignore();
		if !task_ids.is_empty() {
			let entries: Vec<String> = task_ids.iter().map(ToString::to_string).collect();
			pipe.rpush(QUEUE_KEY, entries).ignore();
		}
		let _: () = pipe.query_async(&mut conn).await?;

		Ok(())
	}

	/// Purge every queue occurrence of a completed task.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn remove_from_queue(&self, task_id: i64) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let _: i64 = conn.lrem(QUEUE_KEY, 0, task_id.to_string()).await?;
		Ok(())
	}

	/// Remember a completed task so reconciliation cannot re-add it before the
	/// labeling backend has durably absorbed the annotation.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn mark_completed(&self, task_id: i64) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();
		pipe.sadd(COMPLETED_KEY, task_id.to_string()).ignore().expire(COMPLETED_KEY, COMPLETED_TTL_SECS).ignore();
		let _: () = pipe.query_async(&mut conn).await?;

		Ok(())
	}

	///
	/// # Errors
	/// Returns an error if the store fails or a set member is not an integer
	pub async fn completed_tasks(&self) -> Result<HashSet<i64>, DispatchError> {
		let mut conn = self.conn().await?;
		let raw: Vec<String> = conn.smembers(COMPLETED_KEY).await?;

		raw.into_iter().map(|entry| entry.parse::<i64>().map_err(|_| DispatchError::Protocol(entry.clone()))).collect()
	}

	/// Which agent currently holds the lock on a task, if anyone.
	///
	/// # Errors
	/// Returns an error if the store fails or the lock value is not an integer
	pub async fn lock_holder(&self, task_id: i64) -> Result<Option<i64>, DispatchError> {
		let mut conn = self.conn().await?;
		let raw: Option<String> = conn.get(keys::lock(task_id)).await?;

		raw.map(|value| value.parse::<i64>().map_err(|_| DispatchError::Protocol(value.clone()))).transpose()
	}

	/// Count how many of the given tasks are currently locked.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn count_locked(&self, task_ids: &[i64]) -> Result<usize, DispatchError> {
		if task_ids.is_empty() {
			return Ok(0);
		}

		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();
		for task_id in task_ids {
			pipe.exists(keys::lock(*task_id));
		}
		let flags: Vec<bool> = pipe.query_async(&mut conn).await?;

		Ok(flags.into_iter().filter(|locked| *locked).count())
	}

	/// Count tasks in `task_ids` that are neither locked nor under the agent's
	/// skip cooldown.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn count_available_for(&self, agent_id: i64, task_ids: &[i64]) -> Result<usize, DispatchError> {
		if task_ids.is_empty() {
			return Ok(0);
		}

		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();
		for task_id in task_ids {
			pipe.exists(keys::lock(*task_id));
			pipe.exists(keys::skip(*task_id, agent_id));
		}
		let flags: Vec<bool> = pipe.query_async(&mut conn).await?;

		Ok(flags.chunks(2).filter(|pair| !pair.iter().any(|flag| *flag)).count())
	}

	/// The agent's active assignment as raw JSON, if one is live.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn fetch_active(&self, agent_id: i64) -> Result<Option<String>, DispatchError> {
		let mut conn = self.conn().await?;
		let raw: Option<String> = conn.get(keys::active(agent_id)).await?;
		Ok(raw)
	}

	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn store_active(&self, agent_id: i64, assignment_json: &str, ttl_secs: u64) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let _: () = conn.set_ex(keys::active(agent_id), assignment_json, ttl_secs).await?;
		Ok(())
	}

	/// Drop both the task lock and the agent's active-assignment pointer.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn release(&self, task_id: i64, agent_id: i64) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();
		pipe.del(keys::lock(task_id)).ignore().del(keys::active(agent_id)).ignore();
		let _: () = pipe.query_async(&mut conn).await?;

		Ok(())
	}

	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn set_skip_cooldown(&self, task_id: i64, agent_id: i64, ttl_secs: u64) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let _: () = conn.set_ex(keys::skip(task_id, agent_id), "skipped", ttl_secs).await?;
		Ok(())
	}

	/// Bump the global skip counter, arming its expiry window on the first
	/// increment. Returns the new count.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn incr_global_skips(&self, task_id: i64, window_secs: u64) -> Result<i64, DispatchError> {
		let mut conn = self.conn().await?;
		let key = keys::global_skips(task_id);
		let count: i64 = conn.incr(&key, 1).await?;

		if count == 1 {
			let _: bool = conn.expire(&key, i64::try_from(window_secs).unwrap_or(i64::MAX)).await?;
		}

		Ok(count)
	}

	/// Every live global skip counter as (task id, count) pairs.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn global_skip_counts(&self) -> Result<Vec<(i64, i64)>, DispatchError> {
		let mut conn = self.conn().await?;
		let counter_keys: Vec<String> = conn.keys(GLOBAL_SKIPS_PATTERN).await?;

		if counter_keys.is_empty() {
			return Ok(Vec::new());
		}

		let mut pipe = redis::pipe();
		for key in &counter_keys {
			pipe.get(key);
		}
		let counts: Vec<Option<i64>> = pipe.query_async(&mut conn).await?;

		let mut entries = Vec::with_capacity(counter_keys.len());
		for (key, count) in counter_keys.iter().zip(counts) {
			let Some(count) = count else { continue };
			let task_id = key
				.rsplit(':')
				.next()
				.and_then(|suffix| suffix.parse::<i64>().ok())
				.ok_or_else(|| DispatchError::Protocol(key.clone()))?;
			entries.push((task_id, count));
		}

		Ok(entries)
	}

	/// Delete every global skip counter, returning the affected task ids.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn clear_global_skips(&self) -> Result<Vec<i64>, DispatchError> {
		let mut conn = self.conn().await?;
		let counter_keys: Vec<String> = conn.keys(GLOBAL_SKIPS_PATTERN).await?;

		if counter_keys.is_empty() {
			return Ok(Vec::new());
		}

		let _: i64 = conn.del(&counter_keys).await?;

		counter_keys
			.into_iter()
			.map(|key| {
				key.rsplit(':')
					.next()
					.and_then(|suffix| suffix.parse::<i64>().ok())
					.ok_or_else(|| DispatchError::Protocol(key.clone()))
			})
			.collect()
	}

	/// Left-push a JSON entry onto one of the audit trails.
	///
	/// # Errors
	/// Returns an error if the store fails
	pub async fn audit(&self, list: AuditList, entry: &Value) -> Result<(), DispatchError> {
		let mut conn = self.conn().await?;
		let _: i64 = conn.lpush(list.key(), entry.to_string()).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_schema_is_bit_exact() {
		assert_eq!(keys::lock(101), "task:locked:101");
		assert_eq!(keys::active(7), "agent:active:7");
		assert_eq!(keys::skip(300, 5), "task:skipped:300:5");
		assert_eq!(keys::global_skips(400), "task:global_skips:400");
		assert_eq!(QUEUE_KEY, "assignment_queue");
		assert_eq!(AuditList::Assignments.key(), "audit:assignments");
		assert_eq!(AuditList::Completions.key(), "audit:completions");
		assert_eq!(AuditList::Skips.key(), "audit:skips");
		assert_eq!(AuditList::AudioAccess.key(), "audit:audio_access");
	}

	#[test]
	fn claim_outcome_parses_protocol_replies() {
		assert_eq!(ClaimOutcome::parse(None).unwrap(), ClaimOutcome::Empty);
		assert_eq!(ClaimOutcome::parse(Some("SKIPPED".to_string())).unwrap(), ClaimOutcome::Skipped);
		assert_eq!(ClaimOutcome::parse(Some("LOCKED".to_string())).unwrap(), ClaimOutcome::Locked);
		assert_eq!(ClaimOutcome::parse(Some("DISABLED".to_string())).unwrap(), ClaimOutcome::Disabled);
		assert_eq!(ClaimOutcome::parse(Some("1234".to_string())).unwrap(), ClaimOutcome::Task(1234));
		assert!(matches!(ClaimOutcome::parse(Some("bogus".to_string())), Err(DispatchError::Protocol(_))));
	}

	// Helper function to clear Redis state between live tests
	async fn clear_redis(store: &CoordinationStore) {
		let mut conn = store.conn().await.unwrap();
		let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn claim_locks_head_and_preserves_fifo() {
		let store = CoordinationStore::new("redis://127.0.0.1/").unwrap();
		clear_redis(&store).await;

		store.rebuild_queue(&[101, 102]).await.unwrap();

		let first = store.claim_next(7, 5, 3600).await.unwrap();
		assert_eq!(first, ClaimOutcome::Task(101));
		assert_eq!(store.lock_holder(101).await.unwrap(), Some(7));
		assert_eq!(store.queue_ids().await.unwrap(), vec![102]);

		let second = store.claim_next(8, 5, 3600).await.unwrap();
		assert_eq!(second, ClaimOutcome::Task(102));
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn claim_defers_cooled_down_task_to_tail() {
		let store = CoordinationStore::new("redis://127.0.0.1/").unwrap();
		clear_redis(&store).await;

		store.rebuild_queue(&[300, 301]).await.unwrap();
		store.set_skip_cooldown(300, 5, 1800).await.unwrap();

		let outcome = store.claim_next(5, 5, 3600).await.unwrap();
		assert_eq!(outcome, ClaimOutcome::Skipped);
		assert_eq!(store.queue_ids().await.unwrap(), vec![301, 300]);

		// A different agent without the cooldown can still take it.
		assert_eq!(store.claim_next(6, 5, 3600).await.unwrap(), ClaimOutcome::Task(301));
		assert_eq!(store.claim_next(6, 5, 3600).await.unwrap(), ClaimOutcome::Locked);
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn claim_drops_disabled_task() {
		let store = CoordinationStore::new("redis://127.0.0.1/").unwrap();
		clear_redis(&store).await;

		store.rebuild_queue(&[400]).await.unwrap();
		for _ in 0..5 {
			store.incr_global_skips(400, 86400).await.unwrap();
		}

		let outcome = store.claim_next(99, 5, 3600).await.unwrap();
		assert_eq!(outcome, ClaimOutcome::Disabled);
		assert!(store.queue_ids().await.unwrap().is_empty());
		assert_eq!(store.claim_next(99, 5, 3600).await.unwrap(), ClaimOutcome::Empty);
	}

	#[tokio::test]
	#[ignore = "requires a local redis"]
	async fn completed_tasks_survive_queue_rebuild() {
		let store = CoordinationStore::new("redis://127.0.0.1/").unwrap();
		clear_redis(&store).await;

		store.mark_completed(101).await.unwrap();
		let completed = store.completed_tasks().await.unwrap();
		assert!(completed.contains(&101));

		store.rebuild_queue(&[102, 103]).await.unwrap();
		assert!(store.completed_tasks().await.unwrap().contains(&101));
	}
}
