// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry executor: runs a job with exponential backoff, records every
//! outcome, and fires failure/recovery alerts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use perch_jobs_core::{
	Job, JobState, NormalizedError, ReliabilityConfig, RunId, RunReport,
};
use perch_server_alerts::{AlertDispatcher, AlertRequest, AlertSeverity};

use crate::cache::{run_stamp_key, RunStampCache};
use crate::error::{JobsServerError, Result};
use crate::repository::JobRepository;

/// Injectable delay, so backoff is observable in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
	async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

/// Delay before the retry that follows failed attempt `attempt` (1-based):
/// `backoff_seconds * 2^(attempt - 1)`, in milliseconds, saturating.
pub fn backoff_delay_ms(backoff_seconds: u64, attempt: u32) -> u64 {
	let doublings = attempt.saturating_sub(1);
	let multiplier = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
	backoff_seconds.saturating_mul(1000).saturating_mul(multiplier)
}

/// Executes jobs with retries, persisting state and dispatching alerts.
///
/// One run produces exactly one run log row: `started` up front, then a
/// single terminal update when the retry loop ends.
pub struct JobRunner {
	repository: Arc<dyn JobRepository>,
	cache: Arc<dyn RunStampCache>,
	alerts: Arc<AlertDispatcher>,
	config: ReliabilityConfig,
	sleeper: Arc<dyn Sleeper>,
}

impl JobRunner {
	pub fn new(
		repository: Arc<dyn JobRepository>,
		cache: Arc<dyn RunStampCache>,
		alerts: Arc<AlertDispatcher>,
		config: ReliabilityConfig,
	) -> Self {
		Self::with_sleeper(repository, cache, alerts, config, Arc::new(TokioSleeper))
	}

	pub fn with_sleeper(
		repository: Arc<dyn JobRepository>,
		cache: Arc<dyn RunStampCache>,
		alerts: Arc<AlertDispatcher>,
		config: ReliabilityConfig,
		sleeper: Arc<dyn Sleeper>,
	) -> Self {
		Self {
			repository,
			cache,
			alerts,
			config,
			sleeper,
		}
	}

	/// Run `job` to a terminal outcome.
	///
	/// Returns the run report on success, or
	/// [`JobsServerError::Exhausted`] once every attempt has failed. The
	/// failure itself is already persisted and alerted by the time the
	/// error reaches the caller.
	#[instrument(skip(self, job), fields(job_name = %job.name()))]
	pub async fn execute(&self, job: &dyn Job) -> Result<RunReport> {
		let job_name = job.name().to_string();
		let started_at = Utc::now();

		let prior = self.repository.get_job_state(&job_name).await?;

		let run_id = RunId::new();
		self.repository
			.record_run_start(&job_name, run_id, started_at)
			.await?;

		self.mirror_run_stamp(&job_name, prior.as_ref(), &started_at.to_rfc3339())
			.await;

		let mut last_error = None;
		for attempt in 1..=self.config.retry_max {
			match job.run().await {
				Ok(output) => {
					let finished_at = Utc::now();
					let retry_count = attempt - 1;
					self.repository
						.record_run_success(
							&job_name,
							run_id,
							finished_at,
							output.records_affected,
							retry_count,
						)
						.await?;

					info!(
						job_name = %job_name,
						records_affected = output.records_affected,
						retry_count,
						"job run succeeded"
					);

					if self.config.recovery_enabled {
						if let Some(prior) = prior.as_ref().filter(|s| s.is_failing) {
							self.send_recovery_alert(prior, finished_at).await;
						}
					}

					return Ok(RunReport {
						job_name,
						records_affected: output.records_affected,
						retry_count,
						run_started_at: started_at,
						run_finished_at: finished_at,
					});
				}
				Err(err) => {
					let normalized = NormalizedError::from_job_error(&err);
					warn!(
						job_name = %job_name,
						attempt,
						retry_max = self.config.retry_max,
						code = %normalized.code,
						message = %normalized.message,
						"job attempt failed"
					);
					last_error = Some(normalized);
					if attempt < self.config.retry_max {
						let delay =
							backoff_delay_ms(self.config.retry_backoff_seconds, attempt);
						self.sleeper.sleep(Duration::from_millis(delay)).await;
					}
				}
			}
		}

		// retry_max >= 1, so the loop always set an error before falling out.
		let error = last_error
			.unwrap_or_else(|| NormalizedError::new("unknown_error", "no attempt recorded"));
		let finished_at = Utc::now();
		self.repository
			.record_run_failure(&job_name, run_id, finished_at, self.config.retry_max, &error)
			.await?;

		let state = self.repository.get_job_state(&job_name).await?;
		self.alerts
			.send_alert(
				state.as_ref(),
				&AlertRequest {
					job_name: job_name.clone(),
					cause: "job_failed".to_string(),
					severity: AlertSeverity::Critical,
					now: finished_at,
					title: format!("Job failed: {}", job_name),
					details: vec![
						("attempts".to_string(), self.config.retry_max.to_string()),
						("error_code".to_string(), error.code.clone()),
						("error_message".to_string(), error.message.clone()),
					],
				},
			)
			.await;

		Err(JobsServerError::Exhausted {
			job: job_name,
			attempts: self.config.retry_max,
			code: error.code,
		})
	}

	/// Best-effort mirror of the run stamp into the cache. A write failure
	/// degrades to a warning alert; the run itself proceeds.
	async fn mirror_run_stamp(&self, job_name: &str, prior: Option<&JobState>, stamp: &str) {
		let key = run_stamp_key(&self.config.cache_key_prefix, job_name);
		if let Err(err) = self
			.cache
			.set_with_expiry(&key, self.config.run_stamp_ttl_seconds, stamp)
			.await
		{
			warn!(job_name = %job_name, error = %err, "run stamp cache write failed");
			self.alerts
				.send_alert(
					prior,
					&AlertRequest {
						job_name: job_name.to_string(),
						cause: "run_stamp_cache_write_failed".to_string(),
						severity: AlertSeverity::Warning,
						now: Utc::now(),
						title: format!("Run stamp cache write failed: {}", job_name),
						details: vec![("error".to_string(), err.to_string())],
					},
				)
				.await;
		}
	}

	/// Announce recovery from a failure streak. The alert summarizes the
	/// streak that just ended, so every value comes from the prior state.
	/// A state that claims to be failing without its streak fields is
	/// logged and skipped rather than alerted on.
	async fn send_recovery_alert(&self, prior: &JobState, recovered_at: chrono::DateTime<Utc>) {
		let (failed_at, error_code) = match (prior.failed_at, prior.last_error_code.as_deref()) {
			(Some(failed_at), Some(code)) => (failed_at, code),
			(failed_at, code) => {
				warn!(
					job_name = %prior.job_name,
					failed_at_missing = failed_at.is_none(),
					error_code_missing = code.is_none(),
					"failing state is missing streak fields, skipping recovery alert"
				);
				return;
			}
		};

		self.alerts
			.send_alert(
				Some(prior),
				&AlertRequest {
					job_name: prior.job_name.clone(),
					cause: "job_recovered".to_string(),
					severity: AlertSeverity::Critical,
					now: recovered_at,
					title: format!("Job recovered: {}", prior.job_name),
					details: vec![
						(
							"failed_at".to_string(),
							failed_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
						),
						(
							"recovered_at".to_string(),
							recovered_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
						),
						("retry_count".to_string(), prior.retry_count.to_string()),
						("last_error_code".to_string(), error_code.to_string()),
					],
				},
			)
			.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex;

	use sqlx::SqlitePool;

	use perch_jobs_core::{JobError, JobOutput, RunStatus};
	use perch_server_alerts::{AlertChannel, AlertRouting, AlertTransport, SendOutcome};

	use crate::cache::{CacheError, CacheResult, MemoryRunStampCache};
	use crate::repository::SqliteJobRepository;
	use crate::schema::ensure_schema;

	struct FlakyJob {
		name: String,
		failures_before_success: u32,
		attempts: AtomicU32,
	}

	impl FlakyJob {
		fn new(name: &str, failures_before_success: u32) -> Self {
			Self {
				name: name.to_string(),
				failures_before_success,
				attempts: AtomicU32::new(0),
			}
		}

		fn attempts(&self) -> u32 {
			self.attempts.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for FlakyJob {
		fn name(&self) -> &str {
			&self.name
		}

		async fn run(&self) -> std::result::Result<JobOutput, JobError> {
			let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
			if attempt <= self.failures_before_success {
				Err(JobError::coded("db_timeout", "connection pool exhausted"))
			} else {
				Ok(JobOutput {
					records_affected: 7,
				})
			}
		}
	}

	struct RecordingTransport {
		sent: Mutex<Vec<String>>,
	}

	impl RecordingTransport {
		fn new() -> Self {
			Self {
				sent: Mutex::new(Vec::new()),
			}
		}

		fn messages(&self) -> Vec<String> {
			self.sent.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl AlertTransport for RecordingTransport {
		async fn send(&self, _channel: &AlertChannel, text: &str) -> SendOutcome {
			self.sent.lock().unwrap().push(text.to_string());
			SendOutcome::Sent
		}
	}

	struct RecordingSleeper {
		sleeps: Mutex<Vec<Duration>>,
	}

	impl RecordingSleeper {
		fn new() -> Self {
			Self {
				sleeps: Mutex::new(Vec::new()),
			}
		}

		fn sleeps(&self) -> Vec<Duration> {
			self.sleeps.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl Sleeper for RecordingSleeper {
		async fn sleep(&self, duration: Duration) {
			self.sleeps.lock().unwrap().push(duration);
		}
	}

	struct FailingCache;

	#[async_trait]
	impl RunStampCache for FailingCache {
		async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
			Err(CacheError::Redis(redis::RedisError::from((
				redis::ErrorKind::IoError,
				"unreachable",
			))))
		}

		async fn set_with_expiry(
			&self,
			_key: &str,
			_ttl_seconds: u64,
			_value: &str,
		) -> CacheResult<()> {
			Err(CacheError::Redis(redis::RedisError::from((
				redis::ErrorKind::IoError,
				"unreachable",
			))))
		}
	}

	struct Harness {
		repository: Arc<SqliteJobRepository>,
		cache: Arc<MemoryRunStampCache>,
		transport: Arc<RecordingTransport>,
		sleeper: Arc<RecordingSleeper>,
		runner: JobRunner,
	}

	fn routing() -> AlertRouting {
		AlertRouting {
			critical: Some(AlertChannel {
				webhook_url: "https://hooks.example.com/critical".to_string(),
				channel: "#ops-critical".to_string(),
				thread_ts: None,
			}),
			warning: Some(AlertChannel {
				webhook_url: "https://hooks.example.com/warning".to_string(),
				channel: "#ops-warning".to_string(),
				thread_ts: None,
			}),
			dedupe_window_seconds: 3600,
		}
	}

	async fn harness(config: ReliabilityConfig) -> Harness {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		ensure_schema(&pool).await.unwrap();
		let repository = Arc::new(SqliteJobRepository::new(pool));
		let cache = Arc::new(MemoryRunStampCache::new());
		let transport = Arc::new(RecordingTransport::new());
		let sleeper = Arc::new(RecordingSleeper::new());
		let alerts = Arc::new(AlertDispatcher::new(
			transport.clone(),
			repository.clone(),
			routing(),
		));
		let runner = JobRunner::with_sleeper(
			repository.clone(),
			cache.clone(),
			alerts,
			config,
			sleeper.clone(),
		);
		Harness {
			repository,
			cache,
			transport,
			sleeper,
			runner,
		}
	}

	#[tokio::test]
	async fn first_attempt_success_records_run_and_stamp() {
		let config = ReliabilityConfig::default();
		let h = harness(config.clone()).await;
		let job = FlakyJob::new("listing-purge", 0);

		let report = h.runner.execute(&job).await.unwrap();
		assert_eq!(report.records_affected, 7);
		assert_eq!(report.retry_count, 0);
		assert_eq!(job.attempts(), 1);
		assert!(h.sleeper.sleeps().is_empty());
		assert!(h.transport.messages().is_empty());

		let state = h
			.repository
			.get_job_state("listing-purge")
			.await
			.unwrap()
			.unwrap();
		assert!(!state.is_failing);
		assert!(state.recovered_at.is_some());

		let key = run_stamp_key(&config.cache_key_prefix, "listing-purge");
		assert!(h.cache.get(&key).await.unwrap().is_some());

		let runs = h.repository.list_runs("listing-purge", 10).await.unwrap();
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0].status, RunStatus::Succeeded);
	}

	#[tokio::test]
	async fn exhaustion_fails_run_and_alerts() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;
		let job = FlakyJob::new("listing-purge", 10);

		let err = h.runner.execute(&job).await.unwrap_err();
		match err {
			JobsServerError::Exhausted {
				job,
				attempts,
				code,
			} => {
				assert_eq!(job, "listing-purge");
				assert_eq!(attempts, 3);
				assert_eq!(code, "db_timeout");
			}
			other => panic!("unexpected error: {other}"),
		}

		assert_eq!(job.attempts(), 3);
		assert_eq!(
			h.sleeper.sleeps(),
			vec![Duration::from_millis(5000), Duration::from_millis(10000)]
		);

		let state = h
			.repository
			.get_job_state("listing-purge")
			.await
			.unwrap()
			.unwrap();
		assert!(state.is_failing);
		assert!(state.failed_at.is_some());
		assert_eq!(state.retry_count, 3);
		assert_eq!(state.last_error_code.as_deref(), Some("db_timeout"));

		let runs = h.repository.list_runs("listing-purge", 10).await.unwrap();
		assert_eq!(runs.len(), 1);
		assert_eq!(runs[0].status, RunStatus::Failed);
		assert_eq!(runs[0].error_code.as_deref(), Some("db_timeout"));

		let messages = h.transport.messages();
		assert_eq!(messages.len(), 1);
		assert!(messages[0].contains("Job failed: listing-purge"));
		assert!(messages[0].contains("db_timeout"));
	}

	#[tokio::test]
	async fn failure_alert_is_deduped_across_back_to_back_runs() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;
		let job = FlakyJob::new("listing-purge", 10);

		h.runner.execute(&job).await.unwrap_err();
		let second = FlakyJob::new("listing-purge", 10);
		h.runner.execute(&second).await.unwrap_err();

		// Same cause inside the dedup window: only the first alert goes out.
		assert_eq!(h.transport.messages().len(), 1);
	}

	#[tokio::test]
	async fn failed_at_survives_repeated_exhaustion() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;

		h.runner
			.execute(&FlakyJob::new("listing-purge", 10))
			.await
			.unwrap_err();
		let first_failed_at = h
			.repository
			.get_job_state("listing-purge")
			.await
			.unwrap()
			.unwrap()
			.failed_at
			.unwrap();

		h.runner
			.execute(&FlakyJob::new("listing-purge", 10))
			.await
			.unwrap_err();
		let state = h
			.repository
			.get_job_state("listing-purge")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(state.failed_at.unwrap(), first_failed_at);
	}

	#[tokio::test]
	async fn success_after_retries_reports_retry_count() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;
		let job = FlakyJob::new("listing-purge", 2);

		let report = h.runner.execute(&job).await.unwrap();
		assert_eq!(report.retry_count, 2);
		assert_eq!(job.attempts(), 3);
		assert_eq!(h.sleeper.sleeps().len(), 2);

		let runs = h.repository.list_runs("listing-purge", 10).await.unwrap();
		assert_eq!(runs[0].status, RunStatus::Succeeded);
		assert_eq!(runs[0].retry_count, 2);
	}

	#[tokio::test]
	async fn recovery_alert_carries_streak_details() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;

		h.runner
			.execute(&FlakyJob::new("listing-purge", 10))
			.await
			.unwrap_err();
		let report = h
			.runner
			.execute(&FlakyJob::new("listing-purge", 1))
			.await
			.unwrap();
		assert_eq!(report.retry_count, 1);

		let messages = h.transport.messages();
		// One failure alert, one recovery alert.
		assert_eq!(messages.len(), 2);
		assert!(messages[1].contains("Job recovered: listing-purge"));
		assert!(messages[1].contains("failed_at"));
		assert!(messages[1].contains("db_timeout"));
		// The alert summarizes the streak that ended: the exhausted run's
		// retry count, not the recovering run's.
		assert!(messages[1].contains("retry_count: 3"));
		assert!(!messages[1].contains("retry_count: 1"));

		let state = h
			.repository
			.get_job_state("listing-purge")
			.await
			.unwrap()
			.unwrap();
		assert!(!state.is_failing);
	}

	#[tokio::test]
	async fn recovery_alert_disabled_by_config() {
		let config = ReliabilityConfig {
			recovery_enabled: false,
			..Default::default()
		};
		let h = harness(config).await;

		h.runner
			.execute(&FlakyJob::new("listing-purge", 10))
			.await
			.unwrap_err();
		h.runner
			.execute(&FlakyJob::new("listing-purge", 0))
			.await
			.unwrap();

		// Only the failure alert; no recovery announcement.
		let messages = h.transport.messages();
		assert_eq!(messages.len(), 1);
		assert!(messages[0].contains("Job failed"));
	}

	#[tokio::test]
	async fn malformed_failing_state_skips_recovery_alert() {
		let config = ReliabilityConfig::default();
		let h = harness(config).await;

		h.runner
			.execute(&FlakyJob::new("listing-purge", 10))
			.await
			.unwrap_err();

		// Corrupt the streak fields the recovery alert depends on.
		sqlx::query(
			"UPDATE job_states SET last_error_code = NULL, failed_at = NULL WHERE job_name = ?",
		)
		.bind("listing-purge")
		.execute(h.repository.pool())
		.await
		.unwrap();

		let report = h
			.runner
			.execute(&FlakyJob::new("listing-purge", 0))
			.await
			.unwrap();
		assert_eq!(report.records_affected, 7);

		// The run still succeeded; only the failure alert exists.
		let messages = h.transport.messages();
		assert_eq!(messages.len(), 1);
		assert!(messages[0].contains("Job failed"));
	}

	#[tokio::test]
	async fn cache_write_failure_warns_but_run_succeeds() {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		ensure_schema(&pool).await.unwrap();
		let repository = Arc::new(SqliteJobRepository::new(pool));
		let transport = Arc::new(RecordingTransport::new());
		let alerts = Arc::new(AlertDispatcher::new(
			transport.clone(),
			repository.clone(),
			routing(),
		));
		let runner = JobRunner::with_sleeper(
			repository.clone(),
			Arc::new(FailingCache),
			alerts,
			ReliabilityConfig::default(),
			Arc::new(RecordingSleeper::new()),
		);

		let report = runner.execute(&FlakyJob::new("listing-purge", 0)).await.unwrap();
		assert_eq!(report.records_affected, 7);

		let messages = transport.messages();
		assert_eq!(messages.len(), 1);
		assert!(messages[0].contains("Run stamp cache write failed"));
		assert!(messages[0].contains("[WARNING]"));
	}

	#[test]
	fn backoff_doubles_per_attempt() {
		assert_eq!(backoff_delay_ms(5, 1), 5_000);
		assert_eq!(backoff_delay_ms(5, 2), 10_000);
		assert_eq!(backoff_delay_ms(5, 3), 20_000);
		assert_eq!(backoff_delay_ms(1, 1), 1_000);
	}

	#[test]
	fn backoff_saturates_instead_of_overflowing() {
		assert_eq!(backoff_delay_ms(5, 200), u64::MAX);
		assert_eq!(backoff_delay_ms(u64::MAX, 2), u64::MAX);
	}
}
