// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cron-miss watchdog: detects a scheduler that silently stopped firing.
//!
//! The watchdog is independent of the runner; it only reads the run stamp
//! (cache first, database as fallback) and compares its age against the
//! configured threshold. A job that runs and fails is the runner's problem;
//! a job that never starts is this module's.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use perch_jobs_core::ReliabilityConfig;
use perch_server_alerts::{AlertDispatcher, AlertRequest, AlertSeverity};

use crate::cache::{run_stamp_key, RunStampCache};
use crate::error::Result;
use crate::repository::JobRepository;

/// Where the run stamp used for the check came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampSource {
	Redis,
	Db,
	None,
}

impl fmt::Display for StampSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Redis => write!(f, "redis"),
			Self::Db => write!(f, "db"),
			Self::None => write!(f, "none"),
		}
	}
}

/// Outcome of one watchdog check.
#[derive(Debug, Clone)]
pub struct CronMissReport {
	pub job_name: String,
	pub missed: bool,
	pub source: StampSource,
	pub last_run_started_at: Option<DateTime<Utc>>,
	pub threshold_minutes: u32,
	pub elapsed_minutes: Option<i64>,
	/// Whether an alert actually went out (false when deduped or dropped).
	pub alerted: bool,
}

/// Staleness check for one named job's run stamp.
pub struct CronMissWatchdog {
	job_name: String,
	repository: Arc<dyn JobRepository>,
	cache: Arc<dyn RunStampCache>,
	alerts: Arc<AlertDispatcher>,
	config: ReliabilityConfig,
}

impl CronMissWatchdog {
	pub fn new(
		job_name: impl Into<String>,
		repository: Arc<dyn JobRepository>,
		cache: Arc<dyn RunStampCache>,
		alerts: Arc<AlertDispatcher>,
		config: ReliabilityConfig,
	) -> Self {
		Self {
			job_name: job_name.into(),
			repository,
			cache,
			alerts,
			config,
		}
	}

	/// Check the run stamp's age as of `now`, alerting on a miss.
	///
	/// A job with no stamp anywhere has never run under this deployment;
	/// that is not reported as a miss.
	#[instrument(skip(self), fields(job_name = %self.job_name))]
	pub async fn check(&self, now: DateTime<Utc>) -> Result<CronMissReport> {
		let (last_run_started_at, source) = match self.read_stamp().await? {
			Some(found) => found,
			None => {
				debug!(job_name = %self.job_name, "no run stamp anywhere, skipping miss check");
				return Ok(CronMissReport {
					job_name: self.job_name.clone(),
					missed: false,
					source: StampSource::None,
					last_run_started_at: None,
					threshold_minutes: self.config.cron_miss_threshold_minutes,
					elapsed_minutes: None,
					alerted: false,
				});
			}
		};

		let elapsed_minutes = (now - last_run_started_at).num_minutes();
		// A stamp from the future reads as a fresh run, never a miss.
		let missed = elapsed_minutes > self.config.cron_miss_threshold_minutes as i64;

		let alerted = if missed {
			warn!(
				job_name = %self.job_name,
				elapsed_minutes,
				threshold_minutes = self.config.cron_miss_threshold_minutes,
				source = %source,
				"cron miss detected"
			);
			let state = self.repository.get_job_state(&self.job_name).await?;
			self.alerts
				.send_alert(
					state.as_ref(),
					&AlertRequest {
						job_name: self.job_name.clone(),
						cause: format!(
							"cron_missed:{}",
							self.config.cron_miss_threshold_minutes
						),
						severity: AlertSeverity::Critical,
						now,
						title: format!("Cron miss: {}", self.job_name),
						details: vec![
							("source".to_string(), source.to_string()),
							("elapsed_minutes".to_string(), elapsed_minutes.to_string()),
							(
								"threshold_minutes".to_string(),
								self.config.cron_miss_threshold_minutes.to_string(),
							),
							(
								"last_run_started_at".to_string(),
								last_run_started_at
									.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
							),
						],
					},
				)
				.await
		} else {
			false
		};

		Ok(CronMissReport {
			job_name: self.job_name.clone(),
			missed,
			source,
			last_run_started_at: Some(last_run_started_at),
			threshold_minutes: self.config.cron_miss_threshold_minutes,
			elapsed_minutes: Some(elapsed_minutes),
			alerted,
		})
	}

	/// Cache first, database second. A cache failure or an unparseable
	/// cached stamp falls through to the database.
	async fn read_stamp(&self) -> Result<Option<(DateTime<Utc>, StampSource)>> {
		let key = run_stamp_key(&self.config.cache_key_prefix, &self.job_name);
		match self.cache.get(&key).await {
			Ok(Some(raw)) => match DateTime::parse_from_rfc3339(&raw) {
				Ok(stamp) => {
					return Ok(Some((stamp.with_timezone(&Utc), StampSource::Redis)));
				}
				Err(err) => {
					warn!(
						job_name = %self.job_name,
						raw = %raw,
						error = %err,
						"unparseable cached run stamp, falling back to database"
					);
				}
			},
			Ok(None) => {}
			Err(err) => {
				warn!(
					job_name = %self.job_name,
					error = %err,
					"run stamp cache read failed, falling back to database"
				);
			}
		}

		let state = self.repository.get_job_state(&self.job_name).await?;
		Ok(state
			.and_then(|s| s.last_run_started_at)
			.map(|stamp| (stamp, StampSource::Db)))
	}
}
