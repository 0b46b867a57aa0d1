// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable per-job failure and recovery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent reliability state for one named job.
///
/// One row per job name, keyed by `job_name`. Mutated by the retry
/// executor on every run; read by the cron-miss watchdog (last run stamp)
/// and the alert dispatcher (dedup stamps).
///
/// Invariant: `is_failing == true` implies `failed_at` is set; a
/// successful run always clears `is_failing` and stamps `recovered_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
	pub job_name: String,

	/// True between a failed attempt sequence and the next success.
	pub is_failing: bool,
	/// Start of the current failure streak. Preserved across repeated
	/// failures until the next success.
	pub failed_at: Option<DateTime<Utc>>,
	pub recovered_at: Option<DateTime<Utc>>,

	/// Retry count of the last completed run (0 for a first-attempt success).
	pub retry_count: u32,
	pub last_error_code: Option<String>,
	pub last_error_message: Option<String>,

	// Last alert fired for this job, used for time-windowed dedup.
	pub last_alert_cause: Option<String>,
	pub last_alert_severity: Option<String>,
	pub last_alert_sent_at: Option<DateTime<Utc>>,

	/// Written at the start of every run attempt, independent of outcome.
	pub last_run_started_at: Option<DateTime<Utc>>,

	pub updated_at: DateTime<Utc>,
}

impl JobState {
	/// A fresh, never-failed state for a job.
	pub fn new(job_name: impl Into<String>, now: DateTime<Utc>) -> Self {
		Self {
			job_name: job_name.into(),
			is_failing: false,
			failed_at: None,
			recovered_at: None,
			retry_count: 0,
			last_error_code: None,
			last_error_message: None,
			last_alert_cause: None,
			last_alert_severity: None,
			last_alert_sent_at: None,
			last_run_started_at: None,
			updated_at: now,
		}
	}
}
