// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Run log retention: purge runs older than the configured window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use perch_jobs_core::{Job, JobError, JobOutput};

use crate::repository::JobRepository;

/// Cutoff for run retention: anything started before it gets purged.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
	now - Duration::days(retention_days.max(1) as i64)
}

/// Deletes run log rows past the retention window.
///
/// Runs under the same runner as any other job, so purge failures get the
/// standard retry and alerting treatment.
pub struct RetentionPurgeJob {
	repository: Arc<dyn JobRepository>,
	retention_days: u32,
}

impl RetentionPurgeJob {
	pub fn new(repository: Arc<dyn JobRepository>, retention_days: u32) -> Self {
		Self {
			repository,
			retention_days,
		}
	}
}

#[async_trait]
impl Job for RetentionPurgeJob {
	fn name(&self) -> &str {
		"run-history-purge"
	}

	async fn run(&self) -> Result<JobOutput, JobError> {
		let cutoff = retention_cutoff(Utc::now(), self.retention_days);
		let deleted = self
			.repository
			.delete_runs_before(cutoff)
			.await
			.map_err(|err| JobError::coded("db_error", err.to_string()))?;

		Ok(JobOutput {
			records_affected: deleted,
		})
	}
}
