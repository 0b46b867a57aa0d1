// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository layer for job state and the run log.
//!
//! Every outcome-level operation (`record_run_*`) commits the run row and
//! the job-state row in one transaction, so the two can never disagree
//! about what happened.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use perch_jobs_core::{JobRun, JobState, NormalizedError, RunId, RunStatus};
use perch_server_alerts::{AlertError, AlertSeverity, AlertStateStore};

use crate::error::{JobsServerError, Result};

/// Repository trait for job reliability persistence.
///
/// A single interface over the durable store so the backing engine can be
/// swapped without touching the runner or the watchdog.
#[async_trait]
pub trait JobRepository: Send + Sync {
	async fn get_job_state(&self, job_name: &str) -> Result<Option<JobState>>;

	/// Append a `started` run row and stamp `last_run_started_at`, in one
	/// transaction.
	async fn record_run_start(
		&self,
		job_name: &str,
		run_id: RunId,
		started_at: DateTime<Utc>,
	) -> Result<()>;

	/// Terminal success: close the run row and mark the job recovered.
	async fn record_run_success(
		&self,
		job_name: &str,
		run_id: RunId,
		finished_at: DateTime<Utc>,
		records_affected: u64,
		retry_count: u32,
	) -> Result<()>;

	/// Terminal failure: close the run row and mark the job failing.
	/// `failed_at` is only stamped for the first failure in a streak.
	async fn record_run_failure(
		&self,
		job_name: &str,
		run_id: RunId,
		finished_at: DateTime<Utc>,
		retry_count: u32,
		error: &NormalizedError,
	) -> Result<()>;

	/// Update the alert dedup stamp after a confirmed send.
	async fn record_alert_sent(
		&self,
		job_name: &str,
		cause: &str,
		severity: &str,
		sent_at: DateTime<Utc>,
	) -> Result<()>;

	async fn get_run(&self, run_id: RunId) -> Result<Option<JobRun>>;
	async fn list_runs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>>;

	/// Delete run rows started before `cutoff`; returns the deleted count.
	async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLite implementation of the job repository.
#[derive(Clone)]
pub struct SqliteJobRepository {
	pool: SqlitePool,
}

impl SqliteJobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
	#[instrument(skip(self), fields(job_name = %job_name))]
	async fn get_job_state(&self, job_name: &str) -> Result<Option<JobState>> {
		let row = sqlx::query_as::<_, JobStateRow>(
			r#"
			SELECT job_name, is_failing, failed_at, recovered_at,
				   retry_count, last_error_code, last_error_message,
				   last_alert_cause, last_alert_severity, last_alert_sent_at,
				   last_run_started_at, updated_at
			FROM job_states
			WHERE job_name = ?
			"#,
		)
		.bind(job_name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(job_name = %job_name, run_id = %run_id))]
	async fn record_run_start(
		&self,
		job_name: &str,
		run_id: RunId,
		started_at: DateTime<Utc>,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			INSERT INTO job_runs (id, job_name, run_started_at, status, retry_count)
			VALUES (?, ?, ?, ?, 0)
			"#,
		)
		.bind(run_id.to_string())
		.bind(job_name)
		.bind(started_at.to_rfc3339())
		.bind(RunStatus::Started.to_string())
		.execute(&mut *tx)
		.await?;

		let exists = state_exists(&mut tx, job_name).await?;
		if exists {
			sqlx::query(
				"UPDATE job_states SET last_run_started_at = ?, updated_at = ? WHERE job_name = ?",
			)
			.bind(started_at.to_rfc3339())
			.bind(started_at.to_rfc3339())
			.bind(job_name)
			.execute(&mut *tx)
			.await?;
		} else {
			sqlx::query(
				r#"
				INSERT INTO job_states (job_name, is_failing, retry_count, last_run_started_at, updated_at)
				VALUES (?, 0, 0, ?, ?)
				"#,
			)
			.bind(job_name)
			.bind(started_at.to_rfc3339())
			.bind(started_at.to_rfc3339())
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_name = %job_name, run_id = %run_id))]
	async fn record_run_success(
		&self,
		job_name: &str,
		run_id: RunId,
		finished_at: DateTime<Utc>,
		records_affected: u64,
		retry_count: u32,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			UPDATE job_runs
			SET status = ?, run_finished_at = ?, records_affected = ?, retry_count = ?
			WHERE id = ?
			"#,
		)
		.bind(RunStatus::Succeeded.to_string())
		.bind(finished_at.to_rfc3339())
		.bind(records_affected as i64)
		.bind(retry_count as i32)
		.bind(run_id.to_string())
		.execute(&mut *tx)
		.await?;

		let exists = state_exists(&mut tx, job_name).await?;
		if exists {
			sqlx::query(
				r#"
				UPDATE job_states
				SET is_failing = 0, recovered_at = ?, retry_count = ?,
					last_error_code = NULL, last_error_message = NULL,
					updated_at = ?
				WHERE job_name = ?
				"#,
			)
			.bind(finished_at.to_rfc3339())
			.bind(retry_count as i32)
			.bind(finished_at.to_rfc3339())
			.bind(job_name)
			.execute(&mut *tx)
			.await?;
		} else {
			sqlx::query(
				r#"
				INSERT INTO job_states (job_name, is_failing, recovered_at, retry_count, updated_at)
				VALUES (?, 0, ?, ?, ?)
				"#,
			)
			.bind(job_name)
			.bind(finished_at.to_rfc3339())
			.bind(retry_count as i32)
			.bind(finished_at.to_rfc3339())
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self, error), fields(job_name = %job_name, run_id = %run_id, code = %error.code))]
	async fn record_run_failure(
		&self,
		job_name: &str,
		run_id: RunId,
		finished_at: DateTime<Utc>,
		retry_count: u32,
		error: &NormalizedError,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			UPDATE job_runs
			SET status = ?, run_finished_at = ?, retry_count = ?, error_code = ?, error_message = ?
			WHERE id = ?
			"#,
		)
		.bind(RunStatus::Failed.to_string())
		.bind(finished_at.to_rfc3339())
		.bind(retry_count as i32)
		.bind(&error.code)
		.bind(&error.message)
		.bind(run_id.to_string())
		.execute(&mut *tx)
		.await?;

		// First failure in a streak stamps failed_at; later failures in the
		// same streak keep the original stamp.
		let prior_failed_at: Option<(Option<String>,)> =
			sqlx::query_as("SELECT failed_at FROM job_states WHERE job_name = ?")
				.bind(job_name)
				.fetch_optional(&mut *tx)
				.await?;

		match prior_failed_at {
			Some((existing_failed_at,)) => {
				let failed_at = existing_failed_at.unwrap_or_else(|| finished_at.to_rfc3339());
				sqlx::query(
					r#"
					UPDATE job_states
					SET is_failing = 1, failed_at = ?, recovered_at = NULL, retry_count = ?,
						last_error_code = ?, last_error_message = ?, updated_at = ?
					WHERE job_name = ?
					"#,
				)
				.bind(failed_at)
				.bind(retry_count as i32)
				.bind(&error.code)
				.bind(&error.message)
				.bind(finished_at.to_rfc3339())
				.bind(job_name)
				.execute(&mut *tx)
				.await?;
			}
			None => {
				sqlx::query(
					r#"
					INSERT INTO job_states (job_name, is_failing, failed_at, retry_count,
						last_error_code, last_error_message, updated_at)
					VALUES (?, 1, ?, ?, ?, ?, ?)
					"#,
				)
				.bind(job_name)
				.bind(finished_at.to_rfc3339())
				.bind(retry_count as i32)
				.bind(&error.code)
				.bind(&error.message)
				.bind(finished_at.to_rfc3339())
				.execute(&mut *tx)
				.await?;
			}
		}

		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_name = %job_name, cause = %cause, severity = %severity))]
	async fn record_alert_sent(
		&self,
		job_name: &str,
		cause: &str,
		severity: &str,
		sent_at: DateTime<Utc>,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		let exists = state_exists(&mut tx, job_name).await?;
		if exists {
			sqlx::query(
				r#"
				UPDATE job_states
				SET last_alert_cause = ?, last_alert_severity = ?, last_alert_sent_at = ?, updated_at = ?
				WHERE job_name = ?
				"#,
			)
			.bind(cause)
			.bind(severity)
			.bind(sent_at.to_rfc3339())
			.bind(sent_at.to_rfc3339())
			.bind(job_name)
			.execute(&mut *tx)
			.await?;
		} else {
			sqlx::query(
				r#"
				INSERT INTO job_states (job_name, is_failing, retry_count,
					last_alert_cause, last_alert_severity, last_alert_sent_at, updated_at)
				VALUES (?, 0, 0, ?, ?, ?, ?)
				"#,
			)
			.bind(job_name)
			.bind(cause)
			.bind(severity)
			.bind(sent_at.to_rfc3339())
			.bind(sent_at.to_rfc3339())
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[instrument(skip(self), fields(run_id = %run_id))]
	async fn get_run(&self, run_id: RunId) -> Result<Option<JobRun>> {
		let row = sqlx::query_as::<_, JobRunRow>(
			r#"
			SELECT id, job_name, run_started_at, run_finished_at, status,
				   records_affected, retry_count, error_code, error_message
			FROM job_runs
			WHERE id = ?
			"#,
		)
		.bind(run_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(job_name = %job_name))]
	async fn list_runs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
		let rows = sqlx::query_as::<_, JobRunRow>(
			r#"
			SELECT id, job_name, run_started_at, run_finished_at, status,
				   records_affected, retry_count, error_code, error_message
			FROM job_runs
			WHERE job_name = ?
			ORDER BY run_started_at DESC
			LIMIT ?
			"#,
		)
		.bind(job_name)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self))]
	async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM job_runs WHERE run_started_at < ?")
			.bind(cutoff.to_rfc3339())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
impl AlertStateStore for SqliteJobRepository {
	async fn record_alert_sent(
		&self,
		job_name: &str,
		cause: &str,
		severity: AlertSeverity,
		sent_at: DateTime<Utc>,
	) -> std::result::Result<(), AlertError> {
		JobRepository::record_alert_sent(self, job_name, cause, &severity.to_string(), sent_at)
			.await
			.map_err(|err| AlertError::Store(err.to_string()))
	}
}

async fn state_exists(
	tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
	job_name: &str,
) -> Result<bool> {
	let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM job_states WHERE job_name = ?")
		.bind(job_name)
		.fetch_optional(&mut **tx)
		.await?;
	Ok(row.is_some())
}

// Database row types for sqlx

#[derive(sqlx::FromRow)]
struct JobStateRow {
	job_name: String,
	is_failing: i64,
	failed_at: Option<String>,
	recovered_at: Option<String>,
	retry_count: i64,
	last_error_code: Option<String>,
	last_error_message: Option<String>,
	last_alert_cause: Option<String>,
	last_alert_severity: Option<String>,
	last_alert_sent_at: Option<String>,
	last_run_started_at: Option<String>,
	updated_at: String,
}

impl TryFrom<JobStateRow> for JobState {
	type Error = JobsServerError;

	fn try_from(row: JobStateRow) -> Result<Self> {
		Ok(JobState {
			job_name: row.job_name,
			is_failing: row.is_failing != 0,
			failed_at: parse_opt_utc(row.failed_at, "failed_at")?,
			recovered_at: parse_opt_utc(row.recovered_at, "recovered_at")?,
			retry_count: row.retry_count as u32,
			last_error_code: row.last_error_code,
			last_error_message: row.last_error_message,
			last_alert_cause: row.last_alert_cause,
			last_alert_severity: row.last_alert_severity,
			last_alert_sent_at: parse_opt_utc(row.last_alert_sent_at, "last_alert_sent_at")?,
			last_run_started_at: parse_opt_utc(row.last_run_started_at, "last_run_started_at")?,
			updated_at: parse_utc(&row.updated_at, "updated_at")?,
		})
	}
}

#[derive(sqlx::FromRow)]
struct JobRunRow {
	id: String,
	job_name: String,
	run_started_at: String,
	run_finished_at: Option<String>,
	status: String,
	records_affected: Option<i64>,
	retry_count: i64,
	error_code: Option<String>,
	error_message: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
	type Error = JobsServerError;

	fn try_from(row: JobRunRow) -> Result<Self> {
		Ok(JobRun {
			id: row
				.id
				.parse()
				.map_err(|_| JobsServerError::Internal("invalid run id".to_string()))?,
			job_name: row.job_name,
			run_started_at: parse_utc(&row.run_started_at, "run_started_at")?,
			run_finished_at: parse_opt_utc(row.run_finished_at, "run_finished_at")?,
			status: row
				.status
				.parse()
				.map_err(|_| JobsServerError::Internal("invalid run status".to_string()))?,
			records_affected: row.records_affected.map(|n| n as u64),
			retry_count: row.retry_count as u32,
			error_code: row.error_code,
			error_message: row.error_message,
		})
	}
}

fn parse_utc(value: &str, field: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|_| JobsServerError::Internal(format!("invalid {} timestamp", field)))
}

fn parse_opt_utc(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
	value.map(|s| parse_utc(&s, field)).transpose()
}
