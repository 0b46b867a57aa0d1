// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database schema for job reliability state and the run log.

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the job reliability tables if they do not exist.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS job_states (
			job_name TEXT PRIMARY KEY,
			is_failing INTEGER NOT NULL DEFAULT 0,
			failed_at TEXT,
			recovered_at TEXT,
			retry_count INTEGER NOT NULL DEFAULT 0,
			last_error_code TEXT,
			last_error_message TEXT,
			last_alert_cause TEXT,
			last_alert_severity TEXT,
			last_alert_sent_at TEXT,
			last_run_started_at TEXT,
			updated_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS job_runs (
			id TEXT PRIMARY KEY,
			job_name TEXT NOT NULL,
			run_started_at TEXT NOT NULL,
			run_finished_at TEXT,
			status TEXT NOT NULL,
			records_affected INTEGER,
			retry_count INTEGER NOT NULL DEFAULT 0,
			error_code TEXT,
			error_message TEXT
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_job_runs_name_started ON job_runs(job_name, run_started_at)",
	)
	.execute(pool)
	.await?;

	Ok(())
}
