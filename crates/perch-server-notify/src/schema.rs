// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database schema for the notification queue.

use sqlx::SqlitePool;

use crate::error::Result;

/// Create the notification queue table if it does not exist.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
	sqlx::query(
		r#"
		CREATE TABLE IF NOT EXISTS notifications (
			id TEXT PRIMARY KEY,
			status TEXT NOT NULL,
			retry_count INTEGER NOT NULL DEFAULT 0,
			max_retries INTEGER NOT NULL DEFAULT 3,
			payload TEXT NOT NULL,
			failure_reason TEXT,
			sent_at TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL
		)
		"#,
	)
	.execute(pool)
	.await?;

	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_notifications_status_updated ON notifications(status, updated_at)",
	)
	.execute(pool)
	.await?;

	Ok(())
}
