// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Repository layer for the notification queue.
//!
//! `claim_for_retry` is the concurrency guard for the whole crate: a
//! conditional update that only succeeds if the record still looks exactly
//! as it did during the scan. At most one concurrent worker wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::{NotifyError, Result};
use crate::types::{NotificationId, NotificationRecord, NotificationStatus};

/// Repository trait for notification queue persistence.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
	/// Enqueue a new notification. Called by upstream business logic.
	async fn insert(&self, record: &NotificationRecord) -> Result<()>;

	async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>>;

	/// Records eligible for a retry pass: FAILED, or PENDING but not
	/// touched since `stale_before` (stuck in flight). Oldest first,
	/// bounded by `limit`.
	async fn list_retry_candidates(
		&self,
		stale_before: DateTime<Utc>,
		limit: u32,
	) -> Result<Vec<NotificationRecord>>;

	/// Compare-and-swap claim. Transitions the record to PENDING with
	/// `retry_count + 1` and a cleared failure reason, but only if its
	/// status and retry count still match what the scan observed and
	/// retries are not exhausted. Returns whether this caller won.
	async fn claim_for_retry(
		&self,
		id: NotificationId,
		observed_status: NotificationStatus,
		observed_retry_count: u32,
		now: DateTime<Utc>,
	) -> Result<bool>;

	async fn mark_sent(&self, id: NotificationId, sent_at: DateTime<Utc>) -> Result<()>;

	async fn mark_failed(
		&self,
		id: NotificationId,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<()>;

	/// Terminal failure: FAILED with retries exhausted, so no later sweep
	/// can ever claim the record again. Used for unusable payloads, which
	/// no number of retries will fix.
	async fn mark_failed_terminal(
		&self,
		id: NotificationId,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<()>;
}

/// SQLite implementation of the notification repository.
#[derive(Clone)]
pub struct SqliteNotificationRepository {
	pool: SqlitePool,
}

impl SqliteNotificationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
	#[instrument(skip(self, record), fields(id = %record.id))]
	async fn insert(&self, record: &NotificationRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO notifications (id, status, retry_count, max_retries, payload,
				failure_reason, sent_at, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.id.to_string())
		.bind(record.status.to_string())
		.bind(record.retry_count as i32)
		.bind(record.max_retries as i32)
		.bind(record.payload.to_string())
		.bind(&record.failure_reason)
		.bind(record.sent_at.map(|t| t.to_rfc3339()))
		.bind(record.created_at.to_rfc3339())
		.bind(record.updated_at.to_rfc3339())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(id = %id))]
	async fn get(&self, id: NotificationId) -> Result<Option<NotificationRecord>> {
		let row = sqlx::query_as::<_, NotificationRow>(
			r#"
			SELECT id, status, retry_count, max_retries, payload,
				   failure_reason, sent_at, created_at, updated_at
			FROM notifications
			WHERE id = ?
			"#,
		)
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list_retry_candidates(
		&self,
		stale_before: DateTime<Utc>,
		limit: u32,
	) -> Result<Vec<NotificationRecord>> {
		let rows = sqlx::query_as::<_, NotificationRow>(
			r#"
			SELECT id, status, retry_count, max_retries, payload,
				   failure_reason, sent_at, created_at, updated_at
			FROM notifications
			WHERE status = 'failed' OR (status = 'pending' AND updated_at < ?)
			ORDER BY updated_at ASC
			LIMIT ?
			"#,
		)
		.bind(stale_before.to_rfc3339())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self), fields(id = %id, observed_status = %observed_status))]
	async fn claim_for_retry(
		&self,
		id: NotificationId,
		observed_status: NotificationStatus,
		observed_retry_count: u32,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE notifications
			SET status = 'pending', retry_count = retry_count + 1,
				failure_reason = NULL, updated_at = ?
			WHERE id = ? AND status = ? AND retry_count = ? AND retry_count < max_retries
			"#,
		)
		.bind(now.to_rfc3339())
		.bind(id.to_string())
		.bind(observed_status.to_string())
		.bind(observed_retry_count as i32)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self), fields(id = %id))]
	async fn mark_sent(&self, id: NotificationId, sent_at: DateTime<Utc>) -> Result<()> {
		sqlx::query(
			"UPDATE notifications SET status = 'sent', sent_at = ?, updated_at = ? WHERE id = ?",
		)
		.bind(sent_at.to_rfc3339())
		.bind(sent_at.to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, reason), fields(id = %id))]
	async fn mark_failed(
		&self,
		id: NotificationId,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<()> {
		sqlx::query(
			"UPDATE notifications SET status = 'failed', failure_reason = ?, updated_at = ? WHERE id = ?",
		)
		.bind(reason)
		.bind(now.to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, reason), fields(id = %id))]
	async fn mark_failed_terminal(
		&self,
		id: NotificationId,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE notifications
			SET status = 'failed', failure_reason = ?, retry_count = max_retries, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(reason)
		.bind(now.to_rfc3339())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
	id: String,
	status: String,
	retry_count: i64,
	max_retries: i64,
	payload: String,
	failure_reason: Option<String>,
	sent_at: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<NotificationRow> for NotificationRecord {
	type Error = NotifyError;

	fn try_from(row: NotificationRow) -> Result<Self> {
		Ok(NotificationRecord {
			id: row
				.id
				.parse()
				.map_err(|_| NotifyError::Internal("invalid notification id".to_string()))?,
			status: row
				.status
				.parse()
				.map_err(|_| NotifyError::Internal("invalid notification status".to_string()))?,
			retry_count: row.retry_count as u32,
			max_retries: row.max_retries as u32,
			payload: serde_json::from_str(&row.payload)
				.map_err(|_| NotifyError::Internal("invalid notification payload".to_string()))?,
			failure_reason: row.failure_reason,
			sent_at: parse_opt_utc(row.sent_at, "sent_at")?,
			created_at: parse_utc(&row.created_at, "created_at")?,
			updated_at: parse_utc(&row.updated_at, "updated_at")?,
		})
	}
}

fn parse_utc(value: &str, field: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(value)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|_| NotifyError::Internal(format!("invalid {} timestamp", field)))
}

fn parse_opt_utc(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
	value.map(|s| parse_utc(&s, field)).transpose()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::schema::ensure_schema;
	use serde_json::json;

	fn record(status: NotificationStatus, retry_count: u32, now: DateTime<Utc>) -> NotificationRecord {
		NotificationRecord {
			id: NotificationId::new(),
			status,
			retry_count,
			max_retries: 3,
			payload: json!({
				"device_token": "tok-123",
				"title": "Price drop",
				"body": "Listing fell below your target",
			}),
			failure_reason: None,
			sent_at: None,
			created_at: now,
			updated_at: now,
		}
	}

	async fn setup() -> SqliteNotificationRepository {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		ensure_schema(&pool).await.unwrap();
		SqliteNotificationRepository::new(pool)
	}

	#[tokio::test]
	async fn insert_and_get_roundtrip() {
		let repo = setup().await;
		let now = Utc::now();
		let mut record = record(NotificationStatus::Failed, 1, now);
		record.failure_reason = Some("push gateway 502".to_string());
		repo.insert(&record).await.unwrap();

		let fetched = repo.get(record.id).await.unwrap().unwrap();
		assert_eq!(fetched.id, record.id);
		assert_eq!(fetched.status, NotificationStatus::Failed);
		assert_eq!(fetched.retry_count, 1);
		assert_eq!(fetched.failure_reason.as_deref(), Some("push gateway 502"));
		assert_eq!(fetched.payload, record.payload);
	}

	#[tokio::test]
	async fn candidates_include_failed_and_stale_pending() {
		let repo = setup().await;
		let now = Utc::now();
		let stale_before = now - chrono::Duration::minutes(30);

		let failed = record(NotificationStatus::Failed, 0, now);
		let stale_pending = record(
			NotificationStatus::Pending,
			0,
			now - chrono::Duration::hours(2),
		);
		let fresh_pending = record(NotificationStatus::Pending, 0, now);
		let sent = record(NotificationStatus::Sent, 0, now);
		for r in [&failed, &stale_pending, &fresh_pending, &sent] {
			repo.insert(r).await.unwrap();
		}

		let candidates = repo.list_retry_candidates(stale_before, 10).await.unwrap();
		let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();
		assert!(ids.contains(&failed.id));
		assert!(ids.contains(&stale_pending.id));
		assert!(!ids.contains(&fresh_pending.id));
		assert!(!ids.contains(&sent.id));
	}

	#[tokio::test]
	async fn candidates_are_oldest_first_and_bounded() {
		let repo = setup().await;
		let now = Utc::now();

		let older = record(NotificationStatus::Failed, 0, now - chrono::Duration::hours(3));
		let newer = record(NotificationStatus::Failed, 0, now - chrono::Duration::hours(1));
		repo.insert(&newer).await.unwrap();
		repo.insert(&older).await.unwrap();

		let candidates = repo.list_retry_candidates(now, 1).await.unwrap();
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].id, older.id);
	}

	#[tokio::test]
	async fn claim_succeeds_once_and_mutates_record() {
		let repo = setup().await;
		let now = Utc::now();
		let mut r = record(NotificationStatus::Failed, 1, now);
		r.failure_reason = Some("push gateway 502".to_string());
		repo.insert(&r).await.unwrap();

		let claimed = repo
			.claim_for_retry(r.id, NotificationStatus::Failed, 1, now)
			.await
			.unwrap();
		assert!(claimed);

		let fetched = repo.get(r.id).await.unwrap().unwrap();
		assert_eq!(fetched.status, NotificationStatus::Pending);
		assert_eq!(fetched.retry_count, 2);
		assert!(fetched.failure_reason.is_none());

		// Second claim against the same observation loses: the record no
		// longer matches.
		let reclaimed = repo
			.claim_for_retry(r.id, NotificationStatus::Failed, 1, now)
			.await
			.unwrap();
		assert!(!reclaimed);
	}

	#[tokio::test]
	async fn exhausted_record_cannot_be_claimed() {
		let repo = setup().await;
		let now = Utc::now();
		let r = record(NotificationStatus::Failed, 3, now);
		repo.insert(&r).await.unwrap();

		let claimed = repo
			.claim_for_retry(r.id, NotificationStatus::Failed, 3, now)
			.await
			.unwrap();
		assert!(!claimed);

		let fetched = repo.get(r.id).await.unwrap().unwrap();
		assert_eq!(fetched.retry_count, 3);
		assert_eq!(fetched.status, NotificationStatus::Failed);
	}

	#[tokio::test]
	async fn mark_failed_terminal_exhausts_retries() {
		let repo = setup().await;
		let now = Utc::now();
		let r = record(NotificationStatus::Pending, 1, now);
		repo.insert(&r).await.unwrap();

		repo.mark_failed_terminal(r.id, "invalid payload: missing body", now)
			.await
			.unwrap();

		let fetched = repo.get(r.id).await.unwrap().unwrap();
		assert_eq!(fetched.status, NotificationStatus::Failed);
		assert_eq!(fetched.retry_count, fetched.max_retries);
		assert_eq!(
			fetched.failure_reason.as_deref(),
			Some("invalid payload: missing body")
		);

		// Exhausted: no observation can claim it anymore.
		let claimed = repo
			.claim_for_retry(r.id, NotificationStatus::Failed, fetched.retry_count, now)
			.await
			.unwrap();
		assert!(!claimed);
	}

	#[tokio::test]
	async fn mark_sent_and_mark_failed_update_status() {
		let repo = setup().await;
		let now = Utc::now();
		let r = record(NotificationStatus::Pending, 1, now);
		repo.insert(&r).await.unwrap();

		repo.mark_sent(r.id, now).await.unwrap();
		let fetched = repo.get(r.id).await.unwrap().unwrap();
		assert_eq!(fetched.status, NotificationStatus::Sent);
		assert!(fetched.sent_at.is_some());

		repo.mark_failed(r.id, "push gateway 502", now).await.unwrap();
		let fetched = repo.get(r.id).await.unwrap().unwrap();
		assert_eq!(fetched.status, NotificationStatus::Failed);
		assert_eq!(fetched.failure_reason.as_deref(), Some("push gateway 502"));
	}
}
