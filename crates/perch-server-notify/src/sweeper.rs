// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The retry sweeper: claim-before-act reprocessing of the backlog.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::push::PushSender;
use crate::repository::NotificationRepository;
use crate::types::PushPayload;

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepReport {
	pub scanned: u32,
	pub claimed: u32,
	pub sent: u32,
	pub failed: u32,
	pub skipped: u32,
}

/// Scans the backlog and retries deliverable notifications.
///
/// Safe to run from any number of workers concurrently: each candidate is
/// claimed with a compare-and-swap before any side effect, so a record is
/// processed by at most one winner per pass.
pub struct NotificationRetrySweeper {
	repository: Arc<dyn NotificationRepository>,
	sender: Arc<dyn PushSender>,
	/// PENDING records untouched for this long are considered stuck.
	stale_after_minutes: u32,
	batch_limit: u32,
}

impl NotificationRetrySweeper {
	pub fn new(
		repository: Arc<dyn NotificationRepository>,
		sender: Arc<dyn PushSender>,
		stale_after_minutes: u32,
		batch_limit: u32,
	) -> Self {
		Self {
			repository,
			sender,
			stale_after_minutes,
			batch_limit,
		}
	}

	/// One sweep pass over the backlog as of `now`.
	#[instrument(skip(self))]
	pub async fn sweep(&self, now: DateTime<Utc>) -> Result<RetrySweepReport> {
		let stale_before = now - Duration::minutes(self.stale_after_minutes as i64);
		let candidates = self
			.repository
			.list_retry_candidates(stale_before, self.batch_limit)
			.await?;

		let mut report = RetrySweepReport {
			scanned: candidates.len() as u32,
			..Default::default()
		};

		for candidate in candidates {
			if candidate.retry_count >= candidate.max_retries {
				report.skipped += 1;
				continue;
			}

			let claimed = self
				.repository
				.claim_for_retry(candidate.id, candidate.status, candidate.retry_count, now)
				.await?;
			if !claimed {
				// Another worker got here first, or the record changed
				// since the scan.
				report.skipped += 1;
				continue;
			}
			report.claimed += 1;

			let payload = match PushPayload::from_value(&candidate.payload) {
				Ok(payload) => payload,
				Err(reason) => {
					// Retrying cannot repair a bad payload; fail it for good.
					warn!(id = %candidate.id, reason = %reason, "claimed notification has an unusable payload");
					self.repository
						.mark_failed_terminal(candidate.id, &reason, now)
						.await?;
					report.failed += 1;
					continue;
				}
			};

			match self.sender.send(&payload).await {
				Ok(()) => {
					self.repository.mark_sent(candidate.id, Utc::now()).await?;
					report.sent += 1;
				}
				Err(err) => {
					warn!(id = %candidate.id, error = %err, "notification retry delivery failed");
					self.repository
						.mark_failed(candidate.id, &err.to_string(), Utc::now())
						.await?;
					report.failed += 1;
				}
			}
		}

		info!(
			scanned = report.scanned,
			claimed = report.claimed,
			sent = report.sent,
			failed = report.failed,
			skipped = report.skipped,
			"notification retry sweep complete"
		);

		Ok(report)
	}
}
