// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The alert dispatcher: routing, dedup and fire-and-forget delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use perch_jobs_core::JobState;

use crate::error::Result;
use crate::render::render_alert;
use crate::severity::AlertSeverity;
use crate::transport::{AlertChannel, AlertTransport, SendOutcome};

/// Per-severity destinations and the dedup window.
#[derive(Debug, Clone, Default)]
pub struct AlertRouting {
	pub critical: Option<AlertChannel>,
	pub warning: Option<AlertChannel>,
	/// A repeat alert with the same (cause, severity) inside this window
	/// is suppressed.
	pub dedupe_window_seconds: u64,
}

impl AlertRouting {
	fn channel_for(&self, severity: AlertSeverity) -> Option<&AlertChannel> {
		match severity {
			AlertSeverity::Critical => self.critical.as_ref(),
			AlertSeverity::Warning => self.warning.as_ref(),
		}
	}
}

/// One alert to render and deliver.
#[derive(Debug, Clone)]
pub struct AlertRequest {
	pub job_name: String,
	pub cause: String,
	pub severity: AlertSeverity,
	pub now: DateTime<Utc>,
	pub title: String,
	/// Ordered key/value pairs rendered below the header.
	pub details: Vec<(String, String)>,
}

/// Persists the dedup stamp after a confirmed send.
///
/// Implemented by the job repository; updating the stamp is the only side
/// effect of a successful send.
#[async_trait]
pub trait AlertStateStore: Send + Sync {
	async fn record_alert_sent(
		&self,
		job_name: &str,
		cause: &str,
		severity: AlertSeverity,
		sent_at: DateTime<Utc>,
	) -> Result<()>;
}

/// Renders and delivers severity-routed alerts with time-windowed dedup.
pub struct AlertDispatcher {
	transport: Arc<dyn AlertTransport>,
	store: Arc<dyn AlertStateStore>,
	routing: AlertRouting,
}

impl AlertDispatcher {
	pub fn new(
		transport: Arc<dyn AlertTransport>,
		store: Arc<dyn AlertStateStore>,
		routing: AlertRouting,
	) -> Self {
		Self {
			transport,
			store,
			routing,
		}
	}

	/// Deliver an alert. Returns whether the transport confirmed the send.
	///
	/// Every degradation path (unconfigured destination, suppressed
	/// duplicate, transport failure) logs and returns `false`; this never
	/// fails the caller.
	pub async fn send_alert(&self, state: Option<&JobState>, request: &AlertRequest) -> bool {
		let channel = match self.routing.channel_for(request.severity) {
			Some(channel) if channel.is_configured() => channel,
			_ => {
				warn!(
					job_name = %request.job_name,
					severity = %request.severity,
					cause = %request.cause,
					"no destination configured for severity, dropping alert"
				);
				return false;
			}
		};

		if let Some(state) = state {
			if is_duplicate(
				state,
				&request.cause,
				request.severity,
				request.now,
				self.routing.dedupe_window_seconds,
			) {
				debug!(
					job_name = %request.job_name,
					cause = %request.cause,
					severity = %request.severity,
					"duplicate alert suppressed inside dedup window"
				);
				return false;
			}
		}

		let text = render_alert(
			request.severity,
			&request.title,
			&request.job_name,
			&request.cause,
			request.now,
			&request.details,
		);

		match self.transport.send(channel, &text).await {
			SendOutcome::Sent => {
				if let Err(err) = self
					.store
					.record_alert_sent(
						&request.job_name,
						&request.cause,
						request.severity,
						request.now,
					)
					.await
				{
					// The alert reached the channel; only dedup fidelity degrades.
					warn!(
						job_name = %request.job_name,
						error = %err,
						"failed to record alert dedup stamp"
					);
				}
				info!(
					job_name = %request.job_name,
					cause = %request.cause,
					severity = %request.severity,
					"alert sent"
				);
				true
			}
			SendOutcome::Failed => {
				warn!(
					job_name = %request.job_name,
					cause = %request.cause,
					"alert transport failed, continuing without alert"
				);
				false
			}
			SendOutcome::Skipped => {
				warn!(
					job_name = %request.job_name,
					cause = %request.cause,
					"alert transport skipped delivery"
				);
				false
			}
		}
	}
}

/// True when the state's last alert matches (cause, severity) and was sent
/// less than `window_seconds` ago. Exactly `window_seconds` is not a
/// duplicate.
fn is_duplicate(
	state: &JobState,
	cause: &str,
	severity: AlertSeverity,
	now: DateTime<Utc>,
	window_seconds: u64,
) -> bool {
	if state.last_alert_cause.as_deref() != Some(cause) {
		return false;
	}
	if state.last_alert_severity.as_deref() != Some(severity.to_string().as_str()) {
		return false;
	}
	match state.last_alert_sent_at {
		Some(sent_at) => now - sent_at < Duration::seconds(window_seconds as i64),
		None => false,
	}
}
