// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Alert message rendering for Slack-style mrkdwn channels.

use crate::severity::AlertSeverity;
use chrono::{DateTime, SecondsFormat, Utc};

/// Escape free text for Slack mrkdwn.
///
/// Slack requires `&`, `<` and `>` to be entity-encoded; everything else
/// passes through verbatim. `&` must be replaced first.
pub fn escape_mrkdwn(text: &str) -> String {
	text
		.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
}

/// Render an alert as a structured mrkdwn block.
///
/// Layout: severity tag and title, then job name, cause and UTC occurrence
/// time, then the ordered key/value details. All free-text values are
/// escaped before concatenation.
pub fn render_alert(
	severity: AlertSeverity,
	title: &str,
	job_name: &str,
	cause: &str,
	occurred_at: DateTime<Utc>,
	details: &[(String, String)],
) -> String {
	let mut out = format!(
		"*[{}] {}*\njob: {}\ncause: {}\noccurred: {}",
		severity.to_string().to_uppercase(),
		escape_mrkdwn(title),
		escape_mrkdwn(job_name),
		escape_mrkdwn(cause),
		occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
	);

	for (key, value) in details {
		out.push_str(&format!(
			"\n• {}: {}",
			escape_mrkdwn(key),
			escape_mrkdwn(value)
		));
	}

	out
}
