// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Alert transport seam and the Slack incoming-webhook implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Destination for one severity level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertChannel {
	/// Incoming-webhook URL; empty disables the channel.
	pub webhook_url: String,
	/// Channel identifier, e.g. "#ops-alerts".
	pub channel: String,
	/// Optional thread timestamp to post into a sub-thread.
	pub thread_ts: Option<String>,
}

impl AlertChannel {
	/// A channel without a webhook URL cannot deliver anything.
	pub fn is_configured(&self) -> bool {
		!self.webhook_url.trim().is_empty()
	}
}

/// Result of one transport attempt. Never an error: the dispatcher decides
/// how to degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
	Sent,
	Failed,
	Skipped,
}

/// Outbound channel for rendered alert text.
#[async_trait]
pub trait AlertTransport: Send + Sync {
	async fn send(&self, channel: &AlertChannel, text: &str) -> SendOutcome;
}

/// Posts rendered alerts to a Slack-style incoming webhook.
pub struct SlackWebhookTransport {
	client: reqwest::Client,
}

impl SlackWebhookTransport {
	pub fn new() -> Self {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(10))
			.build()
			.expect("failed to build HTTP client");
		Self { client }
	}
}

impl Default for SlackWebhookTransport {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl AlertTransport for SlackWebhookTransport {
	async fn send(&self, channel: &AlertChannel, text: &str) -> SendOutcome {
		if !channel.is_configured() {
			return SendOutcome::Skipped;
		}

		let mut body = serde_json::json!({
			"channel": channel.channel,
			"text": text,
		});
		if let Some(thread_ts) = &channel.thread_ts {
			body["thread_ts"] = serde_json::Value::String(thread_ts.clone());
		}

		match self
			.client
			.post(&channel.webhook_url)
			.json(&body)
			.send()
			.await
		{
			Ok(response) if response.status().is_success() => SendOutcome::Sent,
			Ok(response) => {
				warn!(
					status = %response.status(),
					channel = %channel.channel,
					"alert webhook returned non-success status"
				);
				SendOutcome::Failed
			}
			Err(err) => {
				warn!(error = %err, channel = %channel.channel, "alert webhook request failed");
				SendOutcome::Failed
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_webhook_url_is_unconfigured() {
		let channel = AlertChannel::default();
		assert!(!channel.is_configured());

		let channel = AlertChannel {
			webhook_url: "   ".to_string(),
			..Default::default()
		};
		assert!(!channel.is_configured());
	}

	#[tokio::test]
	async fn unconfigured_channel_is_skipped_without_io() {
		let transport = SlackWebhookTransport::new();
		let outcome = transport.send(&AlertChannel::default(), "hello").await;
		assert_eq!(outcome, SendOutcome::Skipped);
	}
}
