// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Notification queue record and payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for NotificationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for NotificationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for NotificationId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Delivery status of a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
	/// Queued or claimed for delivery.
	Pending,
	/// Terminal: delivered.
	Sent,
	/// Delivery failed; retryable until `retry_count` reaches `max_retries`.
	Failed,
}

impl fmt::Display for NotificationStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pending => write!(f, "pending"),
			Self::Sent => write!(f, "sent"),
			Self::Failed => write!(f, "failed"),
		}
	}
}

impl FromStr for NotificationStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"sent" => Ok(Self::Sent),
			"failed" => Ok(Self::Failed),
			_ => Err(format!("unknown notification status: {}", s)),
		}
	}
}

/// One queued outbound message.
///
/// Created by upstream business logic; mutated only by the retry sweeper.
/// Invariant: `retry_count <= max_retries`; a FAILED record with
/// `retry_count == max_retries` is terminal and never touched again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
	pub id: NotificationId,
	pub status: NotificationStatus,

	pub retry_count: u32,
	pub max_retries: u32,

	/// Opaque structured payload; interpreted by [`PushPayload`] at send time.
	pub payload: Value,
	pub failure_reason: Option<String>,

	pub sent_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// The fields a push delivery needs, extracted from the opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
	pub device_token: String,
	pub title: String,
	pub body: String,
}

impl PushPayload {
	/// Extract and validate a push payload.
	///
	/// Fails with the missing or empty field names, so the record's
	/// `failure_reason` tells an operator exactly what was wrong.
	pub fn from_value(value: &Value) -> Result<Self, String> {
		let mut missing = Vec::new();

		let field = |name: &str| -> Option<String> {
			value
				.get(name)
				.and_then(Value::as_str)
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
		};

		let device_token = field("device_token");
		let title = field("title");
		let body = field("body");

		if device_token.is_none() {
			missing.push("device_token");
		}
		if title.is_none() {
			missing.push("title");
		}
		if body.is_none() {
			missing.push("body");
		}

		if !missing.is_empty() {
			return Err(format!("invalid payload: missing {}", missing.join(", ")));
		}

		// The checks above guarantee all three are present.
		Ok(Self {
			device_token: device_token.unwrap_or_default(),
			title: title.unwrap_or_default(),
			body: body.unwrap_or_default(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn valid_payload_extracts_fields() {
		let payload = PushPayload::from_value(&json!({
			"device_token": "tok-123",
			"title": "Price drop",
			"body": "Listing fell below your target",
			"extra": 42,
		}))
		.unwrap();
		assert_eq!(payload.device_token, "tok-123");
		assert_eq!(payload.title, "Price drop");
		assert_eq!(payload.body, "Listing fell below your target");
	}

	#[test]
	fn missing_fields_are_all_named() {
		let err = PushPayload::from_value(&json!({ "title": "Price drop" })).unwrap_err();
		assert_eq!(err, "invalid payload: missing device_token, body");
	}

	#[test]
	fn empty_and_whitespace_fields_count_as_missing() {
		let err = PushPayload::from_value(&json!({
			"device_token": "",
			"title": "   ",
			"body": "ok",
		}))
		.unwrap_err();
		assert!(err.contains("device_token"));
		assert!(err.contains("title"));
		assert!(!err.contains("body"));
	}

	#[test]
	fn non_string_field_counts_as_missing() {
		let err = PushPayload::from_value(&json!({
			"device_token": 123,
			"title": "t",
			"body": "b",
		}))
		.unwrap_err();
		assert!(err.contains("device_token"));
	}

	#[test]
	fn status_roundtrip() {
		for status in [
			NotificationStatus::Pending,
			NotificationStatus::Sent,
			NotificationStatus::Failed,
		] {
			let parsed: NotificationStatus = status.to_string().parse().unwrap();
			assert_eq!(status, parsed);
		}
		assert!("delivered".parse::<NotificationStatus>().is_err());
	}
}
