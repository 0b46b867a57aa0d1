// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reliability configuration section.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReliabilityConfigLayer {
	pub retention_days: Option<u32>,
	pub retry_max: Option<u32>,
	pub retry_backoff_seconds: Option<u64>,
	pub dedupe_window_seconds: Option<u64>,
	pub recovery_enabled: Option<bool>,
	pub cron_miss_threshold_minutes: Option<u32>,
	pub cache_key_prefix: Option<String>,
	pub run_stamp_ttl_seconds: Option<u64>,
}

impl ReliabilityConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.retention_days.is_some() {
			self.retention_days = other.retention_days;
		}
		if other.retry_max.is_some() {
			self.retry_max = other.retry_max;
		}
		if other.retry_backoff_seconds.is_some() {
			self.retry_backoff_seconds = other.retry_backoff_seconds;
		}
		if other.dedupe_window_seconds.is_some() {
			self.dedupe_window_seconds = other.dedupe_window_seconds;
		}
		if other.recovery_enabled.is_some() {
			self.recovery_enabled = other.recovery_enabled;
		}
		if other.cron_miss_threshold_minutes.is_some() {
			self.cron_miss_threshold_minutes = other.cron_miss_threshold_minutes;
		}
		if other.cache_key_prefix.is_some() {
			self.cache_key_prefix = other.cache_key_prefix;
		}
		if other.run_stamp_ttl_seconds.is_some() {
			self.run_stamp_ttl_seconds = other.run_stamp_ttl_seconds;
		}
	}

	/// Resolve defaults and clamp numeric values to sane minimums.
	pub fn finalize(self) -> ReliabilityConfig {
		ReliabilityConfig {
			retention_days: self.retention_days.unwrap_or(30).max(1),
			retry_max: self.retry_max.unwrap_or(3).max(1),
			retry_backoff_seconds: self.retry_backoff_seconds.unwrap_or(5),
			dedupe_window_seconds: self.dedupe_window_seconds.unwrap_or(3600), // 1 hour
			recovery_enabled: self.recovery_enabled.unwrap_or(true),
			cron_miss_threshold_minutes: self.cron_miss_threshold_minutes.unwrap_or(90).max(1),
			cache_key_prefix: self.cache_key_prefix.unwrap_or_else(|| "perch".to_string()),
			run_stamp_ttl_seconds: self.run_stamp_ttl_seconds.unwrap_or(172_800), // 48 hours
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReliabilityConfig {
	pub retention_days: u32,
	pub retry_max: u32,
	pub retry_backoff_seconds: u64,
	pub dedupe_window_seconds: u64,
	pub recovery_enabled: bool,
	pub cron_miss_threshold_minutes: u32,
	pub cache_key_prefix: String,
	pub run_stamp_ttl_seconds: u64,
}

impl Default for ReliabilityConfig {
	fn default() -> Self {
		ReliabilityConfigLayer::default().finalize()
	}
}
