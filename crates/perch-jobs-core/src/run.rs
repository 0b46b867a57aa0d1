// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only run log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for RunId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for RunId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for RunId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// One execution attempt sequence (not one retry).
///
/// Created with [`RunStatus::Started`] before the retry loop begins and
/// updated exactly once to a terminal status when the loop ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: RunId,
	pub job_name: String,

	pub run_started_at: DateTime<Utc>,
	/// Set when the run reaches a terminal status.
	pub run_finished_at: Option<DateTime<Utc>>,

	pub status: RunStatus,

	/// Outcome metric: rows deleted by a purge run, messages sent, etc.
	pub records_affected: Option<u64>,
	/// Retries consumed by the run (0 for a first-attempt success).
	pub retry_count: u32,

	pub error_code: Option<String>,
	pub error_message: Option<String>,
}

/// Status of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
	/// Retry loop in progress.
	Started,
	/// Terminal: the unit of work succeeded.
	Succeeded,
	/// Terminal: all retry attempts exhausted.
	Failed,
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Started => write!(f, "started"),
			Self::Succeeded => write!(f, "succeeded"),
			Self::Failed => write!(f, "failed"),
		}
	}
}

impl FromStr for RunStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"started" => Ok(Self::Started),
			"succeeded" => Ok(Self::Succeeded),
			"failed" => Ok(Self::Failed),
			_ => Err(format!("unknown run status: {}", s)),
		}
	}
}

/// Structured result returned to the caller after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
	pub job_name: String,
	pub records_affected: u64,
	/// Retries consumed before the successful attempt.
	pub retry_count: u32,
	pub run_started_at: DateTime<Utc>,
	pub run_finished_at: DateTime<Utc>,
}
