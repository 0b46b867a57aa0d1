// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Alert severity levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of an alert; each level routes to its own destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
	/// Page-worthy: exhausted jobs, missed schedules, recoveries.
	Critical,
	/// Degraded observability: cache mirror failures and similar.
	Warning,
}

impl fmt::Display for AlertSeverity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Critical => write!(f, "critical"),
			Self::Warning => write!(f, "warning"),
		}
	}
}

impl FromStr for AlertSeverity {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"critical" => Ok(Self::Critical),
			"warning" => Ok(Self::Warning),
			_ => Err(format!("unknown alert severity: {}", s)),
		}
	}
}
