// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The unit-of-work trait executed by the retry runner.

use async_trait::async_trait;
use thiserror::Error;

/// A named unit of work.
///
/// Implementations are supplied by callers (a retention purge, a snapshot
/// refresh) and must be idempotent: the runner guarantees at-least-once
/// execution, not exactly-once.
#[async_trait]
pub trait Job: Send + Sync {
	/// Stable job name, the key for its reliability state.
	fn name(&self) -> &str;

	/// Execute one attempt of the work.
	async fn run(&self) -> Result<JobOutput, JobError>;
}

/// Outcome metrics of a successful attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOutput {
	/// Rows deleted, messages sent, etc.
	pub records_affected: u64,
}

/// Failure of a single work attempt.
#[derive(Debug, Error)]
pub enum JobError {
	/// Failure carrying an explicit machine-readable code.
	#[error("{message}")]
	Coded { code: String, message: String },

	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	/// Failure with no usable code.
	#[error("{0}")]
	Other(String),
}

impl JobError {
	/// Convenience constructor for coded failures.
	pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Coded {
			code: code.into(),
			message: message.into(),
		}
	}
}
