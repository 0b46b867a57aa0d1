// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the job runner and its persistence.

use thiserror::Error;

/// Result type for job runner operations.
pub type Result<T> = std::result::Result<T, JobsServerError>;

/// Errors that can occur in job runner operations.
#[derive(Debug, Error)]
pub enum JobsServerError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	/// Terminal outcome of a run whose every attempt failed. Fatal to the
	/// caller; the scheduler's own logging is expected to surface it.
	#[error("job '{job}' failed after {attempts} attempts: {code}")]
	Exhausted {
		job: String,
		attempts: u32,
		code: String,
	},

	#[error("internal error: {0}")]
	Internal(String),
}
