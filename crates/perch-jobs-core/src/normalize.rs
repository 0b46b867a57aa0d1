// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error normalization for storage and display.

use crate::job::JobError;
use serde::{Deserialize, Serialize};

/// Fallback code when an error carries no usable one.
pub const UNKNOWN_ERROR_CODE: &str = "unknown_error";

/// Stored error messages are capped to this many characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// An arbitrary work error reduced to a `(code, message)` pair.
///
/// The code is machine-readable (alert causes, run log rows); the message
/// is the best available human-readable text, bounded for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
	pub code: String,
	pub message: String,
}

impl NormalizedError {
	/// Build a normalized error, trimming the code and capping the message.
	///
	/// An empty (or whitespace-only) code falls back to
	/// [`UNKNOWN_ERROR_CODE`]. Never fails.
	pub fn new(code: &str, message: &str) -> Self {
		let code = code.trim();
		let code = if code.is_empty() {
			UNKNOWN_ERROR_CODE.to_string()
		} else {
			code.to_string()
		};

		let message = if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
			message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
		} else {
			message.to_string()
		};

		Self { code, message }
	}

	/// Normalize a work error into its storable form.
	pub fn from_job_error(err: &JobError) -> Self {
		match err {
			JobError::Coded { code, message } => Self::new(code, message),
			JobError::Io(e) => Self::new("io_error", &e.to_string()),
			JobError::Other(message) => Self::new(UNKNOWN_ERROR_CODE, message),
		}
	}
}
