// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the notification retry queue.

use thiserror::Error;

/// Result type for notification queue operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur in notification queue operations.
#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("internal error: {0}")]
	Internal(String),
}
