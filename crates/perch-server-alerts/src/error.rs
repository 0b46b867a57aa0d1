// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for alert dispatch.

use thiserror::Error;

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors that can occur in alert operations.
///
/// These never propagate out of [`crate::AlertDispatcher::send_alert`];
/// they exist for the state store seam. The transport seam reports
/// [`crate::SendOutcome`] instead of erroring.
#[derive(Debug, Error)]
pub enum AlertError {
	#[error("alert state store error: {0}")]
	Store(String),
}
