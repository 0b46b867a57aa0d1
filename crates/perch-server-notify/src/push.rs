// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The outbound push delivery seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PushPayload;

/// Delivery failure reported by a push sender.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PushSendError(pub String);

/// Delivers one push notification.
///
/// Implemented by the actual messaging channel outside this crate. The
/// sweeper only needs success or a describable failure.
#[async_trait]
pub trait PushSender: Send + Sync {
	async fn send(&self, payload: &PushPayload) -> Result<(), PushSendError>;
}
