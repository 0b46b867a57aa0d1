// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Claim-based notification retry queue for Perch server.
//!
//! Queued push notifications that failed to deliver (or got stuck
//! in-flight) are retried by a periodic sweep. Multiple sweepers may scan
//! the same backlog concurrently; a conditional update acts as a
//! compare-and-swap claim, so each record is retried by at most one
//! worker per pass. No locks are taken.

pub mod error;
pub mod push;
pub mod repository;
pub mod schema;
pub mod sweeper;
pub mod types;

pub use error::{NotifyError, Result};
pub use push::{PushSendError, PushSender};
pub use repository::{NotificationRepository, SqliteNotificationRepository};
pub use schema::ensure_schema;
pub use sweeper::{NotificationRetrySweeper, RetrySweepReport};
pub use types::{NotificationId, NotificationRecord, NotificationStatus, PushPayload};
