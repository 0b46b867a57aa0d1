// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Severity-routed, deduplicated alert dispatch for Perch server.
//!
//! Alerts degrade gracefully by design: an unconfigured destination, a
//! suppressed duplicate or a transport failure is logged and reported as
//! "not sent", never raised to the caller. A job must not fail because its
//! alert could not be delivered.

pub mod dispatcher;
pub mod error;
pub mod render;
pub mod severity;
pub mod transport;

pub use dispatcher::{AlertDispatcher, AlertRequest, AlertRouting, AlertStateStore};
pub use error::{AlertError, Result};
pub use render::{escape_mrkdwn, render_alert};
pub use severity::AlertSeverity;
pub use transport::{AlertChannel, AlertTransport, SendOutcome, SlackWebhookTransport};
