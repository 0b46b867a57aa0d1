// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Perch job reliability tracking.
//!
//! This crate provides the storage-agnostic building blocks shared by the
//! retry executor, the cron-miss watchdog and the alert dispatcher:
//! - [`JobState`]: durable per-job failure/recovery state
//! - [`JobRun`]: the append-only run log entry
//! - [`Job`]: the unit-of-work trait executed with retries
//! - [`NormalizedError`]: arbitrary work errors reduced to `(code, message)`
//! - [`ReliabilityConfig`]: the layered reliability configuration section

pub mod config;
pub mod job;
pub mod normalize;
pub mod run;
pub mod state;

pub use config::{ReliabilityConfig, ReliabilityConfigLayer};
pub use job::{Job, JobError, JobOutput};
pub use normalize::{NormalizedError, MAX_ERROR_MESSAGE_LEN, UNKNOWN_ERROR_CODE};
pub use run::{JobRun, RunId, RunReport, RunStatus};
pub use state::JobState;
