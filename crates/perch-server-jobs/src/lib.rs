// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retrying job runner with persistent failure state for Perch server.
//!
//! This crate provides the durable side of the job-reliability core:
//! - [`JobRunner`]: executes a unit of work with exponential backoff,
//!   recording every run and its outcome
//! - [`JobRepository`]: transactional SQLite persistence for
//!   [`perch_jobs_core::JobState`] and the append-only run log
//! - [`RunStampCache`]: best-effort fast mirror of the last run stamp
//! - [`CronMissWatchdog`]: independent staleness check that catches a
//!   scheduler that stopped invoking the job at all
//!
//! Multiple workers may execute the same named job concurrently; safety
//! comes from the store's unique-key semantics, not from locks.

pub mod cache;
pub mod error;
pub mod purge;
pub mod repository;
pub mod runner;
pub mod schema;
pub mod watchdog;

pub use cache::{
	run_stamp_key, CacheError, CacheResult, MemoryRunStampCache, RedisRunStampCache, RunStampCache,
};
pub use error::{JobsServerError, Result};
pub use purge::{retention_cutoff, RetentionPurgeJob};
pub use repository::{JobRepository, SqliteJobRepository};
pub use runner::{backoff_delay_ms, JobRunner, Sleeper, TokioSleeper};
pub use schema::ensure_schema;
pub use watchdog::{CronMissReport, CronMissWatchdog, StampSource};
