// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort run stamp cache.
//!
//! The cache mirrors `last_run_started_at` so the cron-miss watchdog can
//! answer without a database round trip. Every caller treats it as lossy:
//! a read or write failure degrades to the database, never to an error.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors from the run stamp cache.
#[derive(Debug, Error)]
pub enum CacheError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
}

/// Key for a job's run stamp, namespaced under a deployment prefix.
pub fn run_stamp_key(prefix: &str, job_name: &str) -> String {
	format!("{}:job:{}:last_run_started_at", prefix, job_name)
}

/// Expiring string cache for run stamps.
#[async_trait]
pub trait RunStampCache: Send + Sync {
	async fn get(&self, key: &str) -> CacheResult<Option<String>>;

	async fn set_with_expiry(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()>;
}

/// Redis-backed run stamp cache.
#[derive(Clone)]
pub struct RedisRunStampCache {
	manager: redis::aio::ConnectionManager,
}

impl RedisRunStampCache {
	/// Connect to redis at `url`. The connection manager reconnects on its
	/// own after transient failures.
	pub async fn connect(url: &str) -> CacheResult<Self> {
		let client = redis::Client::open(url)?;
		let manager = client.get_connection_manager().await?;
		Ok(Self { manager })
	}
}

#[async_trait]
impl RunStampCache for RedisRunStampCache {
	#[instrument(skip(self))]
	async fn get(&self, key: &str) -> CacheResult<Option<String>> {
		let mut conn = self.manager.clone();
		let value: Option<String> = conn.get(key).await?;
		Ok(value)
	}

	#[instrument(skip(self, value))]
	async fn set_with_expiry(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()> {
		let mut conn = self.manager.clone();
		conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
		Ok(())
	}
}

/// In-process run stamp cache for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryRunStampCache {
	entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryRunStampCache {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl RunStampCache for MemoryRunStampCache {
	async fn get(&self, key: &str) -> CacheResult<Option<String>> {
		let entries = self.entries.read().await;
		Ok(entries.get(key).and_then(|(value, expires_at)| {
			if Instant::now() < *expires_at {
				Some(value.clone())
			} else {
				None
			}
		}))
	}

	async fn set_with_expiry(&self, key: &str, ttl_seconds: u64, value: &str) -> CacheResult<()> {
		let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
		let mut entries = self.entries.write().await;
		entries.insert(key.to_string(), (value.to_string(), expires_at));
		Ok(())
	}
}
