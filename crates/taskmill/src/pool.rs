/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Named, bounded worker pools and their admission control.
//!
//! A pool is a resource pocket with two caps: `max_concurrency` bounds the
//! simultaneously `Processing` tasks, `max_capacity` bounds waiting plus
//! processing. Within a pool, tasks start in FIFO submission order; there is
//! no priority and no ordering across pools.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::error::SchedulerError;

/// Immutable parameters of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolSpec {
    /// Unique pool name.
    pub id: String,
    /// Upper bound on simultaneously `Processing` tasks; at least 1.
    pub max_concurrency: usize,
    /// Upper bound on `Waiting + Processing` tasks; at least `max_concurrency`.
    pub max_capacity: usize,
}

impl WorkerPoolSpec {
    /// Creates a pool spec.
    pub fn new(id: impl Into<String>, max_concurrency: usize, max_capacity: usize) -> Self {
        Self {
            id: id.into(),
            max_concurrency,
            max_capacity,
        }
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.is_empty() {
            return Err(SchedulerError::InvalidSpec(
                "pool id must not be empty".to_string(),
            ));
        }
        if self.max_concurrency < 1 {
            return Err(SchedulerError::InvalidSpec(format!(
                "pool '{}': max_concurrency must be >= 1",
                self.id
            )));
        }
        if self.max_capacity < self.max_concurrency {
            return Err(SchedulerError::InvalidSpec(format!(
                "pool '{}': max_capacity must be >= max_concurrency",
                self.id
            )));
        }
        Ok(())
    }
}

struct PoolState {
    spec: WorkerPoolSpec,
    waiting: VecDeque<String>,
    processing: usize,
}

/// Tracks per-pool counters and FIFOs for every registered pool.
///
/// All methods take the internal lock for O(1) or O(n-in-pool) work only;
/// callers never hold it across awaits.
pub(crate) struct PoolManager {
    pools: Mutex<HashMap<String, PoolState>>,
}

impl PoolManager {
    pub(crate) fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a pool. Re-registration with identical parameters is a
    /// no-op; differing parameters fail and leave the prior registration
    /// intact.
    pub(crate) fn register(&self, spec: WorkerPoolSpec) -> Result<(), SchedulerError> {
        spec.validate()?;
        let mut pools = self.pools.lock();
        if let Some(existing) = pools.get(&spec.id) {
            if existing.spec == spec {
                return Ok(());
            }
            return Err(SchedulerError::PoolMismatch(spec.id));
        }
        tracing::info!(
            pool = %spec.id,
            max_concurrency = spec.max_concurrency,
            max_capacity = spec.max_capacity,
            "registered worker pool"
        );
        pools.insert(
            spec.id.clone(),
            PoolState {
                spec,
                waiting: VecDeque::new(),
                processing: 0,
            },
        );
        Ok(())
    }

    pub(crate) fn contains(&self, pool_id: &str) -> bool {
        self.pools.lock().contains_key(pool_id)
    }

    pub(crate) fn pool_ids(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    /// Admits a task into the pool's FIFO, enforcing `max_capacity`.
    pub(crate) fn admit(&self, pool_id: &str, task_id: &str) -> Result<(), SchedulerError> {
        let mut pools = self.pools.lock();
        let pool = pools
            .get_mut(pool_id)
            .ok_or_else(|| SchedulerError::UnknownPool(pool_id.to_string()))?;
        if pool.waiting.len() + pool.processing >= pool.spec.max_capacity {
            return Err(SchedulerError::PoolFull(pool_id.to_string()));
        }
        pool.waiting.push_back(task_id.to_string());
        Ok(())
    }

    /// Pops the FIFO head iff the pool has a free concurrency slot.
    ///
    /// On success the popped task occupies one processing slot that must be
    /// returned with exactly one [`release`](Self::release).
    pub(crate) fn try_start(&self, pool_id: &str) -> Option<String> {
        let mut pools = self.pools.lock();
        let pool = pools.get_mut(pool_id)?;
        if pool.processing >= pool.spec.max_concurrency {
            return None;
        }
        let task_id = pool.waiting.pop_front()?;
        pool.processing += 1;
        Some(task_id)
    }

    /// Returns a processing slot taken by [`try_start`](Self::try_start).
    pub(crate) fn release(&self, pool_id: &str) {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get_mut(pool_id) {
            pool.processing = pool.processing.saturating_sub(1);
        }
    }

    /// Removes a still-waiting task from the FIFO (cancellation path).
    ///
    /// Returns false when the task is no longer waiting, e.g. because the
    /// dispatcher already popped it.
    pub(crate) fn remove(&self, pool_id: &str, task_id: &str) -> bool {
        let mut pools = self.pools.lock();
        let Some(pool) = pools.get_mut(pool_id) else {
            return false;
        };
        let before = pool.waiting.len();
        pool.waiting.retain(|id| id != task_id);
        pool.waiting.len() != before
    }

    /// Waiting and processing counts, for logging and tests.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn counts(&self, pool_id: &str) -> Option<(usize, usize)> {
        let pools = self.pools.lock();
        pools
            .get(pool_id)
            .map(|pool| (pool.waiting.len(), pool.processing))
    }
}
