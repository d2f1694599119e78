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

//! Persistent task store abstraction.
//!
//! The scheduler does not know which relational store backs it; anything
//! satisfying [`TaskStore`] works. Two implementations ship with the crate:
//! [`SqliteTaskStore`] (Diesel over SQLite, the production default) and
//! [`MemoryTaskStore`] (HashMap-backed, for tests and ephemeral use).
//!
//! Phase-altering writes go through [`TaskStore::transition`], a guarded
//! update that refuses to move a row that already reached a terminal phase.
//! Implementations run it inside a transaction so the state-machine
//! invariant holds even across process restarts.

mod memory;
mod models;
mod schema;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::task::{TaskPhase, TaskRecord};

/// A guarded phase change applied through [`TaskStore::transition`].
///
/// Only the populated optional fields are written; the phase is always
/// written. The update matches nothing when the row is already terminal.
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    /// Target phase.
    pub to: TaskPhase,
    /// Sets `started_at` when present.
    pub started_at: Option<DateTime<Utc>>,
    /// Sets `finished_at` when present.
    pub finished_at: Option<DateTime<Utc>>,
    /// Sets `last_liveness_at` when present.
    pub last_liveness_at: Option<DateTime<Utc>>,
    /// Sets the status detail when present.
    pub status_detail: Option<serde_json::Value>,
    /// Sets the failure reason when present.
    pub failure_reason: Option<String>,
}

impl PhaseTransition {
    /// `Waiting -> Processing`: stamps start and first liveness.
    pub fn processing(at: DateTime<Utc>) -> Self {
        Self {
            to: TaskPhase::Processing,
            started_at: Some(at),
            finished_at: None,
            last_liveness_at: Some(at),
            status_detail: None,
            failure_reason: None,
        }
    }

    /// Any non-terminal phase -> `to` (terminal): stamps the finish time.
    pub fn terminal(
        to: TaskPhase,
        at: DateTime<Utc>,
        failure_reason: Option<String>,
        status_detail: Option<serde_json::Value>,
    ) -> Self {
        Self {
            to,
            started_at: None,
            finished_at: Some(at),
            last_liveness_at: None,
            status_detail,
            failure_reason,
        }
    }
}

/// Relational store interface the scheduler consumes.
///
/// One logical table keyed by task id; list operations return rows in
/// `created_at` order so FIFO and pruning decisions are reproducible.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a fresh record. Fails on duplicate id.
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Overwrites an existing record unconditionally (recovery path).
    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Applies a guarded phase change; returns whether a row changed.
    ///
    /// Returns `Ok(false)` when the row is missing or already terminal.
    async fn transition(&self, id: &str, change: PhaseTransition) -> Result<bool, StoreError>;

    /// Refreshes `last_liveness_at` on a non-terminal row.
    async fn update_liveness(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Overwrites the status detail on a non-terminal row.
    async fn update_status_detail(
        &self,
        id: &str,
        detail: &serde_json::Value,
    ) -> Result<bool, StoreError>;

    /// Deletes a row by id; missing rows are not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Fetches one record.
    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Lists records in any of the given phases, oldest first.
    async fn list_by_phase(&self, phases: &[TaskPhase]) -> Result<Vec<TaskRecord>, StoreError>;

    /// Lists the direct children of a master, in submission order.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<TaskRecord>, StoreError>;

    /// Total row count across all phases.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Terminal master tasks ordered by finish time, oldest first.
    async fn list_terminal_masters(&self) -> Result<Vec<TaskRecord>, StoreError>;
}
