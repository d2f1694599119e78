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

//! HashMap-backed task store.
//!
//! Keeps everything in process memory behind a single lock. Nothing survives
//! a restart, so restart recovery is a no-op with this store; it exists for
//! unit tests and ephemeral deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{PhaseTransition, TaskStore};
use crate::error::StoreError;
use crate::task::{TaskPhase, TaskRecord};

/// In-memory [`TaskStore`].
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<String, (u64, TaskRecord)>,
    next_seq: u64,
}

impl MemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self, mut rows: Vec<(u64, TaskRecord)>) -> Vec<TaskRecord> {
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, record)| record).collect()
    }
}

fn apply_transition(record: &mut TaskRecord, change: &PhaseTransition) {
    record.phase = change.to;
    if let Some(at) = change.started_at {
        record.started_at = Some(at);
    }
    if let Some(at) = change.finished_at {
        record.finished_at = Some(at);
    }
    if let Some(at) = change.last_liveness_at {
        record.last_liveness_at = Some(at);
    }
    if let Some(detail) = &change.status_detail {
        record.status_detail = detail.clone();
    }
    if let Some(reason) = &change.failure_reason {
        record.failure_reason = Some(reason.clone());
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.rows.contains_key(&record.spec.id) {
            return Err(StoreError::Query(format!(
                "duplicate key: {}",
                record.spec.id
            )));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.insert(record.spec.id.clone(), (seq, record.clone()));
        Ok(())
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        match inner.rows.get_mut(&record.spec.id) {
            Some((_, existing)) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::Query(format!(
                "no such row: {}",
                record.spec.id
            ))),
        }
    }

    async fn transition(&self, id: &str, change: PhaseTransition) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some((_, record)) = inner.rows.get_mut(id) else {
            return Ok(false);
        };
        if record.phase.is_terminal() {
            return Ok(false);
        }
        apply_transition(record, &change);
        Ok(true)
    }

    async fn update_liveness(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some((_, record)) = inner.rows.get_mut(id) else {
            return Ok(false);
        };
        if record.phase.is_terminal() {
            return Ok(false);
        }
        record.last_liveness_at = Some(at);
        Ok(true)
    }

    async fn update_status_detail(
        &self,
        id: &str,
        detail: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some((_, record)) = inner.rows.get_mut(id) else {
            return Ok(false);
        };
        if record.phase.is_terminal() {
            return Ok(false);
        }
        record.status_detail = detail.clone();
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().rows.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .rows
            .get(id)
            .map(|(_, record)| record.clone()))
    }

    async fn list_by_phase(&self, phases: &[TaskPhase]) -> Result<Vec<TaskRecord>, StoreError> {
        let rows: Vec<_> = self
            .inner
            .read()
            .rows
            .values()
            .filter(|(_, record)| phases.contains(&record.phase))
            .cloned()
            .collect();
        Ok(self.sorted(rows))
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let rows: Vec<_> = self
            .inner
            .read()
            .rows
            .values()
            .filter(|(_, record)| record.spec.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        Ok(self.sorted(rows))
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.inner.read().rows.len() as i64)
    }

    async fn list_terminal_masters(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .inner
            .read()
            .rows
            .values()
            .filter(|(_, record)| record.spec.is_master() && record.phase.is_terminal())
            .map(|(_, record)| record.clone())
            .collect();
        rows.sort_by_key(|record| record.finished_at);
        Ok(rows)
    }
}
