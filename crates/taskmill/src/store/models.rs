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

//! Row models for the SQLite task store and their conversions to the
//! domain [`TaskRecord`]. Diesel-specific code stays here so domain types
//! carry no database derives.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::time::Duration;

use super::schema::tasks;
use crate::error::StoreError;
use crate::task::{TaskPhase, TaskRecord, TaskSpec};

/// One row of the `tasks` table.
#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub(crate) struct TaskRow {
    pub id: String,
    pub parent_id: String,
    pub command: String,
    pub pool: String,
    pub payload: Option<Vec<u8>>,
    pub phase: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub last_liveness_at: Option<String>,
    pub status_detail: Option<Vec<u8>>,
    pub failure_reason: Option<String>,
    pub liveness_timeout_ms: Option<i64>,
    pub graceful_shutdown_timeout_ms: Option<i64>,
}

/// Partial changeset for guarded phase transitions. `None` fields are
/// skipped, so only the populated columns are written.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = tasks)]
pub(crate) struct TransitionRow {
    pub phase: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub last_liveness_at: Option<String>,
    pub status_detail: Option<Vec<u8>>,
    pub failure_reason: Option<String>,
}

fn to_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_rfc3339(id: &str, field: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad {field} timestamp: {e}"),
        })
}

fn encode_json(id: &str, value: &serde_json::Value) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("unencodable JSON: {e}"),
    })
}

fn decode_json(id: &str, field: &str, bytes: &[u8]) -> Result<serde_json::Value, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("bad {field} JSON: {e}"),
    })
}

impl TaskRow {
    pub(crate) fn from_record(record: &TaskRecord) -> Result<Self, StoreError> {
        let id = &record.spec.id;
        let payload = record
            .spec
            .payload
            .as_ref()
            .map(|value| encode_json(id, value))
            .transpose()?;
        let status_detail = if record.status_detail.is_null() {
            None
        } else {
            Some(encode_json(id, &record.status_detail)?)
        };
        Ok(Self {
            id: id.clone(),
            parent_id: record.spec.parent_id.clone().unwrap_or_default(),
            command: record.spec.command.clone(),
            pool: record.spec.pool.clone(),
            payload,
            phase: record.phase.as_str().to_string(),
            created_at: to_rfc3339(&record.created_at),
            started_at: record.started_at.as_ref().map(to_rfc3339),
            finished_at: record.finished_at.as_ref().map(to_rfc3339),
            last_liveness_at: record.last_liveness_at.as_ref().map(to_rfc3339),
            status_detail,
            failure_reason: record.failure_reason.clone(),
            liveness_timeout_ms: record
                .spec
                .liveness_timeout
                .map(|d| d.as_millis() as i64),
            graceful_shutdown_timeout_ms: record
                .spec
                .graceful_shutdown_timeout
                .map(|d| d.as_millis() as i64),
        })
    }

    pub(crate) fn into_record(self) -> Result<TaskRecord, StoreError> {
        let id = self.id.clone();
        let phase = TaskPhase::parse(&self.phase).ok_or_else(|| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("unknown phase '{}'", self.phase),
        })?;
        let payload = self
            .payload
            .as_deref()
            .map(|bytes| decode_json(&id, "payload", bytes))
            .transpose()?;
        let status_detail = match self.status_detail.as_deref() {
            Some(bytes) => decode_json(&id, "status_detail", bytes)?,
            None => serde_json::Value::Null,
        };
        Ok(TaskRecord {
            spec: TaskSpec {
                id: self.id,
                command: self.command,
                pool: self.pool,
                parent_id: if self.parent_id.is_empty() {
                    None
                } else {
                    Some(self.parent_id)
                },
                payload,
                liveness_timeout: self
                    .liveness_timeout_ms
                    .map(|ms| Duration::from_millis(ms.max(0) as u64)),
                graceful_shutdown_timeout: self
                    .graceful_shutdown_timeout_ms
                    .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            },
            phase,
            created_at: parse_rfc3339(&id, "created_at", &self.created_at)?,
            started_at: self
                .started_at
                .as_deref()
                .map(|s| parse_rfc3339(&id, "started_at", s))
                .transpose()?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(|s| parse_rfc3339(&id, "finished_at", s))
                .transpose()?,
            last_liveness_at: self
                .last_liveness_at
                .as_deref()
                .map(|s| parse_rfc3339(&id, "last_liveness_at", s))
                .transpose()?,
            status_detail,
            failure_reason: self.failure_reason,
        })
    }
}

impl TransitionRow {
    pub(crate) fn from_change(
        id: &str,
        change: &super::PhaseTransition,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            phase: change.to.as_str().to_string(),
            started_at: change.started_at.as_ref().map(to_rfc3339),
            finished_at: change.finished_at.as_ref().map(to_rfc3339),
            last_liveness_at: change.last_liveness_at.as_ref().map(to_rfc3339),
            status_detail: change
                .status_detail
                .as_ref()
                .map(|value| encode_json(id, value))
                .transpose()?,
            failure_reason: change.failure_reason.clone(),
        })
    }
}
