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

//! Task domain types.
//!
//! A task binds one command to one worker pool. The caller supplies an
//! immutable [`TaskSpec`]; the scheduler tracks the mutable side in a
//! [`TaskRecord`] whose authoritative copy lives in the backing store.
//! Executors communicate progress through [`TaskStatus`] values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A task's position in its lifecycle state machine.
///
/// Phases advance monotonically `Waiting -> Processing -> terminal`; no
/// transition ever leaves a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    /// Admitted into a pool's FIFO, not yet started.
    Waiting,
    /// Running on a pool worker.
    Processing,
    /// Finished successfully.
    Succeed,
    /// Finished with an error; see the record's failure reason.
    Failed,
    /// Cancelled by the caller, a liveness timeout escalation, or shutdown.
    Cancelled,
}

impl TaskPhase {
    /// Returns true for the three absorbing phases.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Succeed | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }

    /// Returns the string form used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Waiting => "Waiting",
            TaskPhase::Processing => "Processing",
            TaskPhase::Succeed => "Succeed",
            TaskPhase::Failed => "Failed",
            TaskPhase::Cancelled => "Cancelled",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Waiting" => Some(TaskPhase::Waiting),
            "Processing" => Some(TaskPhase::Processing),
            "Succeed" => Some(TaskPhase::Succeed),
            "Failed" => Some(TaskPhase::Failed),
            "Cancelled" => Some(TaskPhase::Cancelled),
            _ => None,
        }
    }

    /// The string forms of the non-terminal phases, for store queries.
    pub fn non_terminal_strs() -> &'static [&'static str] {
        &["Waiting", "Processing"]
    }

    /// The string forms of the terminal phases, for store queries.
    pub fn terminal_strs() -> &'static [&'static str] {
        &["Succeed", "Failed", "Cancelled"]
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-supplied, immutable description of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    /// Globally unique, caller-chosen id. Ids are never reused.
    pub id: String,
    /// Executor factory key resolved at dispatch time.
    pub command: String,
    /// Name of the worker pool that must host this task.
    pub pool: String,
    /// Id of the master task this one is a sub-task of, if any. The parent
    /// must be non-terminal at submission time and must itself be a master.
    pub parent_id: Option<String>,
    /// Opaque payload carried into the executor via the task context.
    pub payload: Option<serde_json::Value>,
    /// Maximum silence window on `update_liveness` before the housekeeper
    /// fails a `Processing` task. `None` disables liveness monitoring.
    pub liveness_timeout: Option<Duration>,
    /// Per-task override of the scheduler's cancellation grace window: how
    /// long a cancelled executor is given to return before it is aborted.
    pub graceful_shutdown_timeout: Option<Duration>,
}

impl TaskSpec {
    /// Creates a spec with only the required fields set.
    pub fn new(id: impl Into<String>, command: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            pool: pool.into(),
            parent_id: None,
            payload: None,
            liveness_timeout: None,
            graceful_shutdown_timeout: None,
        }
    }

    /// Marks this task as a sub-task of `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Attaches an opaque payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Enables liveness monitoring with the given timeout.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = Some(timeout);
        self
    }

    /// Overrides the cancellation grace window for this task.
    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = Some(timeout);
        self
    }

    /// Returns true when this spec describes a master task (no parent).
    pub fn is_master(&self) -> bool {
        self.parent_id.as_deref().unwrap_or("").is_empty()
    }
}

/// Status payload written by an executor through its task context.
///
/// The scheduler treats the phase authoritatively: writing a terminal phase
/// finishes the task, even though the worker is still joined before its pool
/// slot is recycled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// The phase the executor reports.
    pub phase: TaskPhase,
    /// Free-form detail value, persisted verbatim.
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl TaskStatus {
    /// Creates a status with a null detail.
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            phase,
            detail: serde_json::Value::Null,
        }
    }

    /// Creates a status with a detail value.
    pub fn with_detail(phase: TaskPhase, detail: serde_json::Value) -> Self {
        Self { phase, detail }
    }
}

/// The mutable task record; the authoritative copy lives in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// The originating spec.
    pub spec: TaskSpec,
    /// Current lifecycle phase.
    pub phase: TaskPhase,
    /// When the task was accepted.
    pub created_at: DateTime<Utc>,
    /// When the dispatcher moved it to `Processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal phase.
    pub finished_at: Option<DateTime<Utc>>,
    /// Last heartbeat through `update_liveness`.
    pub last_liveness_at: Option<DateTime<Utc>>,
    /// Last status detail written by the executor.
    pub status_detail: serde_json::Value,
    /// Human-readable reason for a `Failed` phase.
    pub failure_reason: Option<String>,
}

impl TaskRecord {
    /// Creates a fresh `Waiting` record for a just-admitted spec.
    pub fn waiting(spec: TaskSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            spec,
            phase: TaskPhase::Waiting,
            created_at,
            started_at: None,
            finished_at: None,
            last_liveness_at: None,
            status_detail: serde_json::Value::Null,
            failure_reason: None,
        }
    }

    /// The last persisted status, as the executor-facing type.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            phase: self.phase,
            detail: self.status_detail.clone(),
        }
    }
}

/// Snapshot of a master task and its direct children.
#[derive(Debug, Clone)]
pub struct TaskTree {
    /// The master's record.
    pub record: TaskRecord,
    /// Direct children in submission order.
    pub children: Vec<TaskRecord>,
}
