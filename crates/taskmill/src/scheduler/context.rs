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

//! In-memory task entries and the executor-facing task context.
//!
//! A [`TaskEntry`] is the live, in-process twin of a store row: the mutable
//! lifecycle fields behind a short-lived lock plus the cancellation channel.
//! The lock is never held across an await; store writes happen after the
//! in-memory change, and the in-memory state stays authoritative if a write
//! fails.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use super::core::SchedulerCore;
use super::selector::{SelectorMode, SubTaskSelector};
use crate::error::SchedulerError;
use crate::task::{TaskPhase, TaskRecord, TaskSpec, TaskStatus, TaskTree};

/// Mutable lifecycle fields of a live task.
pub(crate) struct TaskState {
    pub phase: TaskPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_liveness_at: Option<DateTime<Utc>>,
    pub status_detail: serde_json::Value,
    pub failure_reason: Option<String>,
    /// True while this task holds no processing slot in its pool. The
    /// dispatcher clears it when it claims a slot; `release_slot` sets it
    /// back exactly once.
    pub slot_released: bool,
}

/// One task as the scheduler tracks it in memory.
pub(crate) struct TaskEntry {
    pub spec: TaskSpec,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<TaskState>,
    /// Flips to true exactly once; executors observe it through
    /// [`TaskContext::graceful_shutdown`].
    pub cancel: watch::Sender<bool>,
}

impl TaskEntry {
    /// Rehydrates an entry from a persisted record (recovery and lookups of
    /// finished tasks). Terminal records get a pre-fired cancellation channel
    /// so `graceful_shutdown` on their context resolves immediately.
    pub(crate) fn from_record(record: &TaskRecord) -> Arc<Self> {
        let (cancel, _) = watch::channel(record.phase.is_terminal());
        Arc::new(Self {
            spec: record.spec.clone(),
            created_at: record.created_at,
            state: Mutex::new(TaskState {
                phase: record.phase,
                started_at: record.started_at,
                finished_at: record.finished_at,
                last_liveness_at: record.last_liveness_at,
                status_detail: record.status_detail.clone(),
                failure_reason: record.failure_reason.clone(),
                slot_released: true,
            }),
            cancel,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.spec.id
    }

    pub(crate) fn phase(&self) -> TaskPhase {
        self.state.lock().phase
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Requests cooperative cancellation. Idempotent.
    pub(crate) fn request_cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Snapshot of the entry as a [`TaskRecord`].
    pub(crate) fn record(&self) -> TaskRecord {
        let state = self.state.lock();
        TaskRecord {
            spec: self.spec.clone(),
            phase: state.phase,
            created_at: self.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
            last_liveness_at: state.last_liveness_at,
            status_detail: state.status_detail.clone(),
            failure_reason: state.failure_reason.clone(),
        }
    }
}

/// Resolves once the watched flag becomes true. Never resolves if the sender
/// goes away first, which cannot happen while an entry or core is alive.
pub(crate) async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Handle an executor (or any caller holding it) uses to interact with its
/// task: heartbeat, report status, observe cancellation, and inspect or
/// cancel the task and its sub-tasks.
///
/// Contexts are cheap to clone and safe to move into spawned work.
#[derive(Clone)]
pub struct TaskContext {
    core: Arc<SchedulerCore>,
    entry: Arc<TaskEntry>,
}

impl TaskContext {
    pub(crate) fn new(core: Arc<SchedulerCore>, entry: Arc<TaskEntry>) -> Self {
        Self { core, entry }
    }

    /// The task's id.
    pub fn task_id(&self) -> &str {
        self.entry.id()
    }

    /// The immutable spec this task was submitted with.
    pub fn spec(&self) -> &TaskSpec {
        &self.entry.spec
    }

    /// The opaque payload attached at submission, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.entry.spec.payload.as_ref()
    }

    /// True once cancellation has been requested for this task.
    pub fn cancel_requested(&self) -> bool {
        self.entry.cancel_requested()
    }

    /// Resolves when cancellation is requested.
    ///
    /// Cooperative executors select on this alongside their work and return
    /// promptly when it fires; the scheduler aborts the body only after the
    /// cancellation grace window elapses.
    pub async fn graceful_shutdown(&self) {
        let mut rx = self.entry.cancel.subscribe();
        flag_raised(&mut rx).await;
    }

    /// Records a heartbeat, deferring this task's liveness deadline.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TaskAlreadyTerminal`] when the task already finished.
    /// A failed store write is logged, not surfaced; the in-memory heartbeat
    /// still counts.
    pub async fn update_liveness(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        {
            let mut state = self.entry.state.lock();
            if state.phase.is_terminal() {
                return Err(SchedulerError::TaskAlreadyTerminal(
                    self.entry.id().to_string(),
                ));
            }
            state.last_liveness_at = Some(now);
        }
        if let Err(e) = self.core.store.update_liveness(self.entry.id(), now).await {
            tracing::error!(task = %self.entry.id(), error = %e, "liveness write failed");
        }
        Ok(())
    }

    /// Publishes a status on behalf of the executor.
    ///
    /// A terminal phase finishes the task immediately: the phase and detail
    /// become final even though the worker body is still joined before its
    /// pool slot is recycled. A non-terminal phase only replaces the detail.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TaskAlreadyTerminal`] when the task already finished.
    pub async fn update_status(&self, status: TaskStatus) -> Result<(), SchedulerError> {
        if self.entry.phase().is_terminal() {
            return Err(SchedulerError::TaskAlreadyTerminal(
                self.entry.id().to_string(),
            ));
        }
        if status.phase.is_terminal() {
            self.core
                .publish_terminal(&self.entry, status.phase, None, Some(status.detail))
                .await;
            return Ok(());
        }
        {
            let mut state = self.entry.state.lock();
            if state.phase.is_terminal() {
                return Err(SchedulerError::TaskAlreadyTerminal(
                    self.entry.id().to_string(),
                ));
            }
            state.status_detail = status.detail.clone();
        }
        if let Err(e) = self
            .core
            .store
            .update_status_detail(self.entry.id(), &status.detail)
            .await
        {
            tracing::error!(task = %self.entry.id(), error = %e, "status write failed");
        }
        Ok(())
    }

    /// The task's current status.
    pub fn get_status(&self) -> TaskStatus {
        let state = self.entry.state.lock();
        TaskStatus {
            phase: state.phase,
            detail: state.status_detail.clone(),
        }
    }

    /// Snapshot of this task's record.
    pub fn record(&self) -> TaskRecord {
        self.entry.record()
    }

    /// This task and its direct sub-tasks, in submission order.
    pub async fn get_sub_task_tree(&self) -> Result<TaskTree, SchedulerError> {
        let children = self.core.store.list_children(self.entry.id()).await?;
        Ok(TaskTree {
            record: self.entry.record(),
            children,
        })
    }

    /// A selector over this task's sub-tasks.
    pub fn sub_task_selector(&self, mode: SelectorMode) -> SubTaskSelector {
        SubTaskSelector::new(self.core.clone(), self.entry.id().to_string(), mode)
    }

    /// Requests cancellation of this task.
    pub async fn cancel(&self) -> Result<(), SchedulerError> {
        self.core.cancel_task(self.entry.id()).await
    }
}
