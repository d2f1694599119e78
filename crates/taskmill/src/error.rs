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

//! Error types for the scheduler.
//!
//! Every public operation returns an explicit error kind; nothing panics on
//! recoverable conditions. Store failures surface as [`SchedulerError::Store`]
//! on the submission path; during execution they are logged and the in-memory
//! record remains authoritative until the next successful write.

use thiserror::Error;

/// Errors returned by the scheduler's public API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The default scheduler has already been initialized and not shut down.
    #[error("scheduler is already initialized")]
    AlreadyInitialized,

    /// The default scheduler has not been initialized.
    #[error("scheduler is not initialized")]
    NotInitialized,

    /// The named worker pool is not registered.
    #[error("unknown worker pool: {0}")]
    UnknownPool(String),

    /// A pool with this name is already registered with different parameters.
    #[error("worker pool '{0}' is already registered with different parameters")]
    PoolMismatch(String),

    /// The pool's waiting + processing count has reached its capacity.
    #[error("worker pool '{0}' is at capacity")]
    PoolFull(String),

    /// No executor factory is registered for this command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// An executor factory is already registered for this command.
    #[error("command '{0}' is already registered")]
    CommandAlreadyRegistered(String),

    /// The referenced parent task does not exist or is already terminal.
    #[error("unknown or finished parent task: {0}")]
    UnknownParent(String),

    /// Sub-tasks may not have sub-tasks of their own.
    #[error("parent task '{0}' is itself a sub-task; nesting depth is exactly one")]
    NestedSubTask(String),

    /// A task with this id already exists.
    #[error("a task with id '{0}' already exists")]
    DuplicateId(String),

    /// The scheduler has reached its active-task limit.
    #[error("scheduler has reached its active task limit")]
    SchedulerBusy,

    /// The backing store has reached its row limit and nothing could be evicted.
    #[error("task store has reached its row limit")]
    StoreFull,

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The sub-task selector has exhausted the running children.
    #[error("no running sub-task")]
    NoRunningSubTask,

    /// The task has already reached a terminal phase.
    #[error("task '{0}' is already terminal")]
    TaskAlreadyTerminal(String),

    /// No task with this id is known to the scheduler or the store.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The scheduler is shutting down and refuses new work.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// A spec failed validation before admission.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}

/// Errors produced by [`TaskStore`](crate::store::TaskStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to obtain or use a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// A query or statement failed.
    #[error("query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// A persisted row could not be decoded into a task record.
    #[error("corrupt record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// Errors returned by task executor bodies.
///
/// The scheduler translates an `Err` return into `Phase::Failed` with the
/// error text as the failure reason (unless cancellation was already
/// requested, in which case the task finishes as `Cancelled`).
#[derive(Debug, Error)]
pub enum TaskError {
    /// The executor hit an unrecoverable condition.
    #[error("task execution failed: {message}")]
    ExecutionFailed { message: String },
}

impl TaskError {
    /// Convenience constructor for [`TaskError::ExecutionFailed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::ExecutionFailed {
            message: message.into(),
        }
    }
}
