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

//! # Taskmill
//!
//! A persistent task scheduler: named bounded worker pools, two-level
//! master/sub-task trees, and a relational store that survives restarts.
//!
//! ## Model
//!
//! - A **worker pool** caps how many tasks run at once (`max_concurrency`)
//!   and how many it holds in total (`max_capacity`). Tasks start in FIFO
//!   submission order within their pool.
//! - A **task** binds one registered **command** to one pool. Its phase
//!   advances `Waiting -> Processing -> Succeed | Failed | Cancelled` and
//!   never leaves a terminal phase.
//! - A **sub-task** names a master task as its parent; nesting depth is
//!   exactly one. Masters typically fan work out and walk the children with
//!   a [`SubTaskSelector`].
//! - Every phase change is persisted through a [`TaskStore`]. After a
//!   restart the scheduler reloads unfinished tasks and runs them again
//!   once their pools and commands are re-registered.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskmill::*;
//!
//! # async fn run() -> Result<(), SchedulerError> {
//! let store = Arc::new(SqliteTaskStore::connect("tasks.db").await?);
//! let scheduler = Scheduler::with_defaults(store).await?;
//!
//! scheduler.register_worker_pool(WorkerPoolSpec::new("io", 4, 64))?;
//! scheduler.register_executor_factory(new_executor_factory(
//!     "collect-logs",
//!     |ctx| async move {
//!         // ... do the work, heartbeat along the way ...
//!         ctx.update_liveness().await.ok();
//!         Ok(())
//!     },
//! ))?;
//!
//! scheduler
//!     .submit(TaskSpec::new("collect-42", "collect-logs", "io"))
//!     .await?;
//! # scheduler.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Executors cooperate with the scheduler through their [`TaskContext`]:
//! they heartbeat with `update_liveness`, report progress with
//! `update_status`, and select on `graceful_shutdown` to exit promptly when
//! cancelled.

pub mod error;
pub mod executor;
pub mod pool;
pub mod scheduler;
pub mod store;
pub mod task;

pub use error::{SchedulerError, StoreError, TaskError};
pub use executor::{new_executor_factory, ExecutorFactory, TaskExecutor};
pub use pool::WorkerPoolSpec;
pub use scheduler::{
    default_scheduler, init_default_scheduler, Scheduler, SchedulerConfig, SchedulerConfigBuilder,
    SelectorMode, SubTaskSelector, TaskContext,
};
pub use store::{MemoryTaskStore, PhaseTransition, SqliteTaskStore, TaskStore};
pub use task::{TaskPhase, TaskRecord, TaskSpec, TaskStatus, TaskTree};
