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

//! The scheduler: public handle, background loops, and the process-wide
//! default instance.
//!
//! A [`Scheduler`] owns named worker pools, an executor registry, and a
//! persistent task store. Tasks are admitted with [`Scheduler::submit`],
//! started FIFO per pool by the dispatch loop, and watched by the
//! housekeeper for liveness. On construction the scheduler reloads every
//! unfinished task from the store, so a restart resumes where the previous
//! process stopped.

mod config;
mod context;
mod core;
mod dispatcher;
mod housekeeper;
mod selector;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use context::TaskContext;
pub use selector::{SelectorMode, SubTaskSelector};

use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

use self::core::SchedulerCore;
use crate::error::SchedulerError;
use crate::executor::ExecutorFactory;
use crate::pool::WorkerPoolSpec;
use crate::store::TaskStore;
use crate::task::{TaskSpec, TaskStatus, TaskTree};

/// Handle to one scheduler instance. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Starts a scheduler over the given store.
    ///
    /// Recovery happens here: every non-terminal row is reloaded, rows that
    /// were `Processing` when the previous process died are demoted to
    /// `Waiting`, and each recovered task is requeued once its pool and
    /// command have been re-registered (or failed after the recovery grace).
    pub async fn start(
        store: Arc<dyn TaskStore>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let core = Arc::new(SchedulerCore::new(store, config));
        let recovered = core.recover().await?;
        if recovered > 0 {
            tracing::info!(count = recovered, "recovered unfinished tasks");
        }
        let dispatcher = tokio::spawn(dispatcher::run(core.clone()));
        let housekeeper = tokio::spawn(housekeeper::run(core.clone()));
        core.loop_handles.lock().extend([dispatcher, housekeeper]);
        Ok(Self { core })
    }

    /// As [`start`](Self::start), with the default configuration.
    pub async fn with_defaults(store: Arc<dyn TaskStore>) -> Result<Self, SchedulerError> {
        Self::start(store, SchedulerConfig::default()).await
    }

    /// Registers a worker pool. Re-registration with identical parameters
    /// is a no-op; differing parameters are rejected.
    pub fn register_worker_pool(&self, spec: WorkerPoolSpec) -> Result<(), SchedulerError> {
        self.core.pools.register(spec)?;
        self.core.dispatch_notify.notify_one();
        Ok(())
    }

    /// Registers an executor factory under its command name.
    pub fn register_executor_factory(
        &self,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Result<(), SchedulerError> {
        self.core.executors.register(factory)?;
        self.core.dispatch_notify.notify_one();
        Ok(())
    }

    /// Submits a task. On `Ok` the task is durably `Waiting` in its pool's
    /// FIFO and will start as soon as a concurrency slot frees up.
    pub async fn submit(&self, spec: TaskSpec) -> Result<(), SchedulerError> {
        self.core.submit(spec).await
    }

    /// Requests cancellation of a task. Waiting tasks finish immediately;
    /// processing tasks get the cancellation grace window to exit on their
    /// own. Cancelling an unknown or finished task is a successful no-op.
    pub async fn cancel(&self, task_id: &str) -> Result<(), SchedulerError> {
        self.core.cancel_task(task_id).await
    }

    /// Returns a context for a task, live or finished.
    pub async fn task_context(&self, task_id: &str) -> Result<TaskContext, SchedulerError> {
        self.core.task_context(task_id).await
    }

    /// Convenience: the current status of one task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, SchedulerError> {
        Ok(self.core.task_context(task_id).await?.get_status())
    }

    /// A master task's record plus its direct children.
    pub async fn task_tree(&self, master_id: &str) -> Result<TaskTree, SchedulerError> {
        self.core.task_tree(master_id).await
    }

    /// A selector over one master's sub-tasks.
    pub fn sub_task_selector(&self, master_id: &str, mode: SelectorMode) -> SubTaskSelector {
        SubTaskSelector::new(self.core.clone(), master_id.to_string(), mode)
    }

    /// Number of non-terminal tasks currently held.
    pub fn active_tasks(&self) -> i64 {
        self.core
            .active_count
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Shuts the scheduler down: new submissions are refused, waiting tasks
    /// are cancelled, running tasks get up to `grace` to exit cooperatively
    /// and are aborted after that.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), SchedulerError> {
        self.core.shutdown(grace).await
    }

    /// True once [`shutdown`](Self::shutdown) has completed.
    pub fn is_shut_down(&self) -> bool {
        self.core.is_shut_down()
    }
}

static DEFAULT_SCHEDULER: Lazy<tokio::sync::Mutex<Option<Scheduler>>> =
    Lazy::new(|| tokio::sync::Mutex::new(None));

/// Initializes the process-wide default scheduler.
///
/// Fails with [`SchedulerError::AlreadyInitialized`] while a previous
/// default instance is still live; after that instance is shut down the
/// slot can be initialized again.
pub async fn init_default_scheduler(
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
) -> Result<Scheduler, SchedulerError> {
    let mut slot = DEFAULT_SCHEDULER.lock().await;
    if let Some(existing) = slot.as_ref() {
        if !existing.is_shut_down() {
            return Err(SchedulerError::AlreadyInitialized);
        }
    }
    let scheduler = Scheduler::start(store, config).await?;
    *slot = Some(scheduler.clone());
    Ok(scheduler)
}

/// Returns the process-wide default scheduler.
pub async fn default_scheduler() -> Result<Scheduler, SchedulerError> {
    let slot = DEFAULT_SCHEDULER.lock().await;
    match slot.as_ref() {
        Some(scheduler) if !scheduler.is_shut_down() => Ok(scheduler.clone()),
        _ => Err(SchedulerError::NotInitialized),
    }
}
