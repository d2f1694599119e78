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

//! Shared scheduler state and the lifecycle operations on it.
//!
//! One [`SchedulerCore`] backs one scheduler instance; the public
//! [`Scheduler`](super::Scheduler) handle is an `Arc` around it. The
//! background loops (dispatcher, housekeeper) and every task context share
//! the same core.
//!
//! Locking discipline: the `tasks` map and each entry's state use short
//! parking_lot critical sections, never held across an await. Admission is
//! serialized by an async mutex so concurrent submitters observe limits and
//! FIFO order consistently.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::config::SchedulerConfig;
use super::context::{TaskContext, TaskEntry};
use crate::error::SchedulerError;
use crate::executor::ExecutorRegistry;
use crate::pool::PoolManager;
use crate::store::{PhaseTransition, TaskStore};
use crate::task::{TaskPhase, TaskRecord, TaskSpec, TaskTree};

pub(crate) struct SchedulerCore {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) executors: ExecutorRegistry,
    pub(crate) pools: PoolManager,
    /// Every task the scheduler knows in memory, terminal ones included
    /// until history pruning removes them.
    pub(crate) tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
    /// Non-terminal tasks only.
    pub(crate) active_count: AtomicI64,
    pub(crate) shutting_down: AtomicBool,
    shut_down: AtomicBool,
    /// Serializes admission so limits and FIFO order hold under concurrency.
    submit_lock: tokio::sync::Mutex<()>,
    pub(crate) dispatch_notify: Notify,
    pub(crate) task_done_notify: Notify,
    /// Raised once when the shutdown grace expires; every supervisor aborts
    /// its body on it.
    pub(crate) force_cancel: watch::Sender<bool>,
    /// One supervisor join handle per `Processing` task.
    pub(crate) monitors: Mutex<HashMap<String, JoinHandle<()>>>,
    pub(crate) loop_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Recovered tasks waiting for their pool and command to reappear.
    pub(crate) pending_recovery: Mutex<HashSet<String>>,
    pub(crate) started_at: tokio::time::Instant,
}

impl SchedulerCore {
    pub(crate) fn new(store: Arc<dyn TaskStore>, config: SchedulerConfig) -> Self {
        let (force_cancel, _) = watch::channel(false);
        Self {
            config,
            store,
            executors: ExecutorRegistry::new(),
            pools: PoolManager::new(),
            tasks: RwLock::new(HashMap::new()),
            active_count: AtomicI64::new(0),
            shutting_down: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            submit_lock: tokio::sync::Mutex::new(()),
            dispatch_notify: Notify::new(),
            task_done_notify: Notify::new(),
            force_cancel,
            monitors: Mutex::new(HashMap::new()),
            loop_handles: Mutex::new(Vec::new()),
            pending_recovery: Mutex::new(HashSet::new()),
            started_at: tokio::time::Instant::now(),
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Loads every non-terminal row from the store and requeues it.
    ///
    /// `Processing` rows are demoted to `Waiting` first: their worker died
    /// with the previous process, so they run again from the start. Entries
    /// stay in `pending_recovery` until their pool and command have been
    /// re-registered; the dispatcher admits them from there.
    pub(crate) async fn recover(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let stale = self
            .store
            .list_by_phase(&[TaskPhase::Waiting, TaskPhase::Processing])
            .await?;
        let mut recovered = 0;
        for mut record in stale {
            if record.phase == TaskPhase::Processing {
                record.phase = TaskPhase::Waiting;
                record.started_at = None;
                record.last_liveness_at = None;
                self.store.update(&record).await?;
            }
            let id = record.spec.id.clone();
            let entry = TaskEntry::from_record(&record);
            self.tasks.write().insert(id.clone(), entry);
            self.pending_recovery.lock().insert(id);
            self.active_count.fetch_add(1, Ordering::SeqCst);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Admits one task: validation, parent checks, limits, pool admission,
    /// durable insert. The task becomes `Waiting` and the dispatcher is
    /// woken.
    pub(crate) async fn submit(self: &Arc<Self>, spec: TaskSpec) -> Result<(), SchedulerError> {
        validate_spec(&spec)?;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        if !self.executors.contains(&spec.command) {
            return Err(SchedulerError::UnknownCommand(spec.command));
        }

        let _admission = self.submit_lock.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        if let Some(parent_id) = spec.parent_id.as_deref().filter(|p| !p.is_empty()) {
            let parent = self.tasks.read().get(parent_id).cloned();
            match parent {
                None => return Err(SchedulerError::UnknownParent(parent_id.to_string())),
                Some(parent) => {
                    if parent.phase().is_terminal() {
                        return Err(SchedulerError::UnknownParent(parent_id.to_string()));
                    }
                    if !parent.spec.is_master() {
                        return Err(SchedulerError::NestedSubTask(parent_id.to_string()));
                    }
                }
            }
        }

        if self.active_count.load(Ordering::SeqCst) >= self.config.max_active_tasks() as i64 {
            return Err(SchedulerError::SchedulerBusy);
        }

        if self.tasks.read().contains_key(&spec.id) {
            return Err(SchedulerError::DuplicateId(spec.id));
        }
        // Ids are never reused, so a finished row also blocks resubmission.
        if self.store.get(&spec.id).await?.is_some() {
            return Err(SchedulerError::DuplicateId(spec.id));
        }

        if self.store.count().await? >= self.config.allowed_max_tasks_in_db() {
            if !self.evict_one_history_master().await? {
                return Err(SchedulerError::StoreFull);
            }
            if self.store.count().await? >= self.config.allowed_max_tasks_in_db() {
                return Err(SchedulerError::StoreFull);
            }
        }

        self.pools.admit(&spec.pool, &spec.id)?;
        let record = TaskRecord::waiting(spec, Utc::now());
        if let Err(e) = self.store.insert(&record).await {
            self.pools.remove(&record.spec.pool, &record.spec.id);
            return Err(e.into());
        }

        let entry = TaskEntry::from_record(&record);
        self.tasks.write().insert(record.spec.id.clone(), entry);
        self.active_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            task = %record.spec.id,
            command = %record.spec.command,
            pool = %record.spec.pool,
            "task submitted"
        );
        self.dispatch_notify.notify_one();
        Ok(())
    }

    /// Requests cancellation of one task.
    ///
    /// `Waiting` tasks finish as `Cancelled` right here when we win the race
    /// against the dispatcher for the FIFO slot. `Processing` tasks are only
    /// signalled; their supervisor finishes them, within the grace window.
    /// Cancellation is never an error for the caller: unknown and already
    /// finished tasks return success.
    pub(crate) async fn cancel_task(self: &Arc<Self>, task_id: &str) -> Result<(), SchedulerError> {
        let entry = self.tasks.read().get(task_id).cloned();
        let Some(entry) = entry else {
            return Ok(());
        };

        let was_waiting = {
            let state = entry.state.lock();
            if state.phase.is_terminal() {
                return Ok(());
            }
            state.phase == TaskPhase::Waiting
        };
        entry.request_cancel();
        self.pending_recovery.lock().remove(task_id);

        if was_waiting && self.pools.remove(&entry.spec.pool, task_id) {
            // We pulled it out of the FIFO before the dispatcher could;
            // the dispatcher handles the other interleaving.
            self.publish_terminal(&entry, TaskPhase::Cancelled, None, None)
                .await;
        }
        Ok(())
    }

    /// Moves an entry to a terminal phase exactly once.
    ///
    /// Returns false when someone else already finished the task. The store
    /// write is guarded the same way, so memory and store agree on which
    /// terminal phase won.
    pub(crate) async fn publish_terminal(
        &self,
        entry: &Arc<TaskEntry>,
        phase: TaskPhase,
        failure_reason: Option<String>,
        status_detail: Option<serde_json::Value>,
    ) -> bool {
        debug_assert!(phase.is_terminal());
        let now = Utc::now();
        {
            let mut state = entry.state.lock();
            if state.phase.is_terminal() {
                return false;
            }
            state.phase = phase;
            state.finished_at = Some(now);
            if let Some(reason) = &failure_reason {
                state.failure_reason = Some(reason.clone());
            }
            if let Some(detail) = &status_detail {
                state.status_detail = detail.clone();
            }
        }
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        self.pending_recovery.lock().remove(entry.id());

        let change = PhaseTransition::terminal(phase, now, failure_reason, status_detail);
        match self.store.transition(entry.id(), change).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(task = %entry.id(), "terminal write matched no live row")
            }
            Err(e) => tracing::error!(task = %entry.id(), error = %e, "terminal write failed"),
        }
        tracing::info!(task = %entry.id(), phase = %phase, "task finished");
        self.task_done_notify.notify_waiters();
        self.dispatch_notify.notify_one();
        true
    }

    /// Returns the entry's processing slot to its pool, exactly once.
    pub(crate) fn release_slot(&self, entry: &TaskEntry) {
        {
            let mut state = entry.state.lock();
            if state.slot_released {
                return;
            }
            state.slot_released = true;
        }
        self.pools.release(&entry.spec.pool);
        self.dispatch_notify.notify_one();
    }

    /// Deletes the oldest prunable terminal master (children first).
    /// Returns false when history holds nothing prunable.
    pub(crate) async fn evict_one_history_master(&self) -> Result<bool, SchedulerError> {
        let masters = self.store.list_terminal_masters().await?;
        for master in masters {
            let children = self.store.list_children(&master.spec.id).await?;
            if children.iter().any(|c| !c.phase.is_terminal()) {
                continue;
            }
            for child in &children {
                self.store.delete(&child.spec.id).await?;
                self.tasks.write().remove(&child.spec.id);
            }
            self.store.delete(&master.spec.id).await?;
            self.tasks.write().remove(&master.spec.id);
            tracing::debug!(task = %master.spec.id, "evicted history master");
            return Ok(true);
        }
        Ok(false)
    }

    /// Builds a context for any known task, live or finished.
    pub(crate) async fn task_context(
        self: &Arc<Self>,
        task_id: &str,
    ) -> Result<TaskContext, SchedulerError> {
        let live = self.tasks.read().get(task_id).cloned();
        if let Some(entry) = live {
            return Ok(TaskContext::new(self.clone(), entry));
        }
        match self.store.get(task_id).await? {
            Some(record) => Ok(TaskContext::new(
                self.clone(),
                TaskEntry::from_record(&record),
            )),
            None => Err(SchedulerError::TaskNotFound(task_id.to_string())),
        }
    }

    /// A master's record plus its direct children, in submission order.
    pub(crate) async fn task_tree(&self, master_id: &str) -> Result<TaskTree, SchedulerError> {
        let live = self.tasks.read().get(master_id).cloned();
        let record = match live {
            Some(entry) => entry.record(),
            None => self
                .store
                .get(master_id)
                .await?
                .ok_or_else(|| SchedulerError::TaskNotFound(master_id.to_string()))?,
        };
        let children = self.store.list_children(master_id).await?;
        Ok(TaskTree { record, children })
    }

    /// Stops the scheduler: refuse new work, cancel everything, wait up to
    /// `grace` for cooperative exits, then abort what remains.
    pub(crate) async fn shutdown(self: &Arc<Self>, grace: Duration) -> Result<(), SchedulerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("scheduler shutting down");

        let entries: Vec<_> = self.tasks.read().values().cloned().collect();
        for entry in &entries {
            match entry.phase() {
                TaskPhase::Waiting => {
                    self.pools.remove(&entry.spec.pool, entry.id());
                    entry.request_cancel();
                    self.publish_terminal(entry, TaskPhase::Cancelled, None, None)
                        .await;
                }
                TaskPhase::Processing => entry.request_cancel(),
                _ => {}
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        self.wait_for_monitors(deadline).await;

        if !self.monitors.lock().is_empty() {
            tracing::warn!("shutdown grace expired, aborting remaining executors");
            self.force_cancel.send_replace(true);
            let hard = tokio::time::Instant::now() + Duration::from_secs(5);
            self.wait_for_monitors(hard).await;
            let leftover: Vec<_> = self.monitors.lock().drain().collect();
            for (id, handle) in leftover {
                handle.abort();
                tracing::warn!(task = %id, "supervisor aborted at shutdown");
            }
        }

        // Anything a supervisor never got to finish still becomes Cancelled.
        let entries: Vec<_> = self.tasks.read().values().cloned().collect();
        for entry in &entries {
            if !entry.phase().is_terminal() {
                self.release_slot(entry);
                self.publish_terminal(entry, TaskPhase::Cancelled, None, None)
                    .await;
            }
        }

        for handle in self.loop_handles.lock().drain(..) {
            handle.abort();
        }
        self.shut_down.store(true, Ordering::SeqCst);
        tracing::info!("scheduler shut down");
        Ok(())
    }

    async fn wait_for_monitors(&self, deadline: tokio::time::Instant) {
        loop {
            if self.monitors.lock().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::select! {
                _ = self.task_done_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }
}

fn validate_spec(spec: &TaskSpec) -> Result<(), SchedulerError> {
    if spec.id.is_empty() {
        return Err(SchedulerError::InvalidSpec(
            "task id must not be empty".to_string(),
        ));
    }
    if spec.command.is_empty() {
        return Err(SchedulerError::InvalidSpec(format!(
            "task '{}': command must not be empty",
            spec.id
        )));
    }
    if spec.pool.is_empty() {
        return Err(SchedulerError::InvalidSpec(format!(
            "task '{}': pool must not be empty",
            spec.id
        )));
    }
    Ok(())
}
