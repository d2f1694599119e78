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

//! The dispatch loop: moves `Waiting` tasks onto pool workers and
//! supervises the running bodies.
//!
//! One loop per scheduler. It wakes on an explicit notify (submission,
//! freed slot, registration) or after `dispatch_interval`, whichever comes
//! first, then starts everything that fits under the per-pool concurrency
//! caps. Each started body gets its own supervisor task that joins it,
//! drives the cancellation grace window, and publishes the terminal phase.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::context::{flag_raised, TaskContext, TaskEntry};
use super::core::SchedulerCore;
use super::housekeeper;
use crate::error::TaskError;
use crate::task::TaskPhase;

pub(crate) async fn run(core: Arc<SchedulerCore>) {
    tracing::debug!("dispatcher started");
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = core.dispatch_notify.notified() => {}
            _ = tokio::time::sleep(core.config.dispatch_interval()) => {}
        }
        if core.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        housekeeper::resolve_recovery(&core).await;
        drain_ready(&core).await;

        tick = tick.wrapping_add(1);
        if tick % core.config.prune_every_n_ticks() == 0 {
            housekeeper::prune_history(&core).await;
        }
    }
    tracing::debug!("dispatcher stopped");
}

/// Starts every task that currently fits: per pool, pop the FIFO head while
/// a concurrency slot is free.
pub(crate) async fn drain_ready(core: &Arc<SchedulerCore>) {
    for pool_id in core.pools.pool_ids() {
        while let Some(task_id) = core.pools.try_start(&pool_id) {
            start_task(core, &pool_id, task_id).await;
        }
    }
}

/// Launches one popped task. The concurrency slot claimed by `try_start` is
/// either bound to the entry (`slot_released = false`) or returned before
/// this function finishes.
async fn start_task(core: &Arc<SchedulerCore>, pool_id: &str, task_id: String) {
    let entry = core.tasks.read().get(&task_id).cloned();
    let Some(entry) = entry else {
        core.pools.release(pool_id);
        return;
    };

    let now = Utc::now();
    {
        let mut state = entry.state.lock();
        if state.phase != TaskPhase::Waiting {
            drop(state);
            core.pools.release(pool_id);
            return;
        }
        state.phase = TaskPhase::Processing;
        state.started_at = Some(now);
        state.last_liveness_at = Some(now);
        state.slot_released = false;
    }

    if entry.cancel_requested() {
        // Cancelled between the FIFO pop and here.
        core.release_slot(&entry);
        core.publish_terminal(&entry, TaskPhase::Cancelled, None, None)
            .await;
        return;
    }

    match core
        .store
        .transition(&task_id, crate::store::PhaseTransition::processing(now))
        .await
    {
        Ok(true) => {}
        Ok(false) => tracing::warn!(task = %task_id, "processing write matched no live row"),
        Err(e) => tracing::error!(task = %task_id, error = %e, "processing write failed"),
    }

    let Some(factory) = core.executors.get(&entry.spec.command) else {
        core.release_slot(&entry);
        core.publish_terminal(
            &entry,
            TaskPhase::Failed,
            Some(format!("unknown command: {}", entry.spec.command)),
            None,
        )
        .await;
        return;
    };

    tracing::debug!(task = %task_id, pool = %pool_id, "task started");
    let executor = factory.create_executor();
    let ctx = TaskContext::new(core.clone(), entry.clone());
    let body = tokio::spawn(async move { executor.execute(ctx).await });
    let monitor = tokio::spawn(supervise(core.clone(), entry.clone(), body));
    core.monitors.lock().insert(task_id, monitor);
}

enum BodyOutcome {
    Finished(Result<Result<(), TaskError>, tokio::task::JoinError>),
    Aborted,
}

enum BodyEvent {
    Done(Result<Result<(), TaskError>, tokio::task::JoinError>),
    CancelRequested,
    ForceCancel,
}

/// Joins one executor body and publishes its terminal phase.
///
/// Cancellation opens a grace window (the task's override or the
/// scheduler's default); a body still running when it closes is aborted.
/// The forced-shutdown flag aborts immediately. The pool slot is returned
/// before the terminal phase is published so a waiting task can start while
/// the store write is in flight.
async fn supervise(
    core: Arc<SchedulerCore>,
    entry: Arc<TaskEntry>,
    mut body: JoinHandle<Result<(), TaskError>>,
) {
    let grace = entry
        .spec
        .graceful_shutdown_timeout
        .unwrap_or_else(|| core.config.cancel_grace());
    let mut cancel_rx = entry.cancel.subscribe();
    let mut force_rx = core.force_cancel.subscribe();

    let first = tokio::select! {
        res = &mut body => BodyEvent::Done(res),
        _ = flag_raised(&mut force_rx) => BodyEvent::ForceCancel,
        _ = flag_raised(&mut cancel_rx) => BodyEvent::CancelRequested,
    };
    let outcome = match first {
        BodyEvent::Done(res) => BodyOutcome::Finished(res),
        BodyEvent::ForceCancel => abort_body(&mut body).await,
        BodyEvent::CancelRequested => {
            let second = tokio::select! {
                res = &mut body => BodyEvent::Done(res),
                _ = tokio::time::sleep(grace) => BodyEvent::CancelRequested,
                _ = flag_raised(&mut force_rx) => BodyEvent::ForceCancel,
            };
            match second {
                BodyEvent::Done(res) => BodyOutcome::Finished(res),
                BodyEvent::ForceCancel => abort_body(&mut body).await,
                BodyEvent::CancelRequested => {
                    tracing::warn!(task = %entry.id(), "cancellation grace expired, aborting");
                    abort_body(&mut body).await
                }
            }
        }
    };

    core.release_slot(&entry);

    let cancelled = entry.cancel_requested();
    let (phase, reason) = match outcome {
        BodyOutcome::Finished(Ok(Ok(()))) if cancelled => (TaskPhase::Cancelled, None),
        BodyOutcome::Finished(Ok(Ok(()))) => (TaskPhase::Succeed, None),
        BodyOutcome::Finished(Ok(Err(_))) if cancelled => (TaskPhase::Cancelled, None),
        BodyOutcome::Finished(Ok(Err(e))) => (TaskPhase::Failed, Some(e.to_string())),
        BodyOutcome::Finished(Err(join_err)) if join_err.is_panic() => {
            (TaskPhase::Failed, Some("executor exited".to_string()))
        }
        BodyOutcome::Finished(Err(_)) => (TaskPhase::Cancelled, None),
        BodyOutcome::Aborted => (TaskPhase::Cancelled, None),
    };

    // No-op when the task was already finished, e.g. by a liveness timeout
    // or a terminal status update from the executor itself.
    core.publish_terminal(&entry, phase, reason, None).await;

    core.monitors.lock().remove(entry.id());
    core.task_done_notify.notify_waiters();
}

async fn abort_body(body: &mut JoinHandle<Result<(), TaskError>>) -> BodyOutcome {
    body.abort();
    let _ = (&mut *body).await;
    BodyOutcome::Aborted
}
