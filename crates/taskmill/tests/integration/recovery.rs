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

//! Restart recovery against the SQLite store: unfinished rows left behind
//! by a dead process are reloaded and run again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use taskmill::{
    Scheduler, SqliteTaskStore, TaskPhase, TaskRecord, TaskSpec, TaskStore, WorkerPoolSpec,
};

use crate::common::*;

async fn sqlite_store(dir: &TempDir) -> Arc<SqliteTaskStore> {
    init_tracing();
    let path = dir.path().join("tasks.db");
    Arc::new(
        SqliteTaskStore::connect(path.to_str().unwrap())
            .await
            .expect("sqlite store"),
    )
}

/// Writes rows the way a crashed process would have left them: one task
/// mid-flight, one still queued.
async fn seed_crashed_state(store: &SqliteTaskStore) {
    let now = Utc::now();

    let mut mid_flight = TaskRecord::waiting(TaskSpec::new("r-processing", "noop", "p"), now);
    mid_flight.phase = TaskPhase::Processing;
    mid_flight.started_at = Some(now);
    mid_flight.last_liveness_at = Some(now);
    store.insert(&mid_flight).await.unwrap();

    let queued = TaskRecord::waiting(TaskSpec::new("r-waiting", "noop", "p"), now);
    store.insert(&queued).await.unwrap();
}

#[tokio::test]
async fn unfinished_rows_run_again_after_restart() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    seed_crashed_state(&store).await;

    let scheduler = Scheduler::start(store.clone(), fast_config()).await.unwrap();
    assert_eq!(scheduler.active_tasks(), 2);

    // Nothing can run until pool and command reappear.
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    let record = wait_for_phase(
        &scheduler,
        "r-processing",
        TaskPhase::Succeed,
        Duration::from_secs(5),
    )
    .await;
    // It ran again from the start in this process.
    assert!(record.started_at.is_some());
    wait_for_phase(&scheduler, "r-waiting", TaskPhase::Succeed, Duration::from_secs(5)).await;

    // The store agrees.
    let row = store.get("r-processing").await.unwrap().unwrap();
    assert_eq!(row.phase, TaskPhase::Succeed);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn recovered_task_with_no_command_fails_after_the_grace() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    store
        .insert(&TaskRecord::waiting(
            TaskSpec::new("orphan", "retired-command", "p"),
            Utc::now(),
        ))
        .await
        .unwrap();

    let scheduler = Scheduler::start(store.clone(), fast_config()).await.unwrap();
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    // "retired-command" is never registered again.

    let record = wait_for_phase(&scheduler, "orphan", TaskPhase::Failed, Duration::from_secs(5)).await;
    assert_eq!(
        record.failure_reason.as_deref(),
        Some("unresolved after restart")
    );

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn terminal_rows_are_left_alone_by_recovery() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;

    let now = Utc::now();
    let mut done = TaskRecord::waiting(TaskSpec::new("done", "noop", "p"), now);
    done.phase = TaskPhase::Succeed;
    done.started_at = Some(now);
    done.finished_at = Some(now);
    store.insert(&done).await.unwrap();

    let scheduler = Scheduler::start(store.clone(), fast_config()).await.unwrap();
    assert_eq!(scheduler.active_tasks(), 0);

    // Still reachable for status lookups.
    let record = scheduler.task_context("done").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Succeed);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn state_written_by_one_scheduler_is_visible_to_the_next() {
    let dir = TempDir::new().unwrap();

    // First process: run a task to completion, then shut down.
    {
        let store = sqlite_store(&dir).await;
        let scheduler = Scheduler::start(store, fast_config()).await.unwrap();
        scheduler
            .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
            .unwrap();
        register_stock_executors(&scheduler);
        scheduler
            .submit(TaskSpec::new("job-1", "noop", "p"))
            .await
            .unwrap();
        wait_for_phase(&scheduler, "job-1", TaskPhase::Succeed, Duration::from_secs(5)).await;
        scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
    }

    // Second process over the same file: the history survived, and the id
    // stays burned.
    let store = sqlite_store(&dir).await;
    let scheduler = Scheduler::start(store, fast_config()).await.unwrap();
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    let record = scheduler.task_context("job-1").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Succeed);
    assert!(matches!(
        scheduler
            .submit(TaskSpec::new("job-1", "noop", "p"))
            .await
            .unwrap_err(),
        taskmill::SchedulerError::DuplicateId(_)
    ));

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}
