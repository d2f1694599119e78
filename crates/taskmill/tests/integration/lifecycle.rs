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

//! End-to-end task lifecycle: success, failure, panics, duplicate ids, and
//! executor-driven status updates.

use std::time::Duration;

use taskmill::{
    new_executor_factory, SchedulerError, TaskPhase, TaskSpec, TaskStatus, WorkerPoolSpec,
};

use crate::common::*;

#[tokio::test]
async fn successful_task_reaches_succeed() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("t1", "noop", "p"))
        .await
        .unwrap();
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(2)).await;

    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert!(record.failure_reason.is_none());
    assert_eq!(scheduler.active_tasks(), 0);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn failing_executor_records_the_reason() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("t1", "fail", "p"))
        .await
        .unwrap();
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Failed, Duration::from_secs(2)).await;

    assert!(record.failure_reason.unwrap().contains("boom"));
    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn panicking_executor_fails_the_task_not_the_scheduler() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);
    scheduler
        .register_executor_factory(new_executor_factory("panicker", |_ctx| async {
            panic!("oh no")
        }))
        .unwrap();

    scheduler
        .submit(TaskSpec::new("t1", "panicker", "p"))
        .await
        .unwrap();
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Failed, Duration::from_secs(2)).await;
    assert_eq!(record.failure_reason.as_deref(), Some("executor exited"));

    // The pool slot came back: another task still runs fine.
    scheduler
        .submit(TaskSpec::new("t2", "noop", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t2", TaskPhase::Succeed, Duration::from_secs(2)).await;

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn duplicate_ids_are_rejected_even_after_completion() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("dup", "parked", "p"))
        .await
        .unwrap();
    // Still live.
    let err = scheduler
        .submit(TaskSpec::new("dup", "noop", "p"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateId(_)));

    scheduler.cancel("dup").await.unwrap();
    wait_for_phase(&scheduler, "dup", TaskPhase::Cancelled, Duration::from_secs(2)).await;

    // Ids are never reused, finished or not.
    let err = scheduler
        .submit(TaskSpec::new("dup", "noop", "p"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateId(_)));

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn status_updates_persist_and_terminal_status_wins() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    scheduler
        .register_executor_factory(new_executor_factory("reporter", |ctx| async move {
            let target = ctx.payload().cloned().unwrap_or_default();
            ctx.update_status(TaskStatus::with_detail(
                TaskPhase::Processing,
                serde_json::json!({"progress": 50, "target": target}),
            ))
            .await
            .ok();
            ctx.update_status(TaskStatus::with_detail(
                TaskPhase::Succeed,
                serde_json::json!({"progress": 100}),
            ))
            .await
            .ok();
            // The terminal status above already finished the task; whatever
            // the body returns now must not change the outcome.
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(taskmill::TaskError::failed("late failure"))
        }))
        .unwrap();

    scheduler
        .submit(TaskSpec::new("t1", "reporter", "p").with_payload(serde_json::json!("edge-7")))
        .await
        .unwrap();
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(2)).await;
    assert_eq!(record.status_detail, serde_json::json!({"progress": 100}));

    // Give the body time to return its late error, then re-check.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = scheduler.task_context("t1").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Succeed);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn cancelling_an_unknown_task_is_a_noop() {
    let scheduler = memory_scheduler().await;

    // Never submitted, yet cancellation reports success.
    assert!(scheduler.cancel("never-submitted").await.is_ok());
    // Lookups still distinguish the unknown id.
    assert!(matches!(
        scheduler.task_context("never-submitted").await.err(),
        Some(SchedulerError::TaskNotFound(_))
    ));

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn cancelling_a_finished_task_is_a_noop() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("t1", "noop", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(2)).await;

    scheduler.cancel("t1").await.unwrap();
    let record = scheduler.task_context("t1").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Succeed);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn liveness_updates_are_rejected_after_the_task_finished() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("t1", "noop", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(2)).await;

    let ctx = scheduler.task_context("t1").await.unwrap();
    assert!(matches!(
        ctx.update_liveness().await.unwrap_err(),
        SchedulerError::TaskAlreadyTerminal(_)
    ));

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}
