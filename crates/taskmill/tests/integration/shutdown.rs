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

//! Graceful shutdown and the process-wide default scheduler.

use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use taskmill::{
    default_scheduler, init_default_scheduler, MemoryTaskStore, SchedulerError, TaskPhase,
    TaskSpec, WorkerPoolSpec,
};

use crate::common::*;

#[tokio::test]
async fn cooperative_tasks_finish_as_cancelled_within_the_grace() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(TaskSpec::new("runner", "parked", "p"))
        .await
        .unwrap();
    scheduler
        .submit(TaskSpec::new("runner-2", "parked", "p"))
        .await
        .unwrap();
    scheduler
        .submit(TaskSpec::new("queued", "parked", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "runner", TaskPhase::Processing, Duration::from_secs(2)).await;
    wait_for_phase(&scheduler, "runner-2", TaskPhase::Processing, Duration::from_secs(2)).await;

    scheduler.shutdown(Duration::from_secs(2)).await.unwrap();
    assert!(scheduler.is_shut_down());

    for id in ["runner", "runner-2", "queued"] {
        let record = scheduler.task_context(id).await.unwrap().record();
        assert_eq!(record.phase, TaskPhase::Cancelled, "task {id}");
    }
}

#[tokio::test]
async fn stubborn_tasks_are_aborted_once_the_grace_expires() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    scheduler
        .submit(
            TaskSpec::new("stuck", "stubborn", "p")
                .with_graceful_shutdown_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    wait_for_phase(&scheduler, "stuck", TaskPhase::Processing, Duration::from_secs(2)).await;

    let begun = Instant::now();
    scheduler.shutdown(Duration::from_secs(2)).await.unwrap();
    // Far less than the 60s the body wanted.
    assert!(begun.elapsed() < Duration::from_secs(5));

    let record = scheduler.task_context("stuck").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Cancelled);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let scheduler = memory_scheduler().await;
    scheduler.shutdown(Duration::from_millis(100)).await.unwrap();
    scheduler.shutdown(Duration::from_millis(100)).await.unwrap();
    assert!(scheduler.is_shut_down());
}

#[tokio::test]
#[serial]
async fn default_scheduler_is_a_singleton_until_shut_down() {
    init_tracing();
    let scheduler = init_default_scheduler(Arc::new(MemoryTaskStore::new()), fast_config())
        .await
        .unwrap();

    // Second init while live is refused.
    assert!(matches!(
        init_default_scheduler(Arc::new(MemoryTaskStore::new()), fast_config())
            .await
            .err(),
        Some(SchedulerError::AlreadyInitialized)
    ));

    // The accessor hands back the same instance.
    let fetched = default_scheduler().await.unwrap();
    fetched
        .register_worker_pool(WorkerPoolSpec::new("p", 1, 4))
        .unwrap();
    register_stock_executors(&fetched);
    fetched
        .submit(TaskSpec::new("t1", "noop", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(2)).await;

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();

    // Shut down: the accessor refuses, a fresh init succeeds.
    assert!(matches!(
        default_scheduler().await.err(),
        Some(SchedulerError::NotInitialized)
    ));
    let second = init_default_scheduler(Arc::new(MemoryTaskStore::new()), fast_config())
        .await
        .unwrap();
    second.shutdown(Duration::from_millis(500)).await.unwrap();
}
