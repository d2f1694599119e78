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

//! Liveness monitoring: silent executors are failed, heartbeating ones
//! are left alone.

use std::time::Duration;

use taskmill::{new_executor_factory, TaskPhase, TaskSpec, WorkerPoolSpec};

use crate::common::*;

#[tokio::test]
async fn a_silent_executor_is_failed_while_its_body_still_runs() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    scheduler
        .register_executor_factory(new_executor_factory("stalls", |_ctx| async {
            // Never heartbeats, never returns on its own.
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }))
        .unwrap();

    scheduler
        .submit(
            TaskSpec::new("t1", "stalls", "p")
                .with_liveness_timeout(Duration::from_millis(100))
                .with_graceful_shutdown_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    // The failure is published as soon as the deadline passes, well before
    // the 60s body could ever return.
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Failed, Duration::from_secs(2)).await;
    assert_eq!(record.failure_reason.as_deref(), Some("liveness timeout"));

    // The stuck body is torn down and its slot comes back.
    scheduler
        .register_executor_factory(new_executor_factory("noop", |_ctx| async { Ok(()) }))
        .unwrap();
    scheduler
        .submit(TaskSpec::new("t2", "noop", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t2", TaskPhase::Succeed, Duration::from_secs(2)).await;

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn heartbeats_keep_a_slow_task_alive() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    scheduler
        .register_executor_factory(new_executor_factory("heartbeater", |ctx| async move {
            // Runs several times longer than the liveness timeout, but
            // heartbeats often enough to stay alive.
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.update_liveness()
                    .await
                    .map_err(|e| taskmill::TaskError::failed(e.to_string()))?;
            }
            Ok(())
        }))
        .unwrap();

    scheduler
        .submit(
            TaskSpec::new("t1", "heartbeater", "p")
                .with_liveness_timeout(Duration::from_millis(120)),
        )
        .await
        .unwrap();
    let record = wait_for_phase(&scheduler, "t1", TaskPhase::Succeed, Duration::from_secs(5)).await;
    assert!(record.last_liveness_at.is_some());

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn tasks_without_a_liveness_timeout_are_never_reaped() {
    let scheduler = memory_scheduler().await;
    scheduler
        .register_worker_pool(WorkerPoolSpec::new("p", 2, 8))
        .unwrap();
    register_stock_executors(&scheduler);

    // Parked with no heartbeat and no timeout: stays Processing.
    scheduler
        .submit(TaskSpec::new("t1", "parked", "p"))
        .await
        .unwrap();
    wait_for_phase(&scheduler, "t1", TaskPhase::Processing, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = scheduler.task_context("t1").await.unwrap().record();
    assert_eq!(record.phase, TaskPhase::Processing);

    scheduler.shutdown(Duration::from_millis(500)).await.unwrap();
}
