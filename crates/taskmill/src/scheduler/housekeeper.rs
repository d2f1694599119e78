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

//! Background maintenance: liveness monitoring, recovery resolution, and
//! history pruning.
//!
//! The liveness scan runs on its own loop; recovery resolution and history
//! pruning are invoked from the dispatcher's tick so they interleave with
//! dispatch instead of racing it.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::core::SchedulerCore;
use crate::error::SchedulerError;
use crate::task::TaskPhase;

pub(crate) async fn run(core: Arc<SchedulerCore>) {
    tracing::debug!("housekeeper started");
    loop {
        tokio::time::sleep(core.config.liveness_scan_interval()).await;
        if core.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        scan_liveness(&core).await;
    }
    tracing::debug!("housekeeper stopped");
}

/// Fails every `Processing` task whose heartbeat silence exceeds its
/// liveness timeout.
///
/// The terminal phase is published before the body is signalled, so the
/// failure is observable immediately; the supervisor then joins or aborts
/// the stuck body and returns the pool slot.
pub(crate) async fn scan_liveness(core: &Arc<SchedulerCore>) {
    let now = Utc::now();
    let entries: Vec<_> = core.tasks.read().values().cloned().collect();
    for entry in entries {
        let Some(timeout) = entry.spec.liveness_timeout else {
            continue;
        };
        let expired = {
            let state = entry.state.lock();
            state.phase == TaskPhase::Processing
                && state.last_liveness_at.is_some_and(|at| {
                    (now - at).to_std().is_ok_and(|silence| silence > timeout)
                })
        };
        if expired {
            tracing::warn!(task = %entry.id(), timeout_ms = timeout.as_millis() as u64, "liveness timeout");
            core.publish_terminal(
                &entry,
                TaskPhase::Failed,
                Some("liveness timeout".to_string()),
                None,
            )
            .await;
            entry.request_cancel();
        }
    }
}

/// Requeues recovered tasks whose pool and command have been re-registered;
/// fails the ones still unresolved once the recovery grace has passed.
pub(crate) async fn resolve_recovery(core: &Arc<SchedulerCore>) {
    let pending: Vec<String> = {
        let set = core.pending_recovery.lock();
        if set.is_empty() {
            return;
        }
        set.iter().cloned().collect()
    };
    let grace_over = core.started_at.elapsed() > core.config.recovery_grace();

    for id in pending {
        let entry = core.tasks.read().get(&id).cloned();
        let Some(entry) = entry else {
            core.pending_recovery.lock().remove(&id);
            continue;
        };
        if entry.phase().is_terminal() {
            core.pending_recovery.lock().remove(&id);
            continue;
        }

        let resolvable =
            core.pools.contains(&entry.spec.pool) && core.executors.contains(&entry.spec.command);
        if resolvable {
            match core.pools.admit(&entry.spec.pool, &id) {
                Ok(()) => {
                    core.pending_recovery.lock().remove(&id);
                    tracing::info!(task = %id, "recovered task requeued");
                }
                // Capacity taken by fresh submissions; try again next tick.
                Err(SchedulerError::PoolFull(_)) => {}
                Err(e) => {
                    core.pending_recovery.lock().remove(&id);
                    core.publish_terminal(
                        &entry,
                        TaskPhase::Failed,
                        Some(format!("recovery failed: {e}")),
                        None,
                    )
                    .await;
                }
            }
        } else if grace_over {
            core.pending_recovery.lock().remove(&id);
            core.publish_terminal(
                &entry,
                TaskPhase::Failed,
                Some("unresolved after restart".to_string()),
                None,
            )
            .await;
        }
    }
}

/// Deletes the oldest terminal masters beyond the history cap, each with
/// its children, children first. A master with a still-live child is
/// skipped until the child finishes.
pub(crate) async fn prune_history(core: &Arc<SchedulerCore>) {
    let masters = match core.store.list_terminal_masters().await {
        Ok(masters) => masters,
        Err(e) => {
            tracing::error!(error = %e, "history listing failed");
            return;
        }
    };
    let cap = core.config.max_history_master_tasks();
    if masters.len() <= cap {
        return;
    }
    let excess = masters.len() - cap;

    let mut pruned = 0;
    for master in masters {
        if pruned >= excess {
            break;
        }
        let children = match core.store.list_children(&master.spec.id).await {
            Ok(children) => children,
            Err(e) => {
                tracing::error!(task = %master.spec.id, error = %e, "child listing failed");
                continue;
            }
        };
        if children.iter().any(|c| !c.phase.is_terminal()) {
            continue;
        }

        let mut deleted_children = true;
        for child in &children {
            if let Err(e) = core.store.delete(&child.spec.id).await {
                tracing::error!(task = %child.spec.id, error = %e, "history delete failed");
                deleted_children = false;
                break;
            }
            core.tasks.write().remove(&child.spec.id);
        }
        if !deleted_children {
            continue;
        }
        if let Err(e) = core.store.delete(&master.spec.id).await {
            tracing::error!(task = %master.spec.id, error = %e, "history delete failed");
            continue;
        }
        core.tasks.write().remove(&master.spec.id);
        pruned += 1;
        tracing::debug!(task = %master.spec.id, "pruned history master");
    }
}
