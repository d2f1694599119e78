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

//! Sub-task selection for master executors.
//!
//! A master that fans work out as sub-tasks typically walks them one at a
//! time: pick a child, wait on it, pick the next. [`SubTaskSelector`] keeps
//! the walk stable by remembering every id it has handed out, so a child is
//! returned at most once per selector even if it is still running on the
//! next call.

use std::collections::HashSet;
use std::sync::Arc;

use super::core::SchedulerCore;
use crate::error::SchedulerError;
use crate::task::{TaskPhase, TaskRecord};

/// Which children a [`SubTaskSelector`] considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMode {
    /// Only children currently `Processing`.
    Processing,
    /// Children in any non-terminal phase, `Waiting` included.
    NonTerminal,
}

/// Stateful iterator over one master's sub-tasks.
///
/// Each call to [`select`](Self::select) re-reads the children from the
/// store, so sub-tasks submitted after the selector was created are picked
/// up. Selection order is submission order.
pub struct SubTaskSelector {
    core: Arc<SchedulerCore>,
    master_id: String,
    mode: SelectorMode,
    seen: HashSet<String>,
}

impl SubTaskSelector {
    pub(crate) fn new(core: Arc<SchedulerCore>, master_id: String, mode: SelectorMode) -> Self {
        Self {
            core,
            master_id,
            mode,
            seen: HashSet::new(),
        }
    }

    /// Returns the next matching sub-task not yet handed out.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NoRunningSubTask`] when every matching child has
    /// already been selected (or none exists yet).
    pub async fn select(&mut self) -> Result<TaskRecord, SchedulerError> {
        let children = self.core.store.list_children(&self.master_id).await?;
        for child in children {
            if self.seen.contains(&child.spec.id) {
                continue;
            }
            let matches = match self.mode {
                SelectorMode::Processing => child.phase == TaskPhase::Processing,
                SelectorMode::NonTerminal => !child.phase.is_terminal(),
            };
            if matches {
                self.seen.insert(child.spec.id.clone());
                return Ok(child);
            }
        }
        Err(SchedulerError::NoRunningSubTask)
    }
}
