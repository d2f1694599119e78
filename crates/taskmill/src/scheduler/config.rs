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

//! Scheduler configuration.
//!
//! This module contains the configuration struct and builder that control
//! admission limits, loop intervals, and grace windows.

use std::time::Duration;

/// Configuration for a scheduler instance.
///
/// # Construction
///
/// Use [`SchedulerConfig::builder()`] to create a configuration:
///
/// ```rust,ignore
/// let config = SchedulerConfig::builder()
///     .max_active_tasks(256)
///     .dispatch_interval(Duration::from_millis(50))
///     .build();
/// ```
///
/// Or use the default configuration:
///
/// ```rust,ignore
/// let config = SchedulerConfig::default();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SchedulerConfig {
    max_history_master_tasks: usize,
    max_active_tasks: usize,
    allowed_max_tasks_in_db: i64,
    dispatch_interval: Duration,
    liveness_scan_interval: Duration,
    cancel_grace: Duration,
    recovery_grace: Duration,
    prune_every_n_ticks: u64,
}

impl SchedulerConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Cap on retained terminal master tasks in history.
    pub fn max_history_master_tasks(&self) -> usize {
        self.max_history_master_tasks
    }

    /// Cap on total non-terminal tasks held in memory.
    pub fn max_active_tasks(&self) -> usize {
        self.max_active_tasks
    }

    /// Cap on total rows in the backing store, any phase.
    pub fn allowed_max_tasks_in_db(&self) -> i64 {
        self.allowed_max_tasks_in_db
    }

    /// Dispatcher wake period.
    pub fn dispatch_interval(&self) -> Duration {
        self.dispatch_interval
    }

    /// How often liveness timeouts are checked.
    pub fn liveness_scan_interval(&self) -> Duration {
        self.liveness_scan_interval
    }

    /// How long a cancelled executor may keep running before it is aborted,
    /// unless the task spec overrides it.
    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    /// Window after startup during which recovered tasks may wait for their
    /// pool and command to be re-registered before they are failed.
    pub fn recovery_grace(&self) -> Duration {
        self.recovery_grace
    }

    /// History pruning runs every this many dispatcher ticks.
    pub fn prune_every_n_ticks(&self) -> u64 {
        self.prune_every_n_ticks
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfigBuilder::default().build()
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self {
            config: SchedulerConfig {
                max_history_master_tasks: 100,
                max_active_tasks: 1024,
                allowed_max_tasks_in_db: 4096,
                dispatch_interval: Duration::from_millis(50),
                liveness_scan_interval: Duration::from_millis(100),
                cancel_grace: Duration::from_secs(5),
                recovery_grace: Duration::from_secs(5),
                prune_every_n_ticks: 20,
            },
        }
    }
}

impl SchedulerConfigBuilder {
    /// Sets the cap on retained terminal master tasks.
    pub fn max_history_master_tasks(mut self, value: usize) -> Self {
        self.config.max_history_master_tasks = value;
        self
    }

    /// Sets the cap on non-terminal tasks in memory.
    pub fn max_active_tasks(mut self, value: usize) -> Self {
        self.config.max_active_tasks = value.max(1);
        self
    }

    /// Sets the cap on total store rows.
    pub fn allowed_max_tasks_in_db(mut self, value: i64) -> Self {
        self.config.allowed_max_tasks_in_db = value.max(1);
        self
    }

    /// Sets the dispatcher wake period.
    pub fn dispatch_interval(mut self, value: Duration) -> Self {
        self.config.dispatch_interval = value;
        self
    }

    /// Sets the liveness scan period.
    pub fn liveness_scan_interval(mut self, value: Duration) -> Self {
        self.config.liveness_scan_interval = value;
        self
    }

    /// Sets the default cancellation grace window.
    pub fn cancel_grace(mut self, value: Duration) -> Self {
        self.config.cancel_grace = value;
        self
    }

    /// Sets the post-restart recovery window.
    pub fn recovery_grace(mut self, value: Duration) -> Self {
        self.config.recovery_grace = value;
        self
    }

    /// Sets how many dispatcher ticks pass between pruning runs.
    pub fn prune_every_n_ticks(mut self, value: u64) -> Self {
        self.config.prune_every_n_ticks = value.max(1);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}
