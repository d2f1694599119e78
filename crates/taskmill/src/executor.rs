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

//! Executor traits and the command registry.
//!
//! A command is the key under which an [`ExecutorFactory`] is registered.
//! The dispatcher resolves the factory at launch time and asks it for a
//! fresh, stateless [`TaskExecutor`] per task. Unknown commands fail the
//! task deterministically instead of crashing the scheduler.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{SchedulerError, TaskError};
use crate::scheduler::TaskContext;

/// The callable invoked by the scheduler to do a task's actual work.
///
/// Executors cooperate through the [`TaskContext`]: they poll
/// `graceful_shutdown`, heartbeat with `update_liveness`, and report
/// progress with `update_status`. The scheduler never interrupts a body
/// outside those checkpoints except when the cancellation grace elapses.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs the task body to completion.
    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError>;
}

/// Produces executors for one command.
pub trait ExecutorFactory: Send + Sync {
    /// The command this factory serves.
    fn id(&self) -> &str;

    /// Creates a fresh executor for one task run.
    fn create_executor(&self) -> Arc<dyn TaskExecutor>;
}

type ExecutorFn = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

struct FnExecutor {
    f: ExecutorFn,
}

#[async_trait]
impl TaskExecutor for FnExecutor {
    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}

struct FnExecutorFactory {
    id: String,
    f: ExecutorFn,
}

impl ExecutorFactory for FnExecutorFactory {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(FnExecutor { f: self.f.clone() })
    }
}

/// Wraps a plain async closure as an [`ExecutorFactory`].
///
/// # Example
///
/// ```rust,ignore
/// let factory = new_executor_factory("collect-logs", |ctx| async move {
///     ctx.update_liveness().await.map_err(|e| TaskError::failed(e.to_string()))?;
///     Ok(())
/// });
/// scheduler.register_executor_factory(factory)?;
/// ```
pub fn new_executor_factory<F, Fut>(
    command: impl Into<String>,
    f: F,
) -> Arc<dyn ExecutorFactory>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(FnExecutorFactory {
        id: command.into(),
        f: Arc::new(move |ctx| Box::pin(f(ctx))),
    })
}

/// Instance-scoped mapping from command name to executor factory.
///
/// Each scheduler owns one registry; tests construct isolated instances
/// instead of sharing process-global state.
pub(crate) struct ExecutorRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ExecutorFactory>>>,
}

impl ExecutorRegistry {
    pub(crate) fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Indexes `factory.id() -> factory`. Duplicate commands are rejected.
    pub(crate) fn register(
        &self,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Result<(), SchedulerError> {
        let id = factory.id().to_string();
        if id.is_empty() {
            return Err(SchedulerError::InvalidSpec(
                "executor factory id must not be empty".to_string(),
            ));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(&id) {
            return Err(SchedulerError::CommandAlreadyRegistered(id));
        }
        tracing::debug!(command = %id, "registered executor factory");
        factories.insert(id, factory);
        Ok(())
    }

    pub(crate) fn get(&self, command: &str) -> Option<Arc<dyn ExecutorFactory>> {
        self.factories.read().get(command).cloned()
    }

    pub(crate) fn contains(&self, command: &str) -> bool {
        self.factories.read().contains_key(command)
    }
}
