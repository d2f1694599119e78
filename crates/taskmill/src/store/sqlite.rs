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

//! Diesel-backed SQLite task store.
//!
//! Connections come from a `deadpool-diesel` pool and all queries run inside
//! `interact` closures on the pool's blocking threads. The schema is managed
//! by embedded migrations, applied on connect, so a fresh database file is
//! usable immediately and an existing one is upgraded in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_diesel::sqlite::{Manager, Pool, Runtime};
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use super::models::{TaskRow, TransitionRow};
use super::schema::tasks;
use super::{PhaseTransition, TaskStore};
use crate::error::StoreError;
use crate::task::{TaskPhase, TaskRecord};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Default connection pool size.
const DEFAULT_POOL_SIZE: usize = 4;

/// SQLite-backed [`TaskStore`].
pub struct SqliteTaskStore {
    pool: Pool,
}

fn pool_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Pool(e.to_string())
}

fn query_err(e: diesel::result::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

impl SqliteTaskStore {
    /// Opens (or creates) the database at `database_path` and applies any
    /// pending migrations.
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        Self::connect_with_pool_size(database_path, DEFAULT_POOL_SIZE).await
    }

    /// As [`connect`](Self::connect), with an explicit pool size.
    pub async fn connect_with_pool_size(
        database_path: &str,
        pool_size: usize,
    ) -> Result<Self, StoreError> {
        let manager = Manager::new(database_path, Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(pool_err)?;

        let conn = pool.get().await.map_err(pool_err)?;
        conn.interact(|conn| {
            diesel::sql_query("PRAGMA journal_mode = WAL;")
                .execute(conn)
                .map_err(query_err)?;
            diesel::sql_query("PRAGMA busy_timeout = 5000;")
                .execute(conn)
                .map_err(query_err)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(|e| StoreError::Migration(e.to_string()))
        })
        .await
        .map_err(pool_err)??;

        tracing::info!(path = %database_path, "sqlite task store ready");
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.pool.get().await.map_err(pool_err)?;
        conn.interact(f).await.map_err(pool_err)?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let row = TaskRow::from_record(record)?;
        self.with_conn(move |conn| {
            diesel::insert_into(tasks::table)
                .values(&row)
                .execute(conn)
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn update(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let row = TaskRow::from_record(record)?;
        self.with_conn(move |conn| {
            diesel::update(tasks::table.find(row.id.clone()))
                .set(&row)
                .execute(conn)
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn transition(&self, id: &str, change: PhaseTransition) -> Result<bool, StoreError> {
        let changeset = TransitionRow::from_change(id, &change)?;
        let id = id.to_string();
        self.with_conn(move |conn| {
            // A terminal row matches nothing, so it can never change again.
            let changed = conn
                .transaction::<usize, diesel::result::Error, _>(|conn| {
                    diesel::update(
                        tasks::table
                            .filter(tasks::id.eq(&id))
                            .filter(
                                tasks::phase
                                    .eq_any(TaskPhase::non_terminal_strs().iter().copied()),
                            ),
                    )
                    .set(&changeset)
                    .execute(conn)
                })
                .map_err(query_err)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn update_liveness(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let id = id.to_string();
        let at = at.to_rfc3339();
        self.with_conn(move |conn| {
            let changed = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(&id))
                    .filter(tasks::phase.eq_any(TaskPhase::non_terminal_strs().iter().copied())),
            )
            .set(tasks::last_liveness_at.eq(Some(at)))
            .execute(conn)
            .map_err(query_err)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn update_status_detail(
        &self,
        id: &str,
        detail: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let bytes = serde_json::to_vec(detail).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("unencodable JSON: {e}"),
        })?;
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(&id))
                    .filter(tasks::phase.eq_any(TaskPhase::non_terminal_strs().iter().copied())),
            )
            .set(tasks::status_detail.eq(Some(bytes)))
            .execute(conn)
            .map_err(query_err)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            diesel::delete(tasks::table.find(&id))
                .execute(conn)
                .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let id = id.to_string();
        let row: Option<TaskRow> = self
            .with_conn(move |conn| {
                tasks::table
                    .find(&id)
                    .first::<TaskRow>(conn)
                    .optional()
                    .map_err(query_err)
            })
            .await?;
        row.map(TaskRow::into_record).transpose()
    }

    async fn list_by_phase(&self, phases: &[TaskPhase]) -> Result<Vec<TaskRecord>, StoreError> {
        let phase_strs: Vec<String> = phases.iter().map(|p| p.as_str().to_string()).collect();
        let rows: Vec<TaskRow> = self
            .with_conn(move |conn| {
                tasks::table
                    .filter(tasks::phase.eq_any(&phase_strs))
                    .order(tasks::created_at.asc())
                    .load(conn)
                    .map_err(query_err)
            })
            .await?;
        rows.into_iter().map(TaskRow::into_record).collect()
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let parent_id = parent_id.to_string();
        let rows: Vec<TaskRow> = self
            .with_conn(move |conn| {
                tasks::table
                    .filter(tasks::parent_id.eq(&parent_id))
                    .order(tasks::created_at.asc())
                    .load(conn)
                    .map_err(query_err)
            })
            .await?;
        rows.into_iter().map(TaskRow::into_record).collect()
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            tasks::table
                .count()
                .get_result::<i64>(conn)
                .map_err(query_err)
        })
        .await
    }

    async fn list_terminal_masters(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rows: Vec<TaskRow> = self
            .with_conn(|conn| {
                tasks::table
                    .filter(tasks::parent_id.eq(""))
                    .filter(tasks::phase.eq_any(TaskPhase::terminal_strs().iter().copied()))
                    .order(tasks::finished_at.asc())
                    .load(conn)
                    .map_err(query_err)
            })
            .await?;
        rows.into_iter().map(TaskRow::into_record).collect()
    }
}
