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

//! Diesel schema for the SQLite task store.
//!
//! Timestamps are RFC 3339 TEXT; payloads and status details are BLOB JSON.

diesel::table! {
    tasks (id) {
        id -> Text,
        parent_id -> Text,
        command -> Text,
        pool -> Text,
        payload -> Nullable<Binary>,
        phase -> Text,
        created_at -> Text,
        started_at -> Nullable<Text>,
        finished_at -> Nullable<Text>,
        last_liveness_at -> Nullable<Text>,
        status_detail -> Nullable<Binary>,
        failure_reason -> Nullable<Text>,
        liveness_timeout_ms -> Nullable<BigInt>,
        graceful_shutdown_timeout_ms -> Nullable<BigInt>,
    }
}
