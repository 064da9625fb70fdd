// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tracks every query from submission to its terminal state and owns the
//! per-query cancellation token. Only `Running` queries can complete,
//! fail or be cancelled; anything else is an illegal transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common_telemetry::info;
use dashmap::DashMap;
use sql::dialect::Dialect;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "Pending",
            QueryStatus::Running => "Running",
            QueryStatus::Completed => "Completed",
            QueryStatus::Failed => "Failed",
            QueryStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Completed | QueryStatus::Failed | QueryStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub id: Uuid,
    pub sql: String,
    pub source_dialect: Dialect,
    pub status: QueryStatus,
    pub target_sources: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub row_count: Option<u64>,
    pub error: Option<String>,
}

struct Entry {
    record: QueryRecord,
    token: CancellationToken,
}

/// The process-wide lifecycle table.
#[derive(Default)]
pub struct QueryLifecycle {
    queries: DashMap<Uuid, Entry>,
}

pub type QueryLifecycleRef = Arc<QueryLifecycle>;

impl QueryLifecycle {
    pub fn new() -> QueryLifecycleRef {
        Arc::new(Self::default())
    }

    /// Register a new query as `Pending`; returns its id and the token
    /// that cancels it.
    pub fn register(&self, sql: &str, dialect: Dialect) -> (Uuid, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.queries.insert(
            id,
            Entry {
                record: QueryRecord {
                    id,
                    sql: sql.to_string(),
                    source_dialect: dialect,
                    status: QueryStatus::Pending,
                    target_sources: Vec::new(),
                    submitted_at: Utc::now(),
                    started_at: None,
                    ended_at: None,
                    row_count: None,
                    error: None,
                },
                token: token.clone(),
            },
        );
        (id, token)
    }

    pub fn set_target_sources(&self, id: Uuid, sources: Vec<String>) {
        if let Some(mut entry) = self.queries.get_mut(&id) {
            entry.record.target_sources = sources;
        }
    }

    pub fn start(&self, id: Uuid) -> Result<()> {
        self.transition(id, QueryStatus::Pending, QueryStatus::Running, |record| {
            record.started_at = Some(Utc::now());
        })
    }

    pub fn complete(&self, id: Uuid, row_count: u64) -> Result<()> {
        self.transition(id, QueryStatus::Running, QueryStatus::Completed, |record| {
            record.ended_at = Some(Utc::now());
            record.row_count = Some(row_count);
        })
    }

    pub fn fail(&self, id: Uuid, message: &str) -> Result<()> {
        let message = message.to_string();
        self.transition(id, QueryStatus::Running, QueryStatus::Failed, move |record| {
            record.ended_at = Some(Utc::now());
            record.error = Some(message);
        })
    }

    /// Cancel a running query: flips the status and fires the token so
    /// operators and stage producers unwind cooperatively.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        self.transition(id, QueryStatus::Running, QueryStatus::Cancelled, |record| {
            record.ended_at = Some(Utc::now());
        })?;
        if let Some(entry) = self.queries.get(&id) {
            entry.token.cancel();
        }
        info!("query {id} cancelled");
        Ok(())
    }

    /// Mark a cancellation that already happened (timeout path), without
    /// failing when the query has since reached a terminal state.
    pub fn cancel_if_running(&self, id: Uuid) {
        let _ = self.cancel(id);
    }

    pub fn get(&self, id: Uuid) -> Result<QueryRecord> {
        self.queries
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| {
                error::QueryNotFoundSnafu {
                    query_id: id.to_string(),
                }
                .build()
            })
    }

    pub fn token(&self, id: Uuid) -> Option<CancellationToken> {
        self.queries.get(&id).map(|entry| entry.token.clone())
    }

    /// Drop finished queries from the table; returns how many were
    /// removed. Called periodically by the server.
    pub fn evict_finished(&self) -> usize {
        let doomed: Vec<Uuid> = self
            .queries
            .iter()
            .filter(|entry| entry.record.status.is_terminal())
            .map(|entry| entry.record.id)
            .collect();
        for id in &doomed {
            self.queries.remove(id);
        }
        doomed.len()
    }

    fn transition<F>(
        &self,
        id: Uuid,
        expected: QueryStatus,
        next: QueryStatus,
        apply: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut QueryRecord),
    {
        let mut entry = self.queries.get_mut(&id).ok_or_else(|| {
            error::QueryNotFoundSnafu {
                query_id: id.to_string(),
            }
            .build()
        })?;
        if entry.record.status != expected {
            return error::IllegalTransitionSnafu {
                query_id: id.to_string(),
                from: entry.record.status.as_str(),
                to: next.as_str(),
            }
            .fail();
        }
        entry.record.status = next;
        apply(&mut entry.record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = QueryLifecycle::new();
        let (id, _token) = lifecycle.register("SELECT 1", Dialect::Standard);
        assert_eq!(QueryStatus::Pending, lifecycle.get(id).unwrap().status);

        lifecycle.start(id).unwrap();
        assert_eq!(QueryStatus::Running, lifecycle.get(id).unwrap().status);

        lifecycle.complete(id, 42).unwrap();
        let record = lifecycle.get(id).unwrap();
        assert_eq!(QueryStatus::Completed, record.status);
        assert_eq!(Some(42), record.row_count);
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn test_illegal_transitions() {
        let lifecycle = QueryLifecycle::new();
        let (id, _) = lifecycle.register("SELECT 1", Dialect::Standard);

        // Pending cannot complete, fail or cancel.
        assert!(lifecycle.complete(id, 0).is_err());
        assert!(lifecycle.fail(id, "boom").is_err());
        assert!(lifecycle.cancel(id).is_err());

        lifecycle.start(id).unwrap();
        lifecycle.complete(id, 0).unwrap();
        // Terminal states accept nothing further.
        assert!(lifecycle.start(id).is_err());
        assert!(lifecycle.cancel(id).is_err());
    }

    #[test]
    fn test_cancel_fires_token() {
        let lifecycle = QueryLifecycle::new();
        let (id, token) = lifecycle.register("SELECT 1", Dialect::Standard);
        lifecycle.start(id).unwrap();
        lifecycle.cancel(id).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(QueryStatus::Cancelled, lifecycle.get(id).unwrap().status);
    }
}
