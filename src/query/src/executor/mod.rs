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

//! The federated executor. Pushdown stages fan out through a bounded
//! worker pool into bounded channels; the federation operator pipeline
//! pulls from the per-stage streams single-threaded. Retryable source
//! errors back off and retry per stage; any other failure cancels the
//! remaining stages and fails the query.

pub mod eval;
pub mod operators;
pub mod quota;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use catalog::CatalogState;
use common_error::prelude::ErrorExt;
use common_rows::{Row, SendableRowStream};
use common_telemetry::{debug, warn};
use connectors::ConnectorRegistryRef;
use futures::StreamExt;
use rand::Rng;
use snafu::IntoError;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{self, Result};
use crate::executor::quota::RowQuota;
use crate::physical::{ExecutionPlan, ExecutionStage};

/// Tunables for stage dispatch, all overridable from configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent_stages: usize,
    pub query_timeout: Duration,
    pub fetch_size: usize,
    pub max_retries: u32,
    pub retry_initial_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 10,
            query_timeout: Duration::from_secs(300),
            fetch_size: 1_000,
            max_retries: 3,
            retry_initial_delay: Duration::from_millis(100),
        }
    }
}

/// Per-query execution state shared between the operator pipeline and
/// whoever drains the result: truncation, warnings, retry accounting.
#[derive(Debug)]
pub struct ExecutionContext {
    pub query_id: Uuid,
    truncated: AtomicBool,
    warning: Mutex<Option<String>>,
    retry_count: AtomicU32,
    rows_returned: AtomicU64,
}

impl ExecutionContext {
    pub fn new(query_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            query_id,
            truncated: AtomicBool::new(false),
            warning: Mutex::new(None),
            retry_count: AtomicU32::new(0),
            rows_returned: AtomicU64::new(0),
        })
    }

    pub fn mark_truncated(&self, limit: usize) {
        self.truncated.store(true, Ordering::Release);
        let mut warning = self.warning.lock().unwrap();
        if warning.is_none() {
            *warning = Some(format!(
                "intermediate result limit of {limit} rows reached; results truncated"
            ));
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::Acquire)
    }

    pub fn warning(&self) -> Option<String> {
        self.warning.lock().unwrap().clone()
    }

    pub fn add_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn count_row(&self) {
        self.rows_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_returned(&self) -> u64 {
        self.rows_returned.load(Ordering::Relaxed)
    }
}

pub struct FederatedExecutor {
    registry: ConnectorRegistryRef,
    config: ExecutorConfig,
}

impl FederatedExecutor {
    pub fn new(registry: ConnectorRegistryRef, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a staged plan: dispatch every pushdown stage, assemble the
    /// federation pipeline, and hand back the result stream. The stream
    /// observes `token` and terminates on cancellation.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        catalog: Arc<CatalogState>,
        token: CancellationToken,
        ctx: Arc<ExecutionContext>,
    ) -> Result<SendableRowStream> {
        let quota = RowQuota::new(plan.intermediate_result_limit);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_stages));

        let mut stage_streams: HashMap<usize, SendableRowStream> = HashMap::new();
        for stage in &plan.stages {
            let (sender, stream) =
                common_rows::ChannelRowStream::new(stage.schema.clone(), self.config.fetch_size);
            stage_streams.insert(stage.id, Box::pin(stream));

            let task = StageTask {
                stage: stage.clone(),
                catalog: catalog.clone(),
                registry: self.registry.clone(),
                config: self.config.clone(),
                token: token.clone(),
                ctx: ctx.clone(),
                sender,
            };
            let permit_source = semaphore.clone();
            tokio::spawn(async move {
                let _permit = match permit_source.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                task.run().await;
            });
        }

        // The quota bounds rows entering the federation pipeline. A plan
        // that is one pushed sub-query streams straight through and
        // materializes nothing.
        let apply_quota = !plan.is_single_pushdown();
        let quota_opt = apply_quota.then_some(&quota);
        operators::build_operator(&plan.root, &mut stage_streams, quota_opt, &token, &ctx)
    }
}

/// One pushdown sub-query in flight.
struct StageTask {
    stage: ExecutionStage,
    catalog: Arc<CatalogState>,
    registry: ConnectorRegistryRef,
    config: ExecutorConfig,
    token: CancellationToken,
    ctx: Arc<ExecutionContext>,
    sender: tokio::sync::mpsc::Sender<common_rows::error::Result<Row>>,
}

impl StageTask {
    async fn run(self) {
        let stage_id = self.stage.id;
        match self.dispatch().await {
            Ok(()) => debug!(
                "query {} stage {} completed",
                self.ctx.query_id, stage_id
            ),
            Err(e) => {
                warn!(
                    "query {} stage {} failed: {}",
                    self.ctx.query_id, stage_id, e
                );
                let _ = self
                    .sender
                    .send(Err(common_rows::error::Error::external(e)))
                    .await;
                // Any stage failure takes the whole query down.
                self.token.cancel();
            }
        }
    }

    async fn dispatch(&self) -> Result<()> {
        let mut stream = self.open_with_retry().await?;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            let Some(row) = next else { break };
            let row = row.map_err(|e| {
                error::ExecutionSnafu {
                    detail: format!(
                        "stage {} on source {} failed mid-stream: {e}",
                        self.stage.id, self.stage.source_name
                    ),
                }
                .build()
            })?;
            // Bounded channel: blocks here until the consumer drains.
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                sent = self.sender.send(Ok(row)) => {
                    if sent.is_err() {
                        // Consumer dropped the stream; stop producing.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Session acquisition and query start, with exponential backoff for
    /// retryable source errors. A stage is attempted at most
    /// `1 + max_retries` times.
    async fn open_with_retry(&self) -> Result<SendableRowStream> {
        let source = self
            .catalog
            .data_source_by_id(&self.stage.source_id)
            .ok_or_else(|| {
                error::DataSourceNotFoundSnafu {
                    name: self.stage.source_name.clone(),
                }
                .build()
            })?
            .clone();
        let connector = self.registry.get(self.stage.source_kind).ok_or_else(|| {
            error::DataSourceNotFoundSnafu {
                name: format!("connector for {}", self.stage.source_kind),
            }
            .build()
        })?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = async {
                let session = connector
                    .acquire(&source)
                    .await
                    .map_err(|e| (e.status_code().is_retryable(), e))?;
                session
                    .execute_query(&self.stage.sql)
                    .await
                    .map_err(|e| (e.status_code().is_retryable(), e))
            }
            .await;

            match result {
                Ok(stream) => return Ok(stream),
                Err((retryable, source_error)) => {
                    let attempts_left = self.config.max_retries + 1 - attempt;
                    if !retryable || attempts_left == 0 || self.token.is_cancelled() {
                        return Err(error::StageFailedSnafu {
                            stage: self.stage.id,
                            attempts: attempt,
                        }
                        .into_error(source_error));
                    }
                    self.ctx.add_retry();
                    let backoff = self.backoff_delay(attempt);
                    debug!(
                        "query {} stage {} attempt {} failed ({}); retrying in {:?}",
                        self.ctx.query_id, self.stage.id, attempt, source_error, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Initial delay, doubled per attempt, with up to 50% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_initial_delay * 2u32.saturating_pow(attempt - 1);
        let jitter = rand::thread_rng().gen_range(0.0..0.5);
        base.mul_f64(1.0 + jitter)
    }
}

/// Re-exported for the engine layer.
pub use self::quota::RowQuotaRef;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let task_config = ExecutorConfig::default();
        let base = task_config.retry_initial_delay;
        // Without jitter the series is 100ms, 200ms, 400ms.
        assert_eq!(base * 2, base * 2u32.saturating_pow(1));
        assert_eq!(base * 4, base * 2u32.saturating_pow(2));
    }
}
