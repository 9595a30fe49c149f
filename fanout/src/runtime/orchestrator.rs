use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::WorkerPool;
use crate::protocol::ResultSet;
use crate::task::TaskReference;
use crate::telemetry;

use super::builder::OrchestratorBuilder;

/// Pool id used by [`Orchestrator::single`].
pub const DEFAULT_POOL_ID: &str = "default";

/// One entry of a [`RunRequest::Named`] request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedRequest {
    /// Id of the pool to dispatch to.
    pub id: String,
    pub batch: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NamedRequest {
    pub fn new(id: impl Into<String>, batch: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            batch,
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Work submitted to an [`Orchestrator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRequest {
    /// A batch for the orchestrator's only pool.
    Single {
        batch: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// Batches addressed to pools by id, dispatched concurrently.
    Named(Vec<NamedRequest>),
}

impl RunRequest {
    pub fn single(batch: Vec<Value>, params: Option<Value>) -> Self {
        RunRequest::Single { batch, params }
    }
}

/// Results of a [`RunRequest`], shaped like the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResponse {
    Single(ResultSet),
    /// One result set per named request, in request order.
    Named(Vec<ResultSet>),
}

impl RunResponse {
    pub fn into_single(self) -> Option<ResultSet> {
        match self {
            RunResponse::Single(results) => Some(results),
            RunResponse::Named(_) => None,
        }
    }

    pub fn into_named(self) -> Option<Vec<ResultSet>> {
        match self {
            RunResponse::Named(results) => Some(results),
            RunResponse::Single(_) => None,
        }
    }
}

/// Routes batches to a set of independently configured pools by id.
///
/// Pools are kept in construction order. A torn-down pool keeps its entry,
/// and further dispatches to it fail with [`PoolError::Closed`], until
/// [`Orchestrator::remove_pool`] drops it.
pub struct Orchestrator {
    pools: Vec<(String, Arc<dyn WorkerPool>)>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools: Vec<String> = self
            .pools
            .iter()
            .map(|(id, pool)| format!("{id} ({} x{})", pool.kind(), pool.worker_count()))
            .collect();
        f.debug_struct("Orchestrator").field("pools", &pools).finish()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build an orchestrator with one pool under [`DEFAULT_POOL_ID`].
    pub async fn single(config: PoolConfig, task: TaskReference) -> Result<Self, PoolError> {
        OrchestratorBuilder::new()
            .pool(DEFAULT_POOL_ID, config, task)
            .build()
            .await
    }

    pub(crate) fn from_pools(pools: Vec<(String, Arc<dyn WorkerPool>)>) -> Self {
        Self { pools }
    }

    /// Ids of all pools, in construction order.
    pub fn pool_ids(&self) -> Vec<&str> {
        self.pools.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn pool(&self, id: &str) -> Option<Arc<dyn WorkerPool>> {
        self.pools
            .iter()
            .find(|(pool_id, _)| pool_id == id)
            .map(|(_, pool)| pool.clone())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Dispatch a request and wait for every involved pool to settle.
    ///
    /// Named requests are validated up front: an unknown id fails the whole
    /// request before anything is dispatched.
    pub async fn run(&self, request: RunRequest) -> Result<RunResponse, PoolError> {
        match request {
            RunRequest::Single { batch, params } => {
                let pool = match self.pools.as_slice() {
                    [(_, pool)] => pool.clone(),
                    [] => {
                        return Err(PoolError::InvalidRequest(
                            "no pools are registered".to_string(),
                        ))
                    }
                    pools => {
                        return Err(PoolError::InvalidRequest(format!(
                            "single-batch request is ambiguous across {} pools; address them by id",
                            pools.len()
                        )))
                    }
                };
                let results = pool
                    .dispatch(batch, params)
                    .instrument(telemetry::run_span(1))
                    .await?;
                Ok(RunResponse::Single(results))
            }
            RunRequest::Named(requests) => {
                let resolved = requests
                    .into_iter()
                    .map(|request| match self.pool(&request.id) {
                        Some(pool) => Ok((pool, request)),
                        None => Err(PoolError::UnknownPool(request.id)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                let span = telemetry::run_span(resolved.len());
                let dispatches = resolved.into_iter().map(|(pool, request)| async move {
                    pool.dispatch(request.batch, request.params).await
                });
                let results = join_all(dispatches)
                    .instrument(span)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RunResponse::Named(results))
            }
        }
    }

    /// Dispatch one batch to the only pool.
    pub async fn run_batch(
        &self,
        batch: Vec<Value>,
        params: Option<Value>,
    ) -> Result<ResultSet, PoolError> {
        match self.run(RunRequest::Single { batch, params }).await? {
            RunResponse::Single(results) => Ok(results),
            RunResponse::Named(_) => Err(PoolError::InvalidRequest(
                "single-batch request produced named results".to_string(),
            )),
        }
    }

    /// Dispatch batches to pools by id; results come back in request order.
    pub async fn run_named(
        &self,
        requests: Vec<NamedRequest>,
    ) -> Result<Vec<ResultSet>, PoolError> {
        match self.run(RunRequest::Named(requests)).await? {
            RunResponse::Named(results) => Ok(results),
            RunResponse::Single(_) => Err(PoolError::InvalidRequest(
                "named request produced a single result".to_string(),
            )),
        }
    }

    /// Tear down the listed pools, or every pool when `ids` is `None`.
    ///
    /// Ids that match no pool are ignored. Entries stay registered.
    pub async fn teardown(&self, ids: Option<&[&str]>) {
        let selected = self.pools.iter().filter(|(id, _)| match ids {
            Some(ids) => ids.contains(&id.as_str()),
            None => true,
        });
        join_all(selected.map(|(_, pool)| pool.teardown())).await;
    }

    /// Tear down and unregister a pool.
    pub async fn remove_pool(&mut self, id: &str) -> Option<Arc<dyn WorkerPool>> {
        let position = self.pools.iter().position(|(pool_id, _)| pool_id == id)?;
        let (_, pool) = self.pools.remove(position);
        pool.teardown().await;
        tracing::debug!(pool_id = id, "pool removed");
        Some(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_request_wire_format() {
        let request: RunRequest = serde_json::from_value(json!({
            "named": [
                {"id": "a", "batch": [1, 2]},
                {"id": "b", "batch": [], "params": {"x": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(
            request,
            RunRequest::Named(vec![
                NamedRequest::new("a", vec![json!(1), json!(2)]),
                NamedRequest::new("b", vec![]).with_params(json!({"x": 1})),
            ])
        );

        let single: RunRequest =
            serde_json::from_value(json!({"single": {"batch": [3]}})).unwrap();
        assert_eq!(single, RunRequest::single(vec![json!(3)], None));
    }

    #[test]
    fn test_response_accessors() {
        let single = RunResponse::Single(ResultSet::new());
        assert!(single.clone().into_named().is_none());
        assert_eq!(single.into_single(), Some(ResultSet::new()));
    }
}
