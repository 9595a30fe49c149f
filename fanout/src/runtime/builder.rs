use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::{build_pool, WorkerPool};
use crate::task::{TaskReference, TaskRegistry};

use super::orchestrator::Orchestrator;

/// Builder for an [`Orchestrator`] with one or more pools.
///
/// Pools are constructed and configured by [`build`](Self::build), in the
/// order they were added. If any pool fails to configure, the ones already
/// brought up are torn down again before the error is returned.
///
/// # Example
///
/// ```ignore
/// use fanout::*;
///
/// let registry = TaskRegistry::new().register("resize", ResizeTask);
/// let orchestrator = OrchestratorBuilder::new()
///     .registry(registry)
///     .pool("images", PoolConfig::process().with_size(4), TaskReference::registered("resize"))
///     .pool("thumbs", PoolConfig::thread(), TaskReference::registered("resize"))
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    registry: Arc<TaskRegistry>,
    pools: Vec<PendingPool>,
}

enum PendingPool {
    Configured {
        id: String,
        config: PoolConfig,
        task: TaskReference,
    },
    Injected {
        id: String,
        pool: Box<dyn WorkerPool>,
    },
}

impl PendingPool {
    fn id(&self) -> &str {
        match self {
            PendingPool::Configured { id, .. } | PendingPool::Injected { id, .. } => id,
        }
    }
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.pools.iter().map(PendingPool::id).collect();
        f.debug_struct("OrchestratorBuilder")
            .field("registry", &self.registry)
            .field("pools", &ids)
            .finish()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry thread pools resolve registered task names in.
    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Add a pool built from `config` and bound to `task`.
    pub fn pool(mut self, id: impl Into<String>, config: PoolConfig, task: TaskReference) -> Self {
        self.pools.push(PendingPool::Configured {
            id: id.into(),
            config,
            task,
        });
        self
    }

    /// Add a pool constructed elsewhere. It is used as given, so it must
    /// already be configured.
    pub fn with_pool(mut self, id: impl Into<String>, pool: Box<dyn WorkerPool>) -> Self {
        self.pools.push(PendingPool::Injected {
            id: id.into(),
            pool,
        });
        self
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.pools.is_empty() {
            return Err(PoolError::Configuration(
                "orchestrator needs at least one pool".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for pending in &self.pools {
            let id = pending.id();
            if id.is_empty() {
                return Err(PoolError::Configuration("pool id must not be empty".to_string()));
            }
            if !seen.insert(id) {
                return Err(PoolError::Configuration(format!("duplicate pool id '{id}'")));
            }
        }
        Ok(())
    }

    /// Construct and configure every pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] for an empty pool list or a
    /// duplicate id, and otherwise the first error a pool reports while
    /// being constructed or configured.
    pub async fn build(self) -> Result<Orchestrator, PoolError> {
        self.validate()?;

        let mut pools: Vec<(String, Arc<dyn WorkerPool>)> = Vec::with_capacity(self.pools.len());
        for pending in self.pools {
            let entry: Result<(String, Arc<dyn WorkerPool>), PoolError> = match pending {
                PendingPool::Injected { id, pool } => Ok((id, Arc::from(pool))),
                PendingPool::Configured { id, config, task } => {
                    let result = bring_up(&id, config, task, self.registry.clone()).await;
                    result.map(|pool| (id, pool))
                }
            };
            match entry {
                Ok(entry) => pools.push(entry),
                Err(err) => {
                    tracing::error!(error = %err, "pool failed to configure; tearing down the rest");
                    for (_, pool) in &pools {
                        pool.teardown().await;
                    }
                    return Err(err);
                }
            }
        }

        tracing::info!(
            pools = ?pools.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            "orchestrator ready"
        );
        Ok(Orchestrator::from_pools(pools))
    }
}

async fn bring_up(
    id: &str,
    config: PoolConfig,
    task: TaskReference,
    registry: Arc<TaskRegistry>,
) -> Result<Arc<dyn WorkerPool>, PoolError> {
    let pool: Arc<dyn WorkerPool> = Arc::from(build_pool(id, config, registry)?);
    if let Err(err) = pool.configure(task).await {
        pool.teardown().await;
        return Err(err);
    }
    Ok(pool)
}
