use std::path::PathBuf;

/// Errors that make a pool or a run request unusable.
///
/// Task failures and worker faults are never reported through this type;
/// they are collected into [`ResultSet::failures`](crate::protocol::ResultSet).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid pool configuration or task reference.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The worker entry artifact could not be written, read or removed.
    #[error("worker artifact error at {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `dispatch` was called before a task reference was bound.
    #[error("pool '{0}' has no task configured")]
    NotConfigured(String),

    /// `dispatch` was called after teardown.
    #[error("pool '{0}' has been torn down")]
    Closed(String),

    /// A run request named a pool that does not exist.
    #[error("unknown pool '{0}'")]
    UnknownPool(String),

    /// A run request does not fit the orchestrator's pool layout.
    #[error("invalid run request: {0}")]
    InvalidRequest(String),
}

impl PoolError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PoolError::Artifact {
            path: path.into(),
            source,
        }
    }

    /// Whether the error leaves the pool permanently unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoolError::Configuration(_) | PoolError::Artifact { .. } | PoolError::Closed(_)
        )
    }
}
