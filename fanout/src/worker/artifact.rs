use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;

/// Contents of a worker entry artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerManifest {
    pub pool_id: String,
    /// Registered name of the task the worker must load.
    pub task: String,
    pub debug: bool,
    pub created_at: DateTime<Utc>,
}

/// A manifest file on disk, owned by the pool that wrote it.
///
/// The path is unique per pool instance so concurrently constructed pools
/// sharing a work directory never collide. Workers only read it.
#[derive(Debug)]
pub struct WorkerArtifact {
    path: PathBuf,
    manifest: WorkerManifest,
}

impl WorkerArtifact {
    /// Write a manifest for `task` into `work_dir`.
    pub fn materialize(
        work_dir: &Path,
        pool_id: &str,
        task: &str,
        debug: bool,
    ) -> Result<Self, PoolError> {
        fs::create_dir_all(work_dir).map_err(|err| PoolError::artifact(work_dir, err))?;

        let path = work_dir.join(format!(
            "fanout-{}-{}.json",
            sanitize(pool_id),
            Uuid::new_v4()
        ));
        let manifest = WorkerManifest {
            pool_id: pool_id.to_string(),
            task: task.to_string(),
            debug,
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| PoolError::artifact(&path, err.into()))?;
        fs::write(&path, body).map_err(|err| PoolError::artifact(&path, err))?;

        tracing::debug!(pool_id, task, path = %path.display(), "worker artifact written");
        Ok(Self { path, manifest })
    }

    /// Read a manifest written by [`WorkerArtifact::materialize`].
    pub fn load(path: &Path) -> Result<WorkerManifest, PoolError> {
        let body = fs::read(path).map_err(|err| PoolError::artifact(path, err))?;
        serde_json::from_slice(&body).map_err(|err| PoolError::artifact(path, err.into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &WorkerManifest {
        &self.manifest
    }

    /// Delete the file. A file that is already gone is not an error.
    pub fn remove(self) -> Result<(), PoolError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PoolError::artifact(&self.path, err)),
        }
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
