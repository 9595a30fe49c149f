//! Child worker program for process-pool tests.
//!
//! Serves the tasks of [`fanout_testkit::test_registry`]. Only useful when
//! started by a `ProcessPool`.

use fanout::worker::{serve_if_worker, ARTIFACT_ENV};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fanout_testkit::init_tracing();

    if serve_if_worker(&fanout_testkit::test_registry()).await? {
        return Ok(());
    }
    anyhow::bail!("{ARTIFACT_ENV} is not set; this program is started by a process pool")
}
