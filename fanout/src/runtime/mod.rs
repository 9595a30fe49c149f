/// Builder for constructing orchestrators.
pub mod builder;
/// Orchestrator routing run requests to pools by id.
pub mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use orchestrator::{NamedRequest, Orchestrator, RunRequest, RunResponse, DEFAULT_POOL_ID};
