//! Sync orchestration: provider workers, the committer and the event stream.

/// Batch merge-and-commit loop.
mod committer;
/// Event stream types emitted by the orchestrator.
pub mod events;
/// Orchestrator entry points and options.
pub mod orchestrator;
/// Per-provider pull/push pass.
mod worker;

use crate::persist::{PersistError, PersistResult};

/// Runs a synchronous store call on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> PersistResult<T>
where
    F: FnOnce() -> PersistResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| PersistError::Message(format!("store task failed: {err}")))?
}
